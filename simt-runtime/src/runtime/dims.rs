// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Launch dimensions of a kernel.
//!
//! The naming follows the CUDA terminology: a grid consists of blocks, i.e.,
//! worker groups, and a block consists of threads, i.e., lanes.

use crate::error::{ErrorKind, Result};

/// Number of worker groups in a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub x: u32,
}

/// Number of lanes in a worker group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSize {
    pub x: u32,
}

impl From<u32> for GridSize {
    fn from(x: u32) -> Self {
        Self { x }
    }
}

impl From<u32> for BlockSize {
    fn from(x: u32) -> Self {
        Self { x }
    }
}

/// The maximum number of lanes per worker group.
///
/// Mirrors the thread limit per block of current Nvidia GPUs, which bounds
/// the size of group-shared vectors.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

/// Grid and block size of a kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: GridSize,
    pub block: BlockSize,
}

impl LaunchDims {
    /// Validates and returns new launch dimensions.
    pub fn new<G, B>(grid: G, block: B) -> Result<Self>
    where
        G: Into<GridSize>,
        B: Into<BlockSize>,
    {
        let grid = grid.into();
        let block = block.into();

        if grid.x == 0 {
            Err(ErrorKind::InvalidArgument(
                "Grid size must be at least one worker group".to_string(),
            ))?;
        }
        if block.x == 0 || block.x > MAX_THREADS_PER_BLOCK {
            Err(ErrorKind::InvalidArgument(format!(
                "Block size must be between 1 and {} lanes",
                MAX_THREADS_PER_BLOCK
            )))?;
        }

        Ok(Self { grid, block })
    }

    /// Total number of lanes in the grid.
    pub fn total_lanes(&self) -> usize {
        self.grid.x as usize * self.block.x as usize
    }
}
