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


use super::dims::LaunchDims;
use super::worker_group::WorkerGroup;
use crate::error::Result;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Executes kernels over a grid of worker groups.
///
/// Groups are distributed over a thread pool. Each group owns a mutable
/// per-group state for the duration of a launch, e.g., its pseudo-stack and
/// suspend slot. State shared between groups must be passed to the kernel
/// by reference and only be mutated through atomics.
pub struct Grid {
    dims: LaunchDims,
    thread_pool: ThreadPool,
}

pub struct GridBuilder {
    dims: LaunchDims,
    num_threads: usize,
}

impl GridBuilder {
    pub fn new(dims: LaunchDims) -> Self {
        Self {
            dims,
            num_threads: 0,
        }
    }

    /// Sets the number of threads in the pool.
    ///
    /// The default (`0`) uses one thread per logical core.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn build(self) -> Result<Grid> {
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|index| format!("simt-worker-{}", index))
            .build()?;

        debug!(
            "Built grid with {} groups of {} lanes on {} threads",
            self.dims.grid.x,
            self.dims.block.x,
            thread_pool.current_num_threads()
        );

        Ok(Grid {
            dims: self.dims,
            thread_pool,
        })
    }
}

impl Grid {
    pub fn dims(&self) -> LaunchDims {
        self.dims
    }

    /// Launches `kernel` once per worker group and waits for all groups.
    ///
    /// `states` must contain exactly one state per group; group `i` receives
    /// `states[i]`. Returns the per-group results in group order.
    pub fn launch<S, R, F>(&self, states: &mut [S], kernel: F) -> Vec<R>
    where
        S: Send,
        R: Send,
        F: Fn(&WorkerGroup, &mut S) -> R + Send + Sync,
    {
        assert_eq!(
            states.len(),
            self.dims.grid.x as usize,
            "Expected one state per worker group"
        );

        let num_groups = self.dims.grid.x;
        let local_size = self.dims.block.x;

        self.thread_pool.install(|| {
            states
                .par_iter_mut()
                .enumerate()
                .map(|(group_id, state)| {
                    let group = WorkerGroup::new(group_id as u32, num_groups, local_size);
                    kernel(&group, state)
                })
                .collect()
        })
    }

    /// Runs `f` over `0..len` in parallel on the grid's thread pool.
    ///
    /// Useful for grid-stride loops that don't need group-shared state.
    pub fn for_each_index<F>(&self, len: usize, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        self.thread_pool
            .install(|| (0..len).into_par_iter().for_each(|index| f(index)));
    }
}
