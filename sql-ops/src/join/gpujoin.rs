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


//! Host-side launcher of the join kernels.

use crate::error::{ErrorKind, Result};
use crate::join::control::{ErrorCode, GpuJoinLayout, GpuJoinStats, KernGpuJoin, ParamBuf};
use crate::join::funcs::GpuJoinFuncs;
use crate::join::group::{Flow, GroupFrame, KernelArgs};
use crate::join::multirels::MultiRels;
use crate::join::suspend::{GroupSegment, SuspendSlot};

use data_store::{DataStore, DestStore};
use serde_derive::{Deserialize, Serialize};
use simt_runtime::runtime::dims::LaunchDims;
use simt_runtime::runtime::grid::{Grid, GridBuilder};
use tracing::{debug, info};

/// The join kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuJoinKernel {
    /// Joins the source relation with all inner relations.
    Main,
    /// Emits the unreferenced rows of the right outer relation at
    /// `outer_depth`, joined with the deeper relations.
    RightOuter { outer_depth: u32 },
}

impl GpuJoinKernel {
    fn base_depth(self) -> u32 {
        match self {
            GpuJoinKernel::Main => 0,
            GpuJoinKernel::RightOuter { outer_depth } => outer_depth,
        }
    }
}

/// The outcome of a successful kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelStatus {
    /// All groups finished.
    Completed,
    /// The destination store filled up. The kernel must be resumed with a
    /// new destination store.
    Suspended,
}

/// Builds a `GpuJoin`.
#[derive(Clone, Debug)]
pub struct GpuJoinBuilder {
    grid_size: u32,
    block_size: u32,
    pstack_nrooms: Option<u32>,
    num_threads: usize,
    params: ParamBuf,
}

impl Default for GpuJoinBuilder {
    fn default() -> Self {
        Self {
            grid_size: 4,
            block_size: 32,
            pstack_nrooms: None,
            num_threads: 0,
            params: ParamBuf::default(),
        }
    }
}

impl GpuJoinBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker groups.
    pub fn grid_size(mut self, grid_size: u32) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Sets the number of lanes per worker group.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the number of pseudo-stack rooms per depth. Defaults to four
    /// times the block size.
    pub fn pstack_nrooms(mut self, nrooms: u32) -> Self {
        self.pstack_nrooms = Some(nrooms);
        self
    }

    /// Sets the number of host threads. The default (`0`) uses one thread
    /// per logical core.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn params(mut self, params: ParamBuf) -> Self {
        self.params = params;
        self
    }

    pub fn build<F>(self, kmrels: MultiRels, funcs: F) -> Result<GpuJoin<F>>
    where
        F: GpuJoinFuncs,
    {
        let dims = LaunchDims::new(self.grid_size, self.block_size)?;
        let nrooms = match self.pstack_nrooms {
            Some(nrooms) => nrooms,
            None => self.block_size.checked_mul(4).ok_or_else(|| {
                ErrorKind::IntegerOverflow("Pseudo-stack rooms overflow".to_string())
            })?,
        };
        let nrels = kmrels.nrels();

        let kgjoin = KernGpuJoin::new(dims, nrels, nrooms, self.params)?;
        let grid = GridBuilder::new(dims).num_threads(self.num_threads).build()?;
        let segments = (0..dims.grid.x)
            .map(|_| GroupSegment::new(nrels, nrooms))
            .collect();

        debug!(
            "Control object of {} relations needs {} bytes",
            nrels,
            kgjoin.layout().total_length
        );

        Ok(GpuJoin {
            grid,
            kgjoin,
            kmrels,
            funcs,
            segments,
            pending: None,
            dims,
        })
    }
}

/// A multi-relation join.
///
/// Owns the control object, the inner relations, and the per-group
/// segments. Source and destination stores are passed per launch.
pub struct GpuJoin<F> {
    grid: Grid,
    kgjoin: KernGpuJoin,
    kmrels: MultiRels,
    funcs: F,
    segments: Vec<GroupSegment>,
    pending: Option<GpuJoinKernel>,
    dims: LaunchDims,
}

impl<F> GpuJoin<F>
where
    F: GpuJoinFuncs,
{
    /// Launches the main kernel on a source store.
    pub fn launch_main(&mut self, src: &DataStore, dst: &DestStore) -> Result<KernelStatus> {
        if let DataStore::Block(store) = src {
            if store.part_width() > self.dims.block.x {
                Err(ErrorKind::InvalidArgument(format!(
                    "Partition width {} exceeds the block size {}",
                    store.part_width(),
                    self.dims.block.x
                )))?;
            }
        }
        self.start(GpuJoinKernel::Main)?;
        self.execute(GpuJoinKernel::Main, Some(src), dst)
    }

    /// Launches the right outer kernel of the relation at `outer_depth`.
    ///
    /// Must run after the main kernel completed on all source stores, and
    /// after the outer join maps were colocated.
    pub fn launch_right_outer(&mut self, outer_depth: u32, dst: &DestStore) -> Result<KernelStatus> {
        if !self
            .kmrels
            .chunk(outer_depth)
            .map_or(false, |c| c.is_right_outer())
        {
            Err(ErrorKind::InvalidArgument(format!(
                "Depth {} is not a right outer join",
                outer_depth
            )))?;
        }
        let kernel = GpuJoinKernel::RightOuter { outer_depth };
        self.start(kernel)?;
        self.execute(kernel, None, dst)
    }

    /// Resumes the suspended kernel with a new destination store.
    ///
    /// The main kernel must be resumed with the same source store it was
    /// launched with.
    pub fn resume(&mut self, src: Option<&DataStore>, dst: &DestStore) -> Result<KernelStatus> {
        let kernel = self
            .pending
            .ok_or_else(|| ErrorKind::InvalidArgument("No kernel is suspended".to_string()))?;
        let layout = self.kgjoin.layout();
        if let Some(block) = self
            .segments
            .iter()
            .filter_map(|s| s.suspend.block())
            .find(|b| b.layout != layout)
        {
            Err(ErrorKind::LayoutMismatch(format!(
                "Suspended with {:?}, but the control object has {:?}",
                block.layout, layout
            )))?;
        }
        let src = match kernel {
            GpuJoinKernel::Main => Some(src.ok_or_else(|| {
                ErrorKind::InvalidArgument("The main kernel requires a source store".to_string())
            })?),
            GpuJoinKernel::RightOuter { .. } => None,
        };

        self.pending = None;
        self.kgjoin.prepare_launch(true);
        debug!("Resuming the {:?} kernel", kernel);
        self.execute(kernel, src, dst)
    }

    fn start(&mut self, kernel: GpuJoinKernel) -> Result<()> {
        if let Some(pending) = self.pending {
            Err(ErrorKind::InvalidArgument(format!(
                "Cannot launch the {:?} kernel while the {:?} kernel is suspended",
                kernel, pending
            )))?;
        }
        for segment in self.segments.iter_mut() {
            segment.suspend = SuspendSlot::Vacant;
        }
        self.kgjoin.prepare_launch(false);
        debug!("Launching the {:?} kernel", kernel);
        Ok(())
    }

    fn execute(
        &mut self,
        kernel: GpuJoinKernel,
        src: Option<&DataStore>,
        dst: &DestStore,
    ) -> Result<KernelStatus> {
        let base_depth = kernel.base_depth();
        let resume = self.kgjoin.resume_context();
        let args = KernelArgs {
            kgjoin: &self.kgjoin,
            kmrels: &self.kmrels,
            kds_src: src,
            kds_dst: dst,
            funcs: &self.funcs,
        };

        self.grid.launch(&mut self.segments, move |group, segment| {
            let mut frame = GroupFrame::new(group, args, segment, base_depth);
            let flow = if resume {
                frame.resume_context()
            } else {
                Some(Flow::Depth(base_depth))
            };
            if let Some(flow) = flow {
                if frame.run(flow) == Flow::Complete {
                    frame.complete();
                }
            }
            frame.writeback_error();
        });

        let kerror = self.kgjoin.kerror();
        match kerror.code() {
            ErrorCode::Success => {
                info!(
                    "{:?} kernel completed with {} rows in the destination",
                    kernel,
                    dst.nitems()
                );
                Ok(KernelStatus::Completed)
            }
            ErrorCode::Suspend => {
                debug!(
                    "{:?} kernel suspended with {} rows in the destination",
                    kernel,
                    dst.nitems()
                );
                self.pending = Some(kernel);
                Ok(KernelStatus::Suspended)
            }
            code => Err(ErrorKind::KernelError {
                code,
                message: kerror.message().unwrap_or_default().to_string(),
            })?,
        }
    }

    /// Merges the outer join maps of all devices into the map of the current
    /// device.
    pub fn colocate_outer_join_map(&self) {
        let kmrels = &self.kmrels;
        self.grid
            .for_each_index(kmrels.ojmaps_length(), |index| kmrels.colocate_entry(index));
    }

    /// Clears the outer join maps, e.g., before joining a new set of source
    /// stores.
    pub fn reset_outer_join_maps(&mut self) {
        self.kmrels.clear_ojmaps();
    }

    /// Replaces the query parameters.
    ///
    /// Suspended groups cannot be resumed if the new parameters change the
    /// layout of the control object.
    pub fn set_params(&mut self, params: ParamBuf) -> Result<()> {
        self.kgjoin.set_params(self.dims, params)
    }

    /// Runs the main kernel over all source stores and then the right outer
    /// kernels, with a new destination store whenever the kernel suspends.
    ///
    /// Returns the filled destination stores in order.
    pub fn run_to_completion<A>(&mut self, sources: &[DataStore], mut alloc_dst: A) -> Result<Vec<DestStore>>
    where
        A: FnMut() -> Result<DestStore>,
    {
        let mut results = Vec::new();
        let mut dst = alloc_dst()?;

        for src in sources {
            let mut status = self.launch_main(src, &dst)?;
            while status == KernelStatus::Suspended {
                Self::swap_dst(&mut results, &mut dst, &mut alloc_dst)?;
                status = self.resume(Some(src), &dst)?;
            }
        }

        let outer_depths = self.kmrels.right_outer_depths();
        if !outer_depths.is_empty() {
            self.colocate_outer_join_map();
        }
        for outer_depth in outer_depths {
            let mut status = self.launch_right_outer(outer_depth, &dst)?;
            while status == KernelStatus::Suspended {
                Self::swap_dst(&mut results, &mut dst, &mut alloc_dst)?;
                status = self.resume(None, &dst)?;
            }
        }

        if dst.nitems() > 0 || results.is_empty() {
            results.push(dst);
        }
        Ok(results)
    }

    fn swap_dst<A>(results: &mut Vec<DestStore>, dst: &mut DestStore, alloc_dst: &mut A) -> Result<()>
    where
        A: FnMut() -> Result<DestStore>,
    {
        if dst.nitems() == 0 {
            Err(ErrorKind::InvalidArgument(format!(
                "Destination store of {} bytes cannot hold a single batch",
                dst.length()
            )))?;
        }
        let full = std::mem::replace(dst, alloc_dst()?);
        debug!("Destination store is full with {} rows", full.nitems());
        results.push(full);
        Ok(())
    }

    /// The statistics accumulated by all completed groups.
    pub fn stats(&self) -> GpuJoinStats {
        self.kgjoin.stats()
    }

    pub fn layout(&self) -> GpuJoinLayout {
        self.kgjoin.layout()
    }

    pub fn kmrels(&self) -> &MultiRels {
        &self.kmrels
    }

    pub fn segments(&self) -> &[GroupSegment] {
        &self.segments
    }

    /// The kernel waiting to be resumed, if any.
    pub fn pending(&self) -> Option<GpuJoinKernel> {
        self.pending
    }
}
