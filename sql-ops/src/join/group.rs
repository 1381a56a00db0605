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


//! The execution state of a worker group.
//!
//! A worker group runs the join as a state machine over depths. Depth 0 loads
//! the source relation (or, in a right outer pass, the base depth loads the
//! unmatched rows of an inner relation), depths `1..=nrels` join one inner
//! relation each, and depth `nrels + 1` projects the joined combinations into
//! the destination store. Each stage returns the depth to continue at.

use crate::join::control::{ErrorCode, KernContext, KernGpuJoin};
use crate::join::funcs::GpuJoinFuncs;
use crate::join::multirels::MultiRels;
use crate::join::pseudo_stack::PseudoStack;
use crate::join::suspend::{GroupSegment, LaneCursor, SuspendBlock, SuspendSlot, SuspendedLane};

use data_store::{DataStore, DestStore, RowRef};
use simt_runtime::runtime::worker_group::WorkerGroup;
use tracing::debug;

/// The outcome of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Continue at the depth.
    Depth(u32),
    /// All input is consumed and all depths are drained.
    Complete,
    /// The destination store is full, and the group saved its context.
    Suspend,
    /// A lane raised an error.
    Bailout,
}

/// Arguments shared by all groups of a kernel launch.
pub(crate) struct KernelArgs<'k, F> {
    pub kgjoin: &'k KernGpuJoin,
    pub kmrels: &'k MultiRels,
    pub kds_src: Option<&'k DataStore>,
    pub kds_dst: &'k DestStore,
    pub funcs: &'k F,
}

impl<'k, F> Clone for KernelArgs<'k, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'k, F> Copy for KernelArgs<'k, F> {}

/// Variables shared by the lanes of a worker group.
#[derive(Clone, Debug)]
pub(crate) struct GroupShared {
    pub scan_done: bool,
    pub base_depth: u32,
    pub src_read_pos: u32,
    pub dst_base_index: u32,
    pub dst_base_usage: u32,
    pub wip_count: Vec<u32>,
    pub read_pos: Vec<u32>,
    pub write_pos: Vec<u32>,
    pub stat_source_nitems: u32,
    pub stat_nitems: Vec<u32>,
}

impl GroupShared {
    fn new(ndepths: usize, base_depth: u32) -> Self {
        Self {
            scan_done: false,
            base_depth,
            src_read_pos: 0,
            dst_base_index: 0,
            dst_base_usage: 0,
            wip_count: vec![0; ndepths],
            read_pos: vec![0; ndepths],
            write_pos: vec![0; ndepths],
            stat_source_nitems: 0,
            stat_nitems: vec![0; ndepths],
        }
    }
}

/// Private variables of a lane.
#[derive(Debug)]
pub(crate) struct LaneState<'a> {
    pub l_state: Vec<LaneCursor>,
    pub matched: Vec<bool>,
    pub kcxt: KernContext<'a>,
}

/// A worker group bound to its segment of the control object.
pub(crate) struct GroupFrame<'k, F> {
    pub group: &'k WorkerGroup,
    pub args: KernelArgs<'k, F>,
    pub pstack: &'k mut PseudoStack,
    pub suspend: &'k mut SuspendSlot,
    pub shared: GroupShared,
    pub lanes: Vec<LaneState<'k>>,
}

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    pub fn new(
        group: &'k WorkerGroup,
        args: KernelArgs<'k, F>,
        segment: &'k mut GroupSegment,
        base_depth: u32,
    ) -> Self {
        let ndepths = args.kmrels.nrels() as usize + 1;
        let lanes = group
            .lanes()
            .map(|_| LaneState {
                l_state: vec![LaneCursor::Start; ndepths],
                matched: vec![false; ndepths],
                kcxt: KernContext::new(args.kgjoin.params(), args.kmrels.crc32_table()),
            })
            .collect();
        let GroupSegment { pstack, suspend } = segment;

        Self {
            group,
            args,
            pstack,
            suspend,
            shared: GroupShared::new(ndepths, base_depth),
            lanes,
        }
    }

    pub fn nrels(&self) -> u32 {
        self.args.kmrels.nrels()
    }

    pub fn local_size(&self) -> u32 {
        self.group.local_size()
    }

    /// True if `depth` can take one more output row from every lane.
    pub fn has_room(&self, depth: u32) -> bool {
        self.shared.write_pos[depth as usize] + self.local_size() <= self.pstack.nrooms()
    }

    /// Barrier with a vote on whether any lane raised an error.
    pub fn error_vote(&self) -> bool {
        let lanes = &self.lanes;
        self.group
            .sync_or(|lane| lanes[lane as usize].kcxt.is_error())
    }

    /// Raises an error on lane 0 and bails out of the current stage.
    pub fn bailout<S: Into<String>>(&mut self, code: ErrorCode, message: S) -> Flow {
        if let Some(lane) = self.lanes.first_mut() {
            lane.kcxt.set_error(code, message);
        }
        Flow::Bailout
    }

    /// Appends the new combinations of all lanes to `depth`.
    ///
    /// Lane `i` contributes `results[i]`: the outer record at `depth - 1`
    /// (or `None` for a null-extended prefix) and the row joined at `depth`.
    /// The combinations are compacted in lane order. Returns `None` if the
    /// pseudo-stack overflowed.
    pub fn push_combinations(
        &mut self,
        depth: u32,
        results: &[Option<(Option<u32>, RowRef)>],
    ) -> Option<u32> {
        let flags: Vec<bool> = results.iter().map(Option::is_some).collect();
        let (offsets, count) = self.group.stairlike_binary_count(&flags);
        let base = self.shared.write_pos[depth as usize];

        let mut overflow = false;
        for (lane, (result, offset)) in results.iter().zip(offsets).enumerate() {
            if let Some((outer, row)) = *result {
                if !self.pstack.write_record(depth, base + offset, outer, row) {
                    self.lanes[lane].kcxt.set_error(
                        ErrorCode::OutOfRange,
                        format!("Pseudo-stack of depth {} overflows", depth),
                    );
                    overflow = true;
                }
            }
        }
        if overflow {
            return None;
        }

        self.shared.write_pos[depth as usize] += count;
        self.shared.stat_nitems[depth as usize] += count;
        Some(count)
    }

    /// Resets the traversal state of all depths below `depth`.
    pub fn reset_lanes_below(&mut self, depth: u32) {
        let from = depth as usize + 1;
        for lane in self.lanes.iter_mut() {
            lane.l_state
                .iter_mut()
                .skip(from)
                .for_each(|s| *s = LaneCursor::Start);
            lane.matched.iter_mut().skip(from).for_each(|m| *m = false);
        }
    }

    /// Saves the group's state, to continue at `depth` after a resume.
    pub fn suspend_context(&mut self, depth: u32) {
        let shared = &self.shared;
        let block = SuspendBlock {
            layout: self.args.kgjoin.layout(),
            base_depth: shared.base_depth,
            depth,
            scan_done: shared.scan_done,
            src_read_pos: shared.src_read_pos,
            wip_count: shared.wip_count.clone(),
            read_pos: shared.read_pos.clone(),
            write_pos: shared.write_pos.clone(),
            stat_source_nitems: shared.stat_source_nitems,
            stat_nitems: shared.stat_nitems.clone(),
            lanes: self
                .lanes
                .iter()
                .map(|lane| SuspendedLane {
                    l_state: lane.l_state.clone(),
                    matched: lane.matched.clone(),
                })
                .collect(),
        };

        debug!(
            "Group {} suspends at depth {} with {} pending results",
            self.group.group_id(),
            depth,
            shared.write_pos[self.nrels() as usize] - shared.read_pos[self.nrels() as usize]
        );
        *self.suspend = SuspendSlot::Suspended(Box::new(block));
    }

    /// Restores the group's state from its suspend slot.
    ///
    /// Returns the flow to start with, or `None` if the group already
    /// completed in an earlier launch.
    pub fn resume_context(&mut self) -> Option<Flow> {
        let block = match std::mem::replace(self.suspend, SuspendSlot::Vacant) {
            SuspendSlot::Vacant => return Some(Flow::Depth(self.shared.base_depth)),
            SuspendSlot::Completed => {
                *self.suspend = SuspendSlot::Completed;
                return None;
            }
            SuspendSlot::Suspended(block) => block,
        };

        if block.layout != self.args.kgjoin.layout()
            || block.base_depth != self.shared.base_depth
            || block.lanes.len() != self.lanes.len()
            || block.read_pos.len() != self.shared.read_pos.len()
        {
            return Some(self.bailout(
                ErrorCode::WrongCodeGeneration,
                "Suspend context does not match the control object",
            ));
        }

        let SuspendBlock {
            depth,
            scan_done,
            src_read_pos,
            wip_count,
            read_pos,
            write_pos,
            stat_source_nitems,
            stat_nitems,
            lanes,
            ..
        } = *block;

        self.shared.scan_done = scan_done;
        self.shared.src_read_pos = src_read_pos;
        self.shared.wip_count = wip_count;
        self.shared.read_pos = read_pos;
        self.shared.write_pos = write_pos;
        self.shared.stat_source_nitems = stat_source_nitems;
        self.shared.stat_nitems = stat_nitems;
        for (lane, saved) in self.lanes.iter_mut().zip(lanes) {
            lane.l_state = saved.l_state;
            lane.matched = saved.matched;
        }

        Some(Flow::Depth(depth))
    }

    /// Runs stages until the group completes, suspends, or bails out.
    pub fn run(&mut self, mut flow: Flow) -> Flow {
        loop {
            flow = match flow {
                Flow::Depth(depth) => self.exec_depth(depth),
                other => return other,
            };
        }
    }

    fn exec_depth(&mut self, depth: u32) -> Flow {
        let nrels = self.nrels();
        let base_depth = self.shared.base_depth;

        if depth < base_depth || depth > nrels + 1 {
            self.bailout(
                ErrorCode::WrongCodeGeneration,
                format!("Depth {} is out of range", depth),
            )
        } else if depth == base_depth {
            if base_depth == 0 {
                self.load_source()
            } else {
                self.load_outer(depth)
            }
        } else if depth == nrels + 1 {
            self.projection()
        } else {
            match self.args.kmrels.chunk(depth).map(|c| c.is_nestloop()) {
                Some(true) => self.exec_nestloop(depth),
                Some(false) => self.exec_hashjoin(depth),
                None => self.bailout(
                    ErrorCode::WrongCodeGeneration,
                    format!("No inner relation at depth {}", depth),
                ),
            }
        }
    }

    /// Marks the group as finished and adds its statistics to the control
    /// object.
    pub fn complete(&mut self) {
        *self.suspend = SuspendSlot::Completed;

        let kgjoin = self.args.kgjoin;
        let shared = &self.shared;
        if shared.base_depth == 0 {
            kgjoin.add_source_nitems(shared.stat_source_nitems);
            kgjoin.add_outer_nitems(shared.stat_nitems[0]);
        }
        for depth in shared.base_depth.max(1)..=self.nrels() {
            kgjoin.add_stat_nitems(depth, shared.stat_nitems[depth as usize]);
        }
    }

    /// Writes the errors of all lanes back to the control object.
    pub fn writeback_error(&self) {
        let kerror = self.args.kgjoin.kerror();
        self.lanes
            .iter()
            .filter(|lane| lane.kcxt.is_error())
            .for_each(|lane| kerror.writeback(lane.kcxt.errcode(), lane.kcxt.message()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::multirels::JoinType;
    use crate::join::tests::TestKernel;
    use std::error::Error;

    #[test]
    fn cursors_stay_ordered() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::new(&[JoinType::Inner, JoinType::Left], true, 4)?;
        let flow = kernel.with_frame(|frame| {
            let mut flow = Flow::Depth(0);
            let mut steps = 0;
            while let Flow::Depth(depth) = flow {
                flow = frame.exec_depth(depth);
                for d in 0..frame.shared.read_pos.len() {
                    assert!(frame.shared.read_pos[d] <= frame.shared.write_pos[d]);
                    assert!(frame.shared.write_pos[d] <= frame.pstack.nrooms());
                }
                steps += 1;
                assert!(steps < 10_000, "Join does not terminate");
            }
            flow
        });

        assert_eq!(flow, Flow::Complete);
        assert_eq!(kernel.dst.nitems(), 8);
        Ok(())
    }

    #[test]
    fn complete_folds_statistics() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.with_frame(|frame| {
            assert_eq!(frame.run(Flow::Depth(0)), Flow::Complete);
            frame.complete();
            assert!(frame.suspend.is_completed());
            assert_eq!(frame.resume_context(), None);
        });

        let stats = kernel.kgjoin.stats();
        assert_eq!(stats.source_nitems, 16);
        assert_eq!(stats.outer_nitems, 16);
        assert_eq!(stats.stat_nitems, vec![8]);
        Ok(())
    }

    #[test]
    fn resume_restores_context() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(2, 4)?;
        kernel.with_frame(|frame| {
            frame.shared.write_pos = vec![8, 5, 2];
            frame.shared.read_pos = vec![4, 1, 0];
            frame.shared.scan_done = true;
            frame.lanes[2].l_state[1] = LaneCursor::Pass(3);
            frame.lanes[2].matched[1] = true;
            frame.suspend_context(3);
        });

        kernel.with_frame(|frame| {
            assert_eq!(frame.resume_context(), Some(Flow::Depth(3)));
            assert_eq!(frame.shared.write_pos, vec![8, 5, 2]);
            assert_eq!(frame.shared.read_pos, vec![4, 1, 0]);
            assert!(frame.shared.scan_done);
            assert_eq!(frame.lanes[2].l_state[1], LaneCursor::Pass(3));
            assert!(frame.lanes[2].matched[1]);
            assert!(!frame.suspend.is_suspended());
        });
        Ok(())
    }

    #[test]
    fn resume_rejects_foreign_layout() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.with_frame(|frame| {
            frame.suspend_context(2);
            if let SuspendSlot::Suspended(block) = &mut *frame.suspend {
                block.layout.total_length += 8;
            }

            assert_eq!(frame.resume_context(), Some(Flow::Bailout));
            assert_eq!(frame.lanes[0].kcxt.errcode(), ErrorCode::WrongCodeGeneration);
        });
        Ok(())
    }
}
