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


//! Suspend snapshots of worker groups.

use crate::join::control::GpuJoinLayout;
use crate::join::pseudo_stack::PseudoStack;
use serde_derive::{Deserialize, Serialize};

/// The traversal cursor of a lane at one depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneCursor {
    /// No work started on the current outer batch.
    Start,
    /// Pass counter of a loop over the current batch.
    Pass(u32),
    /// Walking a hash chain; the next item to visit.
    InChain(u32),
    /// The hash chain of the lane's outer row is exhausted.
    Exhausted,
    /// The lane had no outer row in the current batch.
    NoOuter,
}

impl Default for LaneCursor {
    fn default() -> Self {
        LaneCursor::Start
    }
}

impl LaneCursor {
    /// The pass counter. Zero unless the cursor is a `Pass`.
    pub fn pass(self) -> u32 {
        match self {
            LaneCursor::Pass(n) => n,
            _ => 0,
        }
    }

    /// True if the lane has an outer row whose hash chain is not finished.
    pub fn is_walking(self) -> bool {
        matches!(self, LaneCursor::Start | LaneCursor::InChain(_))
    }
}

/// Per-lane part of a suspend snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedLane {
    pub l_state: Vec<LaneCursor>,
    pub matched: Vec<bool>,
}

/// The execution state of a worker group at the moment of suspension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendBlock {
    /// Layout of the control object that the snapshot was saved with.
    pub layout: GpuJoinLayout,
    pub base_depth: u32,
    /// The depth to continue at.
    pub depth: u32,
    pub scan_done: bool,
    pub src_read_pos: u32,
    pub wip_count: Vec<u32>,
    pub read_pos: Vec<u32>,
    pub write_pos: Vec<u32>,
    pub stat_source_nitems: u32,
    pub stat_nitems: Vec<u32>,
    pub lanes: Vec<SuspendedLane>,
}

/// The suspend context of a worker group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspendSlot {
    /// Nothing saved yet.
    Vacant,
    Suspended(Box<SuspendBlock>),
    /// The group finished. It must not be resumed again.
    Completed,
}

impl Default for SuspendSlot {
    fn default() -> Self {
        SuspendSlot::Vacant
    }
}

impl SuspendSlot {
    pub fn is_suspended(&self) -> bool {
        matches!(self, SuspendSlot::Suspended(_))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SuspendSlot::Completed)
    }

    pub fn block(&self) -> Option<&SuspendBlock> {
        match self {
            SuspendSlot::Suspended(block) => Some(block),
            _ => None,
        }
    }
}

/// The private segment of a worker group within the control object.
///
/// The pseudo-stack must be preserved between a suspension and the resumed
/// launch, because suspended records are still referenced by the cursors in
/// the snapshot.
#[derive(Clone, Debug)]
pub struct GroupSegment {
    pub pstack: PseudoStack,
    pub suspend: SuspendSlot,
}

impl GroupSegment {
    pub fn new(nrels: u32, nrooms: u32) -> Self {
        Self {
            pstack: PseudoStack::new(nrels, nrooms),
            suspend: SuspendSlot::Vacant,
        }
    }
}
