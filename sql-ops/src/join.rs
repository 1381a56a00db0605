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


//! Multi-relation join of a source relation with up to `GPUJOIN_MAX_DEPTH`
//! inner relations.
//!
//! The join is executed by three kernels:
//!
//! - the main kernel joins the source relation with all inner relations and
//!   emits inner join and left outer join results;
//! - the right outer kernel emits the inner rows of one right outer relation
//!   that no combination referenced during the main kernel;
//! - the collation kernel merges the outer join maps of several devices.
//!
//! Predicates, hash functions, and projections are supplied by the caller
//! through the [`GpuJoinFuncs`] trait.

mod control;
mod funcs;
mod gpujoin;
mod group;
mod hashjoin;
mod load_outer;
mod load_source;
mod multirels;
mod nestloop;
mod projection;
mod pseudo_stack;
mod rewind;
mod suspend;


pub use control::{
    ErrorCode, ErrorSlot, GpuJoinLayout, GpuJoinStats, KernContext, KernGpuJoin, ParamBuf,
    GPUJOIN_MAX_DEPTH,
};
pub use funcs::{EquiJoin, GpuJoinFuncs, InnerRow, JoinKey, JoinRecord, ProjValue, ProjectionBuf};
pub use gpujoin::{GpuJoin, GpuJoinBuilder, GpuJoinKernel, KernelStatus};
pub use multirels::{ChunkFlags, InnerChunk, InnerStore, JoinType, MultiRels, MultiRelsBuilder};
pub use pseudo_stack::PseudoStack;
pub use suspend::{GroupSegment, LaneCursor, SuspendBlock, SuspendSlot, SuspendedLane};
