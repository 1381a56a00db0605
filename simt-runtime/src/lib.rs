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


//! # The SIMT Runtime
//!
//! `simt-runtime` executes kernels written for lockstep worker groups on a
//! pool of CPU threads. A kernel is launched over a grid of worker groups.
//! Each worker group has a fixed number of lanes that execute the same
//! instruction stream.
//!
//! # Lockstep model
//!
//! A group runs on exactly one thread. Lane-parallel code is written as a
//! *step*, i.e., a closure that is applied to every lane of the group in turn.
//! Returning from a step is the barrier: every lane has completed the step
//! before any lane starts the next one. Group-wide votes such as
//! [`WorkerGroup::sync_count`] and [`WorkerGroup::sync_or`] combine a barrier
//! with a reduction over all lanes.
//!
//! Lane-private variables are kept in per-lane vectors indexed by the lane id.
//! Group-shared variables are plain fields owned by the group, as no other
//! group can observe them.
//!
//! # Cross-group state
//!
//! Groups are scheduled independently by the thread pool. They may only
//! communicate through atomics, for example the [`WindowCursor`] that hands out
//! disjoint input windows. Groups never wait for each other, which keeps the
//! execution free of deadlocks regardless of the pool size.
//!
//! [`WindowCursor`]: runtime::dispatcher::WindowCursor

pub mod error;
pub mod runtime;
pub mod utils;
