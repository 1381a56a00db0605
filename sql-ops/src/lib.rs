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


//! # The SQL Operator Library
//!
//! `sql-ops` implements a multi-relation join for lockstep worker groups. The
//! join evaluates a left-deep plan of hash joins and nested-loop joins over
//! many inner relations inside a single kernel.
//!
//! # Execution
//!
//! Each worker group keeps a pseudo-stack with one region per join depth.
//! Depth 0 holds rows from the source relation, depth `d` holds combinations
//! of `d + 1` rows, and depth `N + 1` projects finished combinations into the
//! destination store. A group moves between depths until all input is
//! consumed.
//!
//! Groups share only the source cursor, the statistics counters, the outer
//! join maps, and the destination store's reservation word. All of these are
//! atomics.
//!
//! # Suspend and resume
//!
//! The destination store has a fixed size. When it fills up, a group saves
//! its complete execution state into its suspend slot and stops. The host
//! swaps in a new destination store and resumes the kernel, which continues
//! exactly where it left off. See [`GpuJoin::run_to_completion`].
//!
//! # Tuning parameters
//!
//! ## Pseudo-stack rooms
//!
//! `pstack_nrooms` bounds the number of combinations per depth and group. It
//! must be at least the block size, because a join stage emits up to one
//! combination per lane in a single step. Larger values batch more
//! combinations per projection, but increase the memory footprint linearly.
//!
//! [`GpuJoin::run_to_completion`]: join::GpuJoin::run_to_completion

pub mod error;
pub mod join;
