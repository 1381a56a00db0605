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


//! Generators for join workloads.
//!
//! Relations are generated attribute by attribute into slices, and then
//! assembled into tuples of `data_store::Datum` values. Key attributes may
//! contain `NULL` keys, which never match in a join.

pub mod error;
pub mod relation;
pub mod workload;

pub use relation::{KeyAttribute, UniformRelation};
pub use workload::{JoinWorkload, JoinWorkloadBuilder};
