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


//! Group-wide exclusive prefix scans.
//!
//! These are the building blocks for stream compaction within a worker group.
//! Lanes that produce an output compute their write position as the exclusive
//! prefix count of the producing lanes. Thus, the outputs of a step occupy a
//! contiguous range without gaps from lanes that didn't produce anything.
//!
//! Each scan returns the per-lane exclusive prefixes together with the
//! group-wide total.

/// Exclusive prefix count over per-lane flags.
///
/// Returns the number of `true` flags in front of each lane, and the total
/// number of `true` flags.
pub fn exclusive_prefix_count(flags: &[bool]) -> (Vec<u32>, u32) {
    let mut total = 0_u32;
    let prefixes = flags
        .iter()
        .map(|&flag| {
            let prefix = total;
            total += flag as u32;
            prefix
        })
        .collect();

    (prefixes, total)
}

/// Exclusive prefix sum over per-lane values.
///
/// Returns the sum of the values in front of each lane, and the group-wide
/// sum. Panics on overflow in debug builds.
pub fn exclusive_prefix_sum(values: &[u32]) -> (Vec<u32>, u32) {
    let mut total = 0_u32;
    let prefixes = values
        .iter()
        .map(|&value| {
            let prefix = total;
            total += value;
            prefix
        })
        .collect();

    (prefixes, total)
}
