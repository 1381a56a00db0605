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


use super::prefix_scan;
use std::ops::Range;

/// A worker group of lockstep lanes.
///
/// The group is the unit of scheduling: one group is executed by one thread
/// at a time. See the crate documentation for the execution model.
#[derive(Clone, Debug)]
pub struct WorkerGroup {
    group_id: u32,
    num_groups: u32,
    local_size: u32,
}

impl WorkerGroup {
    pub fn new(group_id: u32, num_groups: u32, local_size: u32) -> Self {
        debug_assert!(group_id < num_groups);
        debug_assert!(local_size > 0);

        Self {
            group_id,
            num_groups,
            local_size,
        }
    }

    /// Index of this group within the grid.
    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    /// Number of groups in the grid.
    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }

    /// Number of lanes in this group.
    pub fn local_size(&self) -> u32 {
        self.local_size
    }

    /// Iterates over the lane ids of the group.
    pub fn lanes(&self) -> Range<u32> {
        0..self.local_size
    }

    /// Executes one step on every lane.
    ///
    /// The step is complete for all lanes when `step` returns.
    pub fn step<F>(&self, mut f: F)
    where
        F: FnMut(u32),
    {
        self.lanes().for_each(|lane| f(lane));
    }

    /// Executes one step on every lane and collects the per-lane results.
    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(u32) -> T,
    {
        self.lanes().map(f).collect()
    }

    /// Barrier with a vote that counts the lanes for which `pred` holds.
    pub fn sync_count<F>(&self, mut pred: F) -> u32
    where
        F: FnMut(u32) -> bool,
    {
        self.lanes().filter(|&lane| pred(lane)).count() as u32
    }

    /// Barrier with a vote that is true if `pred` holds for any lane.
    ///
    /// The predicate is evaluated on all lanes, even if an earlier lane
    /// already decided the vote.
    pub fn sync_or<F>(&self, pred: F) -> bool
    where
        F: FnMut(u32) -> bool,
    {
        self.sync_count(pred) > 0
    }

    /// Stairlike count: compacts the lanes with a `true` flag.
    ///
    /// See [`prefix_scan::exclusive_prefix_count`].
    pub fn stairlike_binary_count(&self, flags: &[bool]) -> (Vec<u32>, u32) {
        debug_assert_eq!(flags.len(), self.local_size as usize);
        prefix_scan::exclusive_prefix_count(flags)
    }

    /// Stairlike sum: reserves a contiguous range for each lane's value.
    ///
    /// See [`prefix_scan::exclusive_prefix_sum`].
    pub fn stairlike_sum(&self, values: &[u32]) -> (Vec<u32>, u32) {
        debug_assert_eq!(values.len(), self.local_size as usize);
        prefix_scan::exclusive_prefix_sum(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn votes() {
        let group = WorkerGroup::new(0, 1, 8);
        assert_eq!(group.sync_count(|lane| lane % 2 == 0), 4);
        assert!(group.sync_or(|lane| lane == 7));
        assert!(!group.sync_or(|lane| lane > 7));
    }

    #[test]
    fn sync_or_visits_every_lane() {
        let group = WorkerGroup::new(0, 1, 8);
        let mut visited = 0;
        let vote = group.sync_or(|_| {
            visited += 1;
            true
        });
        assert!(vote);
        assert_eq!(visited, 8);
    }

    #[test]
    fn map_preserves_lane_order() {
        let group = WorkerGroup::new(1, 2, 4);
        assert_eq!(group.map(|lane| lane * 10), vec![0, 10, 20, 30]);
    }
}
