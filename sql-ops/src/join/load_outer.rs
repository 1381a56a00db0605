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


use crate::join::control::ErrorCode;
use crate::join::funcs::GpuJoinFuncs;
use crate::join::group::{Flow, GroupFrame};

use data_store::RowRef;

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Loads the next batch of inner rows of `outer_depth` that no outer
    /// combination referenced.
    ///
    /// The rows seed combinations whose shallower references are all null.
    pub(crate) fn load_outer(&mut self, outer_depth: u32) -> Flow {
        let kmrels = self.args.kmrels;
        let nitems = match (kmrels.chunk(outer_depth), kmrels.ojmap(outer_depth)) {
            (Some(chunk), Some(_)) => chunk.store().nitems(),
            _ => {
                return self.bailout(
                    ErrorCode::WrongCodeGeneration,
                    format!("Depth {} has no outer join map", outer_depth),
                )
            }
        };

        let group = self.group;
        let window = self.args.kgjoin.src_read_pos().dispatch(group.local_size());
        self.shared.src_read_pos = window;

        let results = group.map(|lane| {
            window
                .checked_add(lane)
                .filter(|&row| row < nitems && !kmrels.is_referenced(outer_depth, row))
                .map(|row| (None, RowRef::from_index(row)))
        });
        let count = match self.push_combinations(outer_depth, &results) {
            Some(count) => count,
            None => return Flow::Bailout,
        };

        if count > 0 && !self.has_room(outer_depth) {
            return Flow::Depth(outer_depth + 1);
        }

        if window >= nitems {
            self.shared.scan_done = true;
            return self.drain_after_scan(outer_depth);
        }
        Flow::Depth(outer_depth)
    }
}
