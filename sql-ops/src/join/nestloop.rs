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
use crate::join::funcs::{GpuJoinFuncs, InnerRow, JoinRecord};
use crate::join::group::{Flow, GroupFrame};
use crate::join::multirels::InnerStore;
use crate::join::suspend::LaneCursor;

use data_store::RowRef;

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Joins the outer batch of `depth - 1` with the inner relation of
    /// `depth` by nested loop.
    ///
    /// The batch of `x_unitsz` outer combinations and the inner relation span
    /// a grid. Lane `i` evaluates outer combination `i % x_unitsz` against
    /// inner row `i / x_unitsz + y_unitsz * pass`, so each pass covers
    /// `y_unitsz` inner rows.
    pub(crate) fn exec_nestloop(&mut self, depth: u32) -> Flow {
        let d = depth as usize;
        let kmrels = self.args.kmrels;
        let chunk = match kmrels.chunk(depth) {
            Some(chunk) if matches!(chunk.store(), InnerStore::Row(_)) => chunk,
            _ => {
                return self.bailout(
                    ErrorCode::WrongCodeGeneration,
                    format!("Nested loop at depth {} requires a row store", depth),
                )
            }
        };

        let read = self.shared.read_pos[d - 1];
        let write = self.shared.write_pos[d - 1];
        if read >= write {
            // Lets the shallower depths supply more input while this depth
            // has room, else drains this depth first.
            if self.has_room(depth) {
                if let Flow::Depth(next) = self.rewind_stack(depth - 1) {
                    return Flow::Depth(next);
                }
            }
            return Flow::Depth(depth + 1);
        }

        let group = self.group;
        let local = group.local_size();
        let x_unitsz = (write - read).min(local);
        let y_unitsz = local / x_unitsz;
        let pass = self.lanes.first().map_or(0, |lane| lane.l_state[d].pass());
        let nitems = chunk.store().nitems() as u64;

        if y_unitsz as u64 * pass as u64 >= nitems {
            // Emits one null-extended combination per outer combination
            // without any match.
            if chunk.is_left_outer() {
                let mut matched_sync = vec![false; x_unitsz as usize];
                for (lane, state) in (0..local).zip(self.lanes.iter()) {
                    if state.matched[d] {
                        matched_sync[(lane % x_unitsz) as usize] = true;
                    }
                }

                if group.sync_or(|lane| !matched_sync[(lane % x_unitsz) as usize]) {
                    let results = group.map(|lane| {
                        let x_index = lane % x_unitsz;
                        if lane / x_unitsz == 0 && !matched_sync[x_index as usize] {
                            Some((Some(read + x_index), RowRef::NULL))
                        } else {
                            None
                        }
                    });
                    self.lanes
                        .iter_mut()
                        .for_each(|lane| lane.matched[d] = true);
                    return self.write_nestloop(depth, &results);
                }
            }

            for lane in self.lanes.iter_mut() {
                lane.l_state[d] = LaneCursor::Start;
                lane.matched[d] = false;
            }
            self.shared.wip_count[d] = 0;
            self.shared.read_pos[d - 1] += x_unitsz;
            return Flow::Depth(depth);
        }

        let funcs = self.args.funcs;
        let kds_src = self.args.kds_src;
        let pstack = &*self.pstack;
        let lanes = &mut self.lanes;

        let results = group.map(|lane| {
            let state = &mut lanes[lane as usize];
            state.l_state[d] = LaneCursor::Pass(pass + 1);

            let x_index = read + lane % x_unitsz;
            let y_index = lane / x_unitsz;
            if y_index >= y_unitsz {
                return None;
            }
            let y_index = y_index as u64 + y_unitsz as u64 * pass as u64;
            if y_index >= nitems {
                return None;
            }

            let refs = match pstack.record(depth - 1, x_index) {
                Some(refs) => refs,
                None => {
                    state.kcxt.set_error(
                        ErrorCode::OutOfRange,
                        format!("No outer combination {} at depth {}", x_index, depth - 1),
                    );
                    return None;
                }
            };
            let outer = JoinRecord::new(kmrels, kds_src, refs);
            let row = RowRef::from_index(y_index as u32);
            if funcs.join_quals(&mut state.kcxt, depth, &outer, &InnerRow::new(chunk.store(), row)) {
                state.matched[d] = true;
                kmrels.mark_referenced(depth, y_index as u32);
                Some((Some(x_index), row))
            } else {
                None
            }
        });

        if self.error_vote() {
            return Flow::Bailout;
        }
        self.write_nestloop(depth, &results)
    }

    fn write_nestloop(&mut self, depth: u32, results: &[Option<(Option<u32>, RowRef)>]) -> Flow {
        if self.push_combinations(depth, results).is_none() {
            return Flow::Bailout;
        }
        self.shared.wip_count[depth as usize] = self.local_size();

        // Runs another pass if the output of this depth has room for it.
        if self.has_room(depth) {
            Flow::Depth(depth)
        } else {
            Flow::Depth(depth + 1)
        }
    }
}
