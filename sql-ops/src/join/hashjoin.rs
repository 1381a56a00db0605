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

use data_store::{HashItem, HashStore, RowRef};

/// The result of one hash join step of a lane.
#[derive(Clone, Copy, Debug, Default)]
struct ChainStep {
    output: Option<(Option<u32>, RowRef)>,
    /// The lane visited a hash item and continues its chain.
    in_progress: bool,
}

/// Returns the first item of the chain starting at `item` with the hash
/// value `hash`.
fn find_item(store: &HashStore, mut item: Option<u32>, hash: u32) -> Option<(u32, &HashItem)> {
    while let Some(index) = item {
        let khitem = store.item(index)?;
        if khitem.hash() == hash {
            return Some((index, khitem));
        }
        item = store.next_item(index);
    }
    None
}

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Joins the outer batch of `depth - 1` with the hash table of `depth`.
    ///
    /// Every lane owns one outer combination and visits one item of its hash
    /// chain per step. The batch is finished when all lanes reached the end
    /// of their chains.
    pub(crate) fn exec_hashjoin(&mut self, depth: u32) -> Flow {
        let d = depth as usize;
        let kmrels = self.args.kmrels;
        let (chunk, store) = match kmrels.chunk(depth) {
            Some(chunk) => match chunk.store() {
                InnerStore::Hash(store) => (chunk, store),
                _ => {
                    return self.bailout(
                        ErrorCode::WrongCodeGeneration,
                        format!("Hash join at depth {} requires a hash store", depth),
                    )
                }
            },
            None => {
                return self.bailout(
                    ErrorCode::WrongCodeGeneration,
                    format!("No inner relation at depth {}", depth),
                )
            }
        };

        let group = self.group;
        let local = group.local_size();
        let read = self.shared.read_pos[d - 1];
        let write = self.shared.write_pos[d - 1];

        let walking = {
            let lanes = &self.lanes;
            group.sync_or(|lane| lanes[lane as usize].l_state[d].is_walking())
        };
        if !walking {
            // All chains are exhausted. Moves to the next outer batch.
            self.shared.read_pos[d - 1] += local.min(write.saturating_sub(read));
            for lane in self.lanes.iter_mut() {
                lane.l_state[d] = LaneCursor::Start;
                lane.matched[d] = false;
            }
            return Flow::Depth(depth);
        } else if read >= write {
            if self.has_room(depth) {
                if let Flow::Depth(next) = self.rewind_stack(depth - 1) {
                    return Flow::Depth(next);
                }
            }
            return Flow::Depth(depth + 1);
        }

        let left_outer = chunk.is_left_outer();
        let funcs = self.args.funcs;
        let kds_src = self.args.kds_src;
        let pstack = &*self.pstack;
        let lanes = &mut self.lanes;

        let steps = group.map(|lane| {
            let state = &mut lanes[lane as usize];
            let cursor = state.l_state[d];
            let rd_index = read + lane;

            let outer = if rd_index < write && cursor.is_walking() {
                match pstack.record(depth - 1, rd_index) {
                    Some(refs) => Some(JoinRecord::new(kmrels, kds_src, refs)),
                    None => {
                        state.kcxt.set_error(
                            ErrorCode::OutOfRange,
                            format!("No outer combination {} at depth {}", rd_index, depth - 1),
                        );
                        return ChainStep::default();
                    }
                }
            } else {
                None
            };

            let khitem = match (cursor, outer.as_ref()) {
                (LaneCursor::Start, Some(outer)) => {
                    // Null keys and hash values of other partitions never match.
                    match funcs.hash_value(&mut state.kcxt, depth, outer) {
                        Some(hash) if store.covers(hash) => {
                            find_item(store, store.first_item(hash), hash)
                        }
                        _ => None,
                    }
                }
                (LaneCursor::InChain(item), Some(_)) => match store.item(item) {
                    Some(current) => find_item(store, store.next_item(item), current.hash()),
                    None => {
                        state.kcxt.set_error(
                            ErrorCode::DataStoreCorruption,
                            format!("Hash item {} is out of range", item),
                        );
                        return ChainStep::default();
                    }
                },
                _ => None,
            };

            let mut step = ChainStep::default();
            match (khitem, outer) {
                (Some((item, khitem)), Some(outer)) => {
                    let row = store.item_ref(item);
                    if funcs.join_quals(&mut state.kcxt, depth, &outer, &InnerRow::new(chunk.store(), row)) {
                        state.matched[d] = true;
                        kmrels.mark_referenced(depth, khitem.rowid());
                        step.output = Some((Some(rd_index), row));
                    }
                    step.in_progress = true;
                    state.l_state[d] = LaneCursor::InChain(item);
                }
                (_, Some(_)) => {
                    if left_outer && !state.matched[d] {
                        step.output = Some((Some(rd_index), RowRef::NULL));
                    }
                    state.l_state[d] = LaneCursor::Exhausted;
                }
                (_, None) => {
                    if cursor.is_walking() {
                        state.l_state[d] = LaneCursor::NoOuter;
                    }
                }
            }
            step
        });

        if self.error_vote() {
            return Flow::Bailout;
        }

        let results: Vec<_> = steps.iter().map(|s| s.output).collect();
        if self.push_combinations(depth, &results).is_none() {
            return Flow::Bailout;
        }
        self.shared.wip_count[d] = group.sync_count(|lane| steps[lane as usize].in_progress);

        if self.has_room(depth) {
            Flow::Depth(depth)
        } else {
            Flow::Depth(depth + 1)
        }
    }
}
