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
use crate::join::suspend::LaneCursor;

use data_store::{DataStore, ItemId, ItemPointer, RowRef, SourceTuple};

/// What a lane fetched from the source relation.
#[derive(Clone, Copy, Debug, Default)]
struct Fetched {
    /// The lane's line lies within its page. Only used by block stores.
    in_range: bool,
    /// The lane fetched a tuple.
    tuple: bool,
    /// The tuple passed the scan qualifiers.
    visible: Option<RowRef>,
}

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Loads the next batch of the source relation into depth 0.
    pub(crate) fn load_source(&mut self) -> Flow {
        let kds_src = match self.args.kds_src {
            Some(kds_src) => kds_src,
            None => {
                return self.bailout(
                    ErrorCode::WrongCodeGeneration,
                    "Source relation is missing",
                )
            }
        };

        let fetched = match kds_src {
            DataStore::Row(_) | DataStore::Column(_) => self.fetch_rows(kds_src),
            DataStore::Block(store) if store.part_width() > self.local_size() => {
                return self.bailout(
                    ErrorCode::InvalidValue,
                    format!(
                        "Partition width {} exceeds the group size {}",
                        store.part_width(),
                        self.local_size()
                    ),
                )
            }
            DataStore::Block(_) => self.fetch_block(kds_src),
        };

        if self.error_vote() {
            return Flow::Bailout;
        }

        let group = self.group;
        let ntuples = group.sync_count(|lane| fetched[lane as usize].tuple);
        if let DataStore::Block(_) = kds_src {
            self.shared.wip_count[0] = ntuples;
        }
        self.shared.stat_source_nitems += ntuples;

        // Compacts the visible rows at the end of depth 0.
        let results: Vec<_> = fetched
            .iter()
            .map(|f| f.visible.map(|row| (None, row)))
            .collect();
        let count = match self.push_combinations(0, &results) {
            Some(count) => count,
            None => return Flow::Bailout,
        };

        // A batch may fetch one row per lane, so the next batch might not fit.
        if count > 0 && !self.has_room(0) {
            return Flow::Depth(1);
        }

        // Fetches a new window of pages after the current one is exhausted.
        if let DataStore::Block(_) = kds_src {
            if !group.sync_or(|lane| fetched[lane as usize].in_range) {
                self.lanes
                    .iter_mut()
                    .for_each(|lane| lane.l_state[0] = LaneCursor::Start);
            }
        }

        if self.shared.src_read_pos >= kds_src.nitems() {
            self.shared.scan_done = true;
            return self.drain_after_scan(0);
        }
        Flow::Depth(0)
    }

    /// Decides where to continue after the scan of the base depth ended.
    ///
    /// Continues at the base depth's consumer if the base depth has unread
    /// combinations, else below the first deeper depth with pending
    /// combinations. Completes if all depths are drained.
    pub(crate) fn drain_after_scan(&self, base_depth: u32) -> Flow {
        let shared = &self.shared;
        if shared.write_pos[base_depth as usize] > 0 {
            return Flow::Depth(base_depth + 1);
        }
        (base_depth + 1..=self.nrels())
            .find(|&d| shared.read_pos[d as usize] < shared.write_pos[d as usize])
            .map_or(Flow::Complete, |d| Flow::Depth(d + 1))
    }

    /// Fetches one row per lane from a row or column store.
    fn fetch_rows(&mut self, kds_src: &DataStore) -> Vec<Fetched> {
        let group = self.group;
        let funcs = self.args.funcs;
        let lanes = &mut self.lanes;

        let window = self.args.kgjoin.src_read_pos().dispatch(group.local_size());
        self.shared.src_read_pos = window;

        group.map(|lane| {
            let kcxt = &mut lanes[lane as usize].kcxt;
            let row_index = match window.checked_add(lane) {
                Some(i) if i < kds_src.nitems() => i,
                _ => return Fetched::default(),
            };
            let tuple = match kds_src {
                DataStore::Row(store) => match store.tuple_at(row_index) {
                    Some(tuple) => SourceTuple::Heap {
                        t_self: None,
                        tuple,
                    },
                    None => return Fetched::default(),
                },
                DataStore::Column(store) => SourceTuple::Column { store, row_index },
                DataStore::Block(_) => return Fetched::default(),
            };

            let visible = funcs.scan_quals(kcxt, tuple);
            Fetched {
                in_range: true,
                tuple: true,
                visible: if visible {
                    Some(RowRef::from_index(row_index))
                } else {
                    None
                },
            }
        })
    }

    /// Fetches one line per lane from a block store.
    ///
    /// A window of pages is shared by the group. `part_width` lanes scan a
    /// page together, one line per lane and pass. The pass counter lives in
    /// `l_state[0]`; a new window is fetched on pass 0.
    fn fetch_block(&mut self, kds_src: &DataStore) -> Vec<Fetched> {
        let store = match kds_src {
            DataStore::Block(store) => store,
            _ => return vec![Fetched::default(); self.local_size() as usize],
        };

        let group = self.group;
        let funcs = self.args.funcs;
        let part_sz = store.part_width();
        let n_parts = group.local_size() / part_sz;
        let loops = self.lanes.first().map_or(0, |lane| lane.l_state[0].pass());

        if loops == 0 {
            self.shared.src_read_pos = self.args.kgjoin.src_read_pos().dispatch(n_parts);
        }
        let window = self.shared.src_read_pos;
        let lanes = &mut self.lanes;

        group.map(|lane| {
            let state = &mut lanes[lane as usize];
            state.l_state[0] = LaneCursor::Pass(loops + 1);

            if lane >= part_sz * n_parts {
                return Fetched::default();
            }
            let part_id = match window.checked_add(lane / part_sz) {
                Some(part_id) => part_id,
                None => return Fetched::default(),
            };
            let line_no = lane % part_sz + loops * part_sz + 1;
            let page = match store.page(part_id) {
                Some(page) if line_no <= page.max_offset_number() => page,
                _ => return Fetched::default(),
            };

            let tuple = match page.item(line_no) {
                Some(ItemId::Normal(tuple)) => tuple,
                _ => {
                    return Fetched {
                        in_range: true,
                        ..Fetched::default()
                    }
                }
            };
            let t_self = ItemPointer {
                block_nr: page.block_nr(),
                line_no: line_no as u16,
            };
            let visible = funcs.scan_quals(
                &mut state.kcxt,
                SourceTuple::Heap {
                    t_self: Some(t_self),
                    tuple,
                },
            );

            Fetched {
                in_range: true,
                tuple: true,
                visible: if visible {
                    Some(store.item_ref(part_id, line_no))
                } else {
                    None
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::join::group::Flow;
    use crate::join::suspend::LaneCursor;
    use crate::join::tests::TestKernel;
    use data_store::{BlockStore, Datum, ItemId, RowRef, Tuple};
    use std::error::Error;

    #[test]
    fn compacts_visible_rows() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 16)?;
        kernel.set_scan_filter(|t| {
            matches!(t.attr(0), Some(Datum::Int(k)) if *k == 2 || *k == 5 || *k == 7)
        });
        kernel.set_source_rows(10);

        kernel.with_frame(|frame| {
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert_eq!(frame.shared.write_pos[0], 3);
            assert_eq!(frame.shared.stat_source_nitems, 10);
            assert_eq!(frame.shared.stat_nitems[0], 3);
            assert!(!frame.shared.scan_done);

            let refs: Vec<RowRef> = (0..3)
                .filter_map(|i| frame.pstack.record(0, i).map(|r| r[0]))
                .collect();
            assert_eq!(
                refs,
                vec![
                    RowRef::from_index(2),
                    RowRef::from_index(5),
                    RowRef::from_index(7)
                ]
            );

            // The next window starts past the end.
            assert_eq!(frame.load_source(), Flow::Depth(1));
            assert!(frame.shared.scan_done);
            assert_eq!(frame.shared.write_pos[0], 3);
        });
        Ok(())
    }

    #[test]
    fn continues_until_source_exhausted() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.set_source_rows(6);

        kernel.with_frame(|frame| {
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert!(!frame.shared.scan_done);
            assert_eq!(frame.load_source(), Flow::Depth(1));
            assert!(frame.shared.scan_done);
            assert_eq!(frame.shared.write_pos[0], 6);
        });
        Ok(())
    }

    #[test]
    fn empty_source_completes() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.set_source_rows(0);

        kernel.with_frame(|frame| {
            assert_eq!(frame.load_source(), Flow::Complete);
            assert_eq!(frame.shared.stat_source_nitems, 0);
        });
        Ok(())
    }

    #[test]
    fn scans_pages_in_passes() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        let mut store = BlockStore::new(2, 4, 2)?;
        let tuple = |k: i64| ItemId::Normal(Tuple::new(vec![Datum::Int(k), Datum::Int(k)]));
        store.push_page(vec![tuple(0), ItemId::Dead, tuple(2)])?;
        store.push_page(vec![tuple(3)])?;
        kernel.set_source(store.into());

        kernel.with_frame(|frame| {
            // Pass 0 scans lines 1 and 2 of both pages.
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert_eq!(frame.shared.write_pos[0], 2);
            assert_eq!(frame.shared.wip_count[0], 2);
            assert_eq!(frame.lanes[0].l_state[0], LaneCursor::Pass(1));

            // Pass 1 scans line 3 of the first page.
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert_eq!(frame.shared.write_pos[0], 3);

            // Pass 2 finds no more lines and starts a new window.
            assert_eq!(frame.load_source(), Flow::Depth(0));
            assert_eq!(frame.lanes[0].l_state[0], LaneCursor::Start);

            assert_eq!(frame.load_source(), Flow::Depth(1));
            assert!(frame.shared.scan_done);
            assert_eq!(frame.shared.stat_source_nitems, 3);
        });
        Ok(())
    }
}
