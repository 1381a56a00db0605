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
use crate::join::funcs::{GpuJoinFuncs, JoinRecord, ProjectionBuf};
use crate::join::group::{Flow, GroupFrame};

use data_store::{maxalign, DestFormat, DestItem, DestSlot, DestStore, DestTuple};

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Writes the next batch of fully joined combinations into the
    /// destination store.
    ///
    /// Space is reserved once per group for the whole batch. If the store is
    /// full, the group saves its context and suspends without writing
    /// anything.
    pub(crate) fn projection(&mut self) -> Flow {
        let nrels = self.nrels();
        let n = nrels as usize;
        let read = self.shared.read_pos[n];
        let write = self.shared.write_pos[n];
        if read >= write {
            return self.rewind_stack(nrels);
        }

        let group = self.group;
        let nvalids = (write - read).min(group.local_size());
        let kds_dst = self.args.kds_dst;
        let kmrels = self.args.kmrels;
        let kds_src = self.args.kds_src;
        let funcs = self.args.funcs;
        let pstack = &*self.pstack;
        let lanes = &mut self.lanes;

        // Step 1: computes the output values and their length.
        let projected: Vec<Option<(ProjectionBuf, u32)>> = group.map(|lane| {
            if lane >= nvalids {
                return None;
            }
            let kcxt = &mut lanes[lane as usize].kcxt;
            let refs = match pstack.record(nrels, read + lane) {
                Some(refs) => refs,
                None => {
                    kcxt.set_error(
                        ErrorCode::OutOfRange,
                        format!("No joined combination {}", read + lane),
                    );
                    return None;
                }
            };

            let mut buf = ProjectionBuf::new();
            funcs.projection(kcxt, &JoinRecord::new(kmrels, kds_src, refs), &mut buf);
            if buf.values().len() != kds_dst.ncols() {
                kcxt.set_error(
                    ErrorCode::WrongCodeGeneration,
                    format!(
                        "Projection returned {} columns, but the destination has {}",
                        buf.values().len(),
                        kds_dst.ncols()
                    ),
                );
                return None;
            }

            let required = match kds_dst.format() {
                DestFormat::Row => DestStore::tuple_length(&buf.to_datums()),
                DestFormat::Slot => maxalign(buf.extra_len()),
            };
            Some((buf, required as u32))
        });

        if self.error_vote() {
            return Flow::Bailout;
        }

        // Step 2: reserves rows and payload for the whole batch.
        let required: Vec<u32> = projected
            .iter()
            .map(|p| p.as_ref().map_or(0, |(_, required)| *required))
            .collect();
        let (offsets, total) = group.stairlike_sum(&required);
        match kds_dst.reserve(nvalids, total) {
            Ok((base_index, base_usage)) => {
                self.shared.dst_base_index = base_index;
                self.shared.dst_base_usage = base_usage;
            }
            Err(no_space) => {
                if let Some(lane) = self.lanes.first_mut() {
                    lane.kcxt.set_error(ErrorCode::Suspend, no_space.to_string());
                }
                self.suspend_context(nrels + 1);
                return Flow::Suspend;
            }
        }

        // Step 3: writes the rows at their reserved positions.
        let base_index = self.shared.dst_base_index;
        let base_usage = self.shared.dst_base_usage;
        let lanes = &mut self.lanes;
        group.step(|lane| {
            let (buf, required) = match &projected[lane as usize] {
                Some(p) => p,
                None => return,
            };
            let kcxt = &mut lanes[lane as usize].kcxt;
            let offset = kds_dst.offset_from_usage(base_usage + offsets[lane as usize] + required);

            let item = match kds_dst.format() {
                DestFormat::Row => DestItem::Tuple(DestTuple {
                    offset,
                    values: buf.to_datums(),
                }),
                DestFormat::Slot => {
                    let mut values = buf.to_slot_values(offset);
                    funcs.slot_projection(kcxt, &mut values);
                    DestItem::Slot(DestSlot {
                        values,
                        heap_pos: offset,
                        heap: buf.extra().to_vec(),
                    })
                }
            };
            if let Err(e) = kds_dst.write(base_index + lane, item) {
                kcxt.set_error(ErrorCode::DataStoreCorruption, e.to_string());
            }
        });

        if self.error_vote() {
            return Flow::Bailout;
        }

        self.shared.read_pos[n] += nvalids;
        Flow::Depth(nrels + 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::join::control::ErrorCode;
    use crate::join::group::Flow;
    use crate::join::suspend::SuspendSlot;
    use crate::join::tests::TestKernel;
    use data_store::{Datum, DestFormat, DestStore};
    use std::error::Error;

    #[test]
    fn writes_one_batch() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.with_frame(|frame| {
            frame.seed(0, &[1]);
            frame.exec_nestloop(1);
            assert_eq!(frame.shared.write_pos[1], 1);

            assert_eq!(frame.projection(), Flow::Depth(2));
            assert_eq!(frame.shared.read_pos[1], 1);
        });

        let rows = kernel.dst.rows()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Datum::Int(1));
        Ok(())
    }

    #[test]
    fn suspends_when_full() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        let ncols = kernel.dst.ncols();
        kernel.dst = DestStore::new(DestFormat::Row, ncols, 128)?;

        kernel.with_frame(|frame| {
            frame.seed(0, &[1, 2, 3, 4]);
            while frame.shared.read_pos[0] == 0 {
                frame.exec_nestloop(1);
            }
            assert_eq!(frame.shared.write_pos[1], 4);

            assert_eq!(frame.projection(), Flow::Suspend);
            assert_eq!(frame.lanes[0].kcxt.errcode(), ErrorCode::Suspend);
            assert_eq!(frame.shared.read_pos[1], 0);
            match &*frame.suspend {
                SuspendSlot::Suspended(block) => {
                    assert_eq!(block.depth, 2);
                    assert_eq!(block.write_pos[1], 4);
                }
                other => panic!("Expected a suspended slot, got {:?}", other),
            }
        });

        assert_eq!(kernel.dst.nitems(), 0);
        Ok(())
    }

    #[test]
    fn slot_form_relocates_payload() -> Result<(), Box<dyn Error>> {
        let mut kernel = TestKernel::nestloop(1, 4)?;
        kernel.project_payload();
        let ncols = kernel.dst.ncols();
        kernel.dst = DestStore::new(DestFormat::Slot, ncols, 4096)?;

        kernel.with_frame(|frame| {
            frame.seed(0, &[6]);
            while frame.shared.read_pos[0] == 0 {
                frame.exec_nestloop(1);
            }
            assert_eq!(frame.projection(), Flow::Depth(2));
        });

        let rows = kernel.dst.rows()?;
        assert_eq!(rows, vec![vec![Datum::Int(6), Datum::Bytes(b"payload-6".to_vec())]]);
        Ok(())
    }
}
