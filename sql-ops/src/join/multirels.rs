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


use crate::error::{ErrorKind, Result};
use crate::join::control::GPUJOIN_MAX_DEPTH;

use bitflags::bitflags;
use data_store::{Datum, HashStore, RowRef, RowStore, TupleAccess, CRC32_TABLE};

use std::sync::atomic::{AtomicBool, Ordering};

bitflags! {
/// Join properties of an inner relation.
pub struct ChunkFlags: u8 {
    /// Joined by nested loop instead of hash join.
    const NESTLOOP = 0x1;

    /// Emits a null-extended combination for outer combinations without a
    /// match, i.e., `LEFT JOIN` or `FULL JOIN`.
    const LEFT_OUTER = 0x2;

    /// Tracks matched inner rows in an outer join map, i.e., `RIGHT JOIN` or
    /// `FULL JOIN`.
    const RIGHT_OUTER = 0x4;
}
}

/// The SQL join type of an inner relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl From<JoinType> for ChunkFlags {
    fn from(join_type: JoinType) -> Self {
        match join_type {
            JoinType::Inner => ChunkFlags::empty(),
            JoinType::Left => ChunkFlags::LEFT_OUTER,
            JoinType::Right => ChunkFlags::RIGHT_OUTER,
            JoinType::Full => ChunkFlags::LEFT_OUTER | ChunkFlags::RIGHT_OUTER,
        }
    }
}

/// Storage of an inner relation.
///
/// Nested-loop joins scan a row store. Hash joins probe a hash store.
#[derive(Clone, Debug)]
pub enum InnerStore {
    Row(RowStore),
    Hash(HashStore),
}

impl InnerStore {
    pub fn nitems(&self) -> u32 {
        match self {
            InnerStore::Row(s) => s.nitems(),
            InnerStore::Hash(s) => s.nitems(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            InnerStore::Row(s) => s.ncols(),
            InnerStore::Hash(s) => s.ncols(),
        }
    }
}

impl TupleAccess for InnerStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        match self {
            InnerStore::Row(s) => s.attr(row, col),
            InnerStore::Hash(s) => s.attr(row, col),
        }
    }
}

/// An inner relation with its join properties.
#[derive(Debug)]
pub struct InnerChunk {
    store: InnerStore,
    flags: ChunkFlags,
    ojmap_offset: usize,
}

impl InnerChunk {
    pub fn store(&self) -> &InnerStore {
        &self.store
    }

    pub fn flags(&self) -> ChunkFlags {
        self.flags
    }

    pub fn is_nestloop(&self) -> bool {
        self.flags.contains(ChunkFlags::NESTLOOP)
    }

    pub fn is_left_outer(&self) -> bool {
        self.flags.contains(ChunkFlags::LEFT_OUTER)
    }

    pub fn is_right_outer(&self) -> bool {
        self.flags.contains(ChunkFlags::RIGHT_OUTER)
    }
}

/// The inner relations of a multi-relation join.
///
/// Chunk `i` serves join depth `i + 1`. The catalog is immutable during
/// execution, except for the outer join maps.
///
/// Each device has its own set of outer join maps, plus one set for a CPU
/// fallback. A device only marks its own maps; the maps are merged by
/// `colocate_outer_join_map` before the right outer join.
#[derive(Debug)]
pub struct MultiRels {
    crc32_table: [u32; 256],
    cuda_dindex: u32,
    num_devices: u32,
    chunks: Vec<InnerChunk>,
    ojmaps_length: usize,
    ojmaps: Vec<AtomicBool>,
}

impl MultiRels {
    pub fn crc32_table(&self) -> &[u32; 256] {
        &self.crc32_table
    }

    pub fn nrels(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn cuda_dindex(&self) -> u32 {
        self.cuda_dindex
    }

    pub fn num_devices(&self) -> u32 {
        self.num_devices
    }

    /// Number of outer join map entries per device.
    pub fn ojmaps_length(&self) -> usize {
        self.ojmaps_length
    }

    /// Returns the inner relation of `depth`, counting from 1.
    pub fn chunk(&self, depth: u32) -> Option<&InnerChunk> {
        depth
            .checked_sub(1)
            .and_then(|i| self.chunks.get(i as usize))
    }

    pub fn chunks(&self) -> &[InnerChunk] {
        &self.chunks
    }

    /// Depths of all right outer relations, in ascending order.
    pub fn right_outer_depths(&self) -> Vec<u32> {
        (1..)
            .zip(self.chunks.iter())
            .filter(|(_, c)| c.is_right_outer())
            .map(|(depth, _)| depth)
            .collect()
    }

    /// The outer join map of `depth` that belongs to `device`.
    ///
    /// Device `num_devices` is the CPU fallback.
    pub fn device_ojmap(&self, device: u32, depth: u32) -> Option<&[AtomicBool]> {
        if device > self.num_devices {
            return None;
        }
        let chunk = self.chunk(depth).filter(|c| c.is_right_outer())?;
        let begin = device as usize * self.ojmaps_length + chunk.ojmap_offset;
        let end = begin + chunk.store.nitems() as usize;
        self.ojmaps.get(begin..end)
    }

    /// The outer join map of `depth` that belongs to the current device.
    pub fn ojmap(&self, depth: u32) -> Option<&[AtomicBool]> {
        self.device_ojmap(self.cuda_dindex, depth)
    }

    /// Marks the inner row `rowid` of `depth` as referenced.
    ///
    /// Does nothing if `depth` is not a right outer relation. Marking is
    /// idempotent and safe under concurrent marking.
    pub fn mark_referenced(&self, depth: u32, rowid: u32) {
        if let Some(flag) = self.ojmap(depth).and_then(|m| m.get(rowid as usize)) {
            if !flag.load(Ordering::Relaxed) {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    pub fn is_referenced(&self, depth: u32, rowid: u32) -> bool {
        self.ojmap(depth)
            .and_then(|m| m.get(rowid as usize))
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Merges entry `index` of all devices' outer join maps into the current
    /// device's map.
    pub(crate) fn colocate_entry(&self, index: usize) {
        let merged = (0..=self.num_devices as usize)
            .filter_map(|device| self.ojmaps.get(device * self.ojmaps_length + index))
            .any(|flag| flag.load(Ordering::Relaxed));

        if merged {
            if let Some(flag) = self
                .ojmaps
                .get(self.cuda_dindex as usize * self.ojmaps_length + index)
            {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Clears the outer join maps of all devices.
    pub fn clear_ojmaps(&mut self) {
        self.ojmaps
            .iter_mut()
            .for_each(|flag| *flag.get_mut() = false);
    }
}

/// Builds the inner relation catalog.
#[derive(Debug)]
pub struct MultiRelsBuilder {
    cuda_dindex: u32,
    num_devices: u32,
    chunks: Vec<(InnerStore, ChunkFlags)>,
}

impl MultiRelsBuilder {
    pub fn new() -> Self {
        Self {
            cuda_dindex: 0,
            num_devices: 1,
            chunks: Vec::new(),
        }
    }

    /// Sets the index of the executing device and the total device count.
    pub fn device(mut self, cuda_dindex: u32, num_devices: u32) -> Self {
        self.cuda_dindex = cuda_dindex;
        self.num_devices = num_devices;
        self
    }

    /// Appends a relation joined by nested loop.
    pub fn nestloop(mut self, store: RowStore, join_type: JoinType) -> Self {
        self.chunks.push((
            InnerStore::Row(store),
            ChunkFlags::from(join_type) | ChunkFlags::NESTLOOP,
        ));
        self
    }

    /// Appends a relation joined by hash join.
    pub fn hashjoin(mut self, store: HashStore, join_type: JoinType) -> Self {
        self.chunks
            .push((InnerStore::Hash(store), ChunkFlags::from(join_type)));
        self
    }

    pub fn build(self) -> Result<MultiRels> {
        if self.chunks.is_empty() {
            Err(ErrorKind::InvalidArgument(
                "At least one inner relation is required".to_string(),
            ))?;
        }
        if self.chunks.len() > GPUJOIN_MAX_DEPTH as usize {
            Err(ErrorKind::InvalidArgument(format!(
                "At most {} inner relations are supported",
                GPUJOIN_MAX_DEPTH
            )))?;
        }
        if self.cuda_dindex >= self.num_devices {
            Err(ErrorKind::InvalidArgument(format!(
                "Device index {} is out of range for {} devices",
                self.cuda_dindex, self.num_devices
            )))?;
        }

        let mut ojmaps_length = 0;
        let chunks: Vec<InnerChunk> = self
            .chunks
            .into_iter()
            .map(|(store, flags)| {
                let ojmap_offset = ojmaps_length;
                if flags.contains(ChunkFlags::RIGHT_OUTER) {
                    ojmaps_length += store.nitems() as usize;
                }
                InnerChunk {
                    store,
                    flags,
                    ojmap_offset,
                }
            })
            .collect();

        let nmaps = (self.num_devices as usize + 1) * ojmaps_length;
        let ojmaps = (0..nmaps).map(|_| AtomicBool::new(false)).collect();

        Ok(MultiRels {
            crc32_table: *CRC32_TABLE,
            cuda_dindex: self.cuda_dindex,
            num_devices: self.num_devices,
            chunks,
            ojmaps_length,
            ojmaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_store::{HashStoreBuilder, Tuple};
    use std::error::Error;

    fn row_store(n: i64) -> std::result::Result<RowStore, Box<dyn Error>> {
        Ok(RowStore::from_tuples(
            1,
            (0..n).map(|i| Tuple::new(vec![Datum::Int(i)])).collect(),
        )?)
    }

    #[test]
    fn chunk_order_is_depth_order() -> std::result::Result<(), Box<dyn Error>> {
        let hash = HashStoreBuilder::new(1).build()?;
        let rels = MultiRelsBuilder::new()
            .nestloop(row_store(3)?, JoinType::Left)
            .hashjoin(hash, JoinType::Inner)
            .build()?;

        assert_eq!(rels.nrels(), 2);
        assert!(rels.chunk(1).map_or(false, InnerChunk::is_nestloop));
        assert!(rels.chunk(1).map_or(false, InnerChunk::is_left_outer));
        assert!(!rels.chunk(2).map_or(true, InnerChunk::is_nestloop));
        assert!(rels.chunk(0).is_none());
        assert!(rels.chunk(3).is_none());
        Ok(())
    }

    #[test]
    fn ojmaps_only_for_right_outer() -> std::result::Result<(), Box<dyn Error>> {
        let rels = MultiRelsBuilder::new()
            .nestloop(row_store(3)?, JoinType::Inner)
            .nestloop(row_store(5)?, JoinType::Full)
            .build()?;

        assert_eq!(rels.ojmaps_length(), 5);
        assert!(rels.ojmap(1).is_none());
        assert_eq!(rels.ojmap(2).map(<[AtomicBool]>::len), Some(5));
        assert_eq!(rels.right_outer_depths(), vec![2]);
        Ok(())
    }

    #[test]
    fn marking_is_idempotent() -> std::result::Result<(), Box<dyn Error>> {
        let rels = MultiRelsBuilder::new()
            .nestloop(row_store(4)?, JoinType::Right)
            .build()?;

        rels.mark_referenced(1, 2);
        rels.mark_referenced(1, 2);
        assert!(rels.is_referenced(1, 2));
        assert!(!rels.is_referenced(1, 1));
        Ok(())
    }

    #[test]
    fn colocate_merges_all_devices() -> std::result::Result<(), Box<dyn Error>> {
        let rels = MultiRelsBuilder::new()
            .device(1, 2)
            .nestloop(row_store(4)?, JoinType::Right)
            .build()?;

        let set = |device, row: usize| {
            if let Some(map) = rels.device_ojmap(device, 1) {
                map[row].store(true, Ordering::Relaxed);
            }
        };
        set(0, 0);
        set(2, 3);

        (0..rels.ojmaps_length()).for_each(|i| rels.colocate_entry(i));

        assert!(rels.is_referenced(1, 0));
        assert!(!rels.is_referenced(1, 1));
        assert!(!rels.is_referenced(1, 2));
        assert!(rels.is_referenced(1, 3));
        Ok(())
    }

    #[test]
    fn rejects_invalid_device() -> std::result::Result<(), Box<dyn Error>> {
        let result = MultiRelsBuilder::new()
            .device(2, 2)
            .nestloop(row_store(1)?, JoinType::Inner)
            .build();
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn concurrent_marking_keeps_all_bits() -> std::result::Result<(), Box<dyn Error>> {
        use rayon::prelude::*;

        let rels = MultiRelsBuilder::new()
            .nestloop(row_store(64)?, JoinType::Right)
            .build()?;

        (0..64_u32 * 16)
            .into_par_iter()
            .filter(|i| i % 64 % 3 != 0)
            .for_each(|i| rels.mark_referenced(1, i % 64));

        (0..64).for_each(|row| assert_eq!(rels.is_referenced(1, row), row % 3 != 0));
        Ok(())
    }
}
