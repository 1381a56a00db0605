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


use crate::data_store::TupleAccess;
use crate::datum::{Datum, RowRef, Tuple};
use crate::error::{ErrorKind, Result};

/// An entry of a hash store.
#[derive(Clone, Debug)]
pub struct HashItem {
    hash: u32,
    rowid: u32,
    next: Option<u32>,
    tuple: Tuple,
}

impl HashItem {
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Position of the row within the inner relation. Indexes the outer join
    /// map.
    pub fn rowid(&self) -> u32 {
        self.rowid
    }

    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }
}

/// A hash table for the inner relation of a hash join.
///
/// Items are chained per hash slot, i.e., bucket chaining. Chains may
/// contain items with different hash values that map to the same slot; the
/// prober must compare the full hash value.
///
/// A hash store holds one partition of the inner relation. Its partition is
/// the hash value range `hash_min..=hash_max`. Probes outside of this range
/// cannot match.
#[derive(Clone, Debug)]
pub struct HashStore {
    ncols: usize,
    hash_min: u32,
    hash_max: u32,
    slots: Vec<Option<u32>>,
    items: Vec<HashItem>,
}

/// Builds a `HashStore`.
#[derive(Clone, Debug)]
pub struct HashStoreBuilder {
    ncols: usize,
    nslots: u32,
    hash_min: u32,
    hash_max: u32,
    entries: Vec<(u32, Tuple)>,
}

impl HashStoreBuilder {
    pub fn new(ncols: usize) -> Self {
        Self {
            ncols,
            nslots: 0,
            hash_min: 0,
            hash_max: u32::MAX,
            entries: Vec::new(),
        }
    }

    /// Sets the number of hash slots. By default, the number of slots equals
    /// the number of items.
    pub fn nslots(mut self, nslots: u32) -> Self {
        self.nslots = nslots;
        self
    }

    /// Sets the hash value range of this partition.
    pub fn hash_range(mut self, hash_min: u32, hash_max: u32) -> Self {
        self.hash_min = hash_min;
        self.hash_max = hash_max;
        self
    }

    pub fn insert(mut self, hash: u32, tuple: Tuple) -> Self {
        self.entries.push((hash, tuple));
        self
    }

    pub fn extend<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (u32, Tuple)>,
    {
        self.entries.extend(entries);
        self
    }

    pub fn build(self) -> Result<HashStore> {
        if self.hash_min > self.hash_max {
            Err(ErrorKind::InvalidArgument(
                "Hash range is empty".to_string(),
            ))?;
        }
        if self.entries.len() >= u32::MAX as usize {
            Err(ErrorKind::IntegerOverflow(
                "Hash store has too many items".to_string(),
            ))?;
        }
        if let Some((_, t)) = self.entries.iter().find(|(_, t)| t.natts() != self.ncols) {
            Err(ErrorKind::InvalidArgument(format!(
                "Tuple has {} attributes, but the store expects {}",
                t.natts(),
                self.ncols
            )))?;
        }
        if let Some((h, _)) = self
            .entries
            .iter()
            .find(|(h, _)| *h < self.hash_min || *h > self.hash_max)
        {
            Err(ErrorKind::OutOfRange(format!(
                "Hash value {} is outside of the partition {}..={}",
                h, self.hash_min, self.hash_max
            )))?;
        }

        let nslots = if self.nslots > 0 {
            self.nslots
        } else {
            (self.entries.len() as u32).max(1)
        };
        let mut slots = vec![None; nslots as usize];

        // Items are prepended to their chain, like concurrent inserts on the
        // device would do.
        let items = self
            .entries
            .into_iter()
            .enumerate()
            .map(|(rowid, (hash, tuple))| {
                let slot = &mut slots[(hash % nslots) as usize];
                let next = slot.replace(rowid as u32);
                HashItem {
                    hash,
                    rowid: rowid as u32,
                    next,
                    tuple,
                }
            })
            .collect();

        Ok(HashStore {
            ncols: self.ncols,
            hash_min: self.hash_min,
            hash_max: self.hash_max,
            slots,
            items,
        })
    }
}

impl HashStore {
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nitems(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn nslots(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn hash_min(&self) -> u32 {
        self.hash_min
    }

    pub fn hash_max(&self) -> u32 {
        self.hash_max
    }

    /// True if `hash` falls into this partition.
    pub fn covers(&self, hash: u32) -> bool {
        hash >= self.hash_min && hash <= self.hash_max
    }

    /// The first item of the chain that `hash` maps to.
    pub fn first_item(&self, hash: u32) -> Option<u32> {
        self.slots[(hash % self.nslots()) as usize]
    }

    /// The item following `item` in its chain.
    pub fn next_item(&self, item: u32) -> Option<u32> {
        self.items.get(item as usize).and_then(|i| i.next)
    }

    pub fn item(&self, item: u32) -> Option<&HashItem> {
        self.items.get(item as usize)
    }

    /// The `RowRef` that join combinations store for `item`.
    pub fn item_ref(&self, item: u32) -> RowRef {
        RowRef::from_index(item)
    }

    pub fn tuple(&self, row: RowRef) -> Option<&Tuple> {
        row.index()
            .and_then(|i| self.items.get(i as usize))
            .map(|i| &i.tuple)
    }
}

impl TupleAccess for HashStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        self.tuple(row).and_then(|t| t.attr(col))
    }
}
