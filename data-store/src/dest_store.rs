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


//! Destination buffers of join kernels.
//!
//! A destination store has a fixed byte length. Kernels reserve space for a
//! whole batch of rows at once via the lock-free `Reservation` word, and then
//! write each row at its reserved index. Rows are placed at the head of the
//! store and their payload is allocated from the tail, like in a heap page.

use crate::datum::{heap_tuple_size, maxalign, Datum};
use crate::error::{ErrorKind, Result};
use crossbeam_utils::Backoff;
use once_cell::sync::OnceCell;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed part of the destination store header.
const DEST_HEAD_BASE_LENGTH: usize = 64;

/// Per-column metadata in the destination store header.
const DEST_COLMETA_LENGTH: usize = 16;

/// Size of a row index entry of the row form.
const DEST_ROW_INDEX_LENGTH: usize = 4;

/// Size of the item header in front of each row form tuple.
pub const DEST_TUPITEM_HEADER_LENGTH: usize = 12;

/// Layout of a destination store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestFormat {
    /// Materialized tuples with a row index.
    Row,
    /// One value slot per column, with variable-length payload in the tail.
    Slot,
}

/// Reservation failed because the destination store is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoSpace {
    pub nrows: u32,
    pub nbytes: u32,
}

impl fmt::Display for NoSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "No space left for {} rows with {} bytes",
            self.nrows, self.nbytes
        )
    }
}

impl std::error::Error for NoSpace {}

/// Packed `{nitems, usage}` counter of a destination store.
///
/// Both halves are updated together by a single compare-and-swap, so that
/// concurrent reservations never observe a row count without its bytes.
#[derive(Debug, Default)]
pub struct Reservation {
    word: AtomicU64,
}

impl Reservation {
    pub fn new() -> Self {
        Self::default()
    }

    fn pack(nitems: u32, usage: u32) -> u64 {
        (usage as u64) << 32 | nitems as u64
    }

    fn unpack(word: u64) -> (u32, u32) {
        (word as u32, (word >> 32) as u32)
    }

    /// Returns the current `(nitems, usage)`.
    pub fn load(&self) -> (u32, u32) {
        Self::unpack(self.word.load(Ordering::Acquire))
    }

    /// Reserves `nrows` rows and `nbytes` bytes.
    ///
    /// `fits` decides whether the new totals fit into the store. On success,
    /// returns the totals before the reservation, i.e., the base row index
    /// and the base usage of the reserved region.
    pub fn reserve<F>(&self, nrows: u32, nbytes: u32, fits: F) -> std::result::Result<(u32, u32), NoSpace>
    where
        F: Fn(u64, u64) -> bool,
    {
        let backoff = Backoff::new();
        let mut current = self.word.load(Ordering::Acquire);

        loop {
            let (nitems, usage) = Self::unpack(current);
            let new_nitems = nitems as u64 + nrows as u64;
            let new_usage = usage as u64 + nbytes as u64;

            if new_nitems > u32::MAX as u64
                || new_usage > u32::MAX as u64
                || !fits(new_nitems, new_usage)
            {
                return Err(NoSpace { nrows, nbytes });
            }

            let new = Self::pack(new_nitems as u32, new_usage as u32);
            match self
                .word
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok((nitems, usage)),
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }
}

/// A materialized tuple of the row form.
#[derive(Clone, Debug, PartialEq)]
pub struct DestTuple {
    /// Byte offset of the tuple item from the start of the store.
    pub offset: u32,
    pub values: Vec<Datum>,
}

/// A value of the slot form.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotValue {
    Datum(Datum),
    /// Variable-length payload at byte offset `pos` of the store.
    Heap { pos: u32, len: u32 },
}

/// A row of the slot form.
///
/// The variable-length payload of a row is a contiguous region of the store's
/// tail starting at `heap_pos`.
#[derive(Clone, Debug, PartialEq)]
pub struct DestSlot {
    pub values: Vec<SlotValue>,
    pub heap_pos: u32,
    pub heap: Vec<u8>,
}

impl DestSlot {
    /// Resolves heap references into plain values.
    pub fn resolve(&self) -> Result<Vec<Datum>> {
        self.values.iter().map(|v| self.resolve_value(v)).collect()
    }

    fn resolve_value(&self, value: &SlotValue) -> Result<Datum> {
        match *value {
            SlotValue::Datum(ref d) => Ok(d.clone()),
            SlotValue::Heap { pos, len } => {
                let start = pos
                    .checked_sub(self.heap_pos)
                    .map(|s| s as usize)
                    .filter(|s| s + len as usize <= self.heap.len())
                    .ok_or_else(|| {
                        ErrorKind::Corruption(format!(
                            "Slot references {}..{} outside of its payload",
                            pos,
                            pos + len
                        ))
                    })?;
                Ok(Datum::Bytes(self.heap[start..start + len as usize].to_vec()))
            }
        }
    }
}

/// A row of a destination store.
#[derive(Clone, Debug, PartialEq)]
pub enum DestItem {
    Tuple(DestTuple),
    Slot(DestSlot),
}

/// The result buffer of a join kernel.
#[derive(Debug)]
pub struct DestStore {
    format: DestFormat,
    ncols: usize,
    length: usize,
    reservation: Reservation,
    items: Vec<OnceCell<DestItem>>,
}

impl DestStore {
    pub fn new(format: DestFormat, ncols: usize, length: usize) -> Result<Self> {
        let head_length = Self::head_length_of(ncols);
        if length <= head_length {
            Err(ErrorKind::InvalidArgument(format!(
                "Destination length {} does not exceed the header length {}",
                length, head_length
            )))?;
        }
        if length > u32::MAX as usize {
            Err(ErrorKind::IntegerOverflow(
                "Destination length exceeds 32 bits".to_string(),
            ))?;
        }

        let max_nitems = Self::max_nitems_of(format, ncols, length);
        let items = (0..max_nitems).map(|_| OnceCell::new()).collect();

        Ok(Self {
            format,
            ncols,
            length,
            reservation: Reservation::new(),
            items,
        })
    }

    fn head_length_of(ncols: usize) -> usize {
        maxalign(DEST_HEAD_BASE_LENGTH + ncols * DEST_COLMETA_LENGTH)
    }

    fn slot_row_length(ncols: usize) -> usize {
        maxalign((std::mem::size_of::<u64>() + std::mem::size_of::<bool>()) * ncols)
    }

    // Each row occupies at least its index entry plus one aligned word.
    fn max_nitems_of(format: DestFormat, ncols: usize, length: usize) -> usize {
        let body = length - Self::head_length_of(ncols);
        match format {
            DestFormat::Row => body / (DEST_ROW_INDEX_LENGTH + maxalign(DEST_TUPITEM_HEADER_LENGTH)),
            DestFormat::Slot => body / Self::slot_row_length(ncols).max(1),
        }
    }

    pub fn format(&self) -> DestFormat {
        self.format
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn head_length(&self) -> usize {
        Self::head_length_of(self.ncols)
    }

    pub fn max_nitems(&self) -> usize {
        self.items.len()
    }

    /// Bytes consumed by `nitems` rows with `usage` payload bytes.
    pub fn consumed_length(&self, nitems: u64, usage: u64) -> u64 {
        let index = match self.format {
            DestFormat::Row => maxalign(DEST_ROW_INDEX_LENGTH * nitems as usize) as u64,
            DestFormat::Slot => Self::slot_row_length(self.ncols) as u64 * nitems,
        };
        self.head_length() as u64 + index + usage
    }

    /// The payload bytes that a row form tuple with `values` occupies.
    pub fn tuple_length(values: &[Datum]) -> usize {
        maxalign(DEST_TUPITEM_HEADER_LENGTH + heap_tuple_size(values))
    }

    /// Reserves space for `nrows` rows with `nbytes` payload bytes.
    ///
    /// Returns the base row index and base usage of the reserved region.
    pub fn reserve(&self, nrows: u32, nbytes: u32) -> std::result::Result<(u32, u32), NoSpace> {
        let max_nitems = self.items.len() as u64;
        let length = self.length as u64;
        self.reservation.reserve(nrows, nbytes, |nitems, usage| {
            nitems <= max_nitems && self.consumed_length(nitems, usage) <= length
        })
    }

    /// Converts a usage offset into a byte offset from the store's start.
    ///
    /// Payload grows from the end of the store towards its head.
    pub fn offset_from_usage(&self, usage: u32) -> u32 {
        (self.length as u32).saturating_sub(usage)
    }

    /// Writes a row into a reserved index.
    pub fn write(&self, index: u32, item: DestItem) -> Result<()> {
        let (nitems, _) = self.reservation.load();
        if index >= nitems {
            Err(ErrorKind::OutOfRange(format!(
                "Row index {} is not reserved",
                index
            )))?;
        }

        let matches_format = match (&item, self.format) {
            (DestItem::Tuple(_), DestFormat::Row) | (DestItem::Slot(_), DestFormat::Slot) => true,
            _ => false,
        };
        if !matches_format {
            Err(ErrorKind::InvalidArgument(format!(
                "Item does not match the {:?} destination format",
                self.format
            )))?;
        }

        self.items
            .get(index as usize)
            .ok_or_else(|| ErrorKind::OutOfRange(format!("Row index {} is out of bounds", index)))?
            .set(item)
            .map_err(|_| ErrorKind::Corruption(format!("Row {} is written twice", index)))?;

        Ok(())
    }

    pub fn nitems(&self) -> u32 {
        self.reservation.load().0
    }

    pub fn usage(&self) -> u32 {
        self.reservation.load().1
    }

    /// Returns the row at `index`, if it is written.
    pub fn item(&self, index: u32) -> Option<&DestItem> {
        self.items.get(index as usize).and_then(OnceCell::get)
    }

    /// Iterates over the written rows.
    pub fn items(&self) -> impl Iterator<Item = &DestItem> + '_ {
        self.items[..self.nitems() as usize]
            .iter()
            .filter_map(OnceCell::get)
    }

    /// Returns all rows as plain values, resolving slot form payload.
    pub fn rows(&self) -> Result<Vec<Vec<Datum>>> {
        self.items()
            .map(|item| match item {
                DestItem::Tuple(t) => Ok(t.values.clone()),
                DestItem::Slot(s) => s.resolve(),
            })
            .collect()
    }
}
