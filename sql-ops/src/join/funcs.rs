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


//! The interface to the per-query join functions.

use crate::join::control::KernContext;
use crate::join::multirels::{InnerStore, MultiRels};

use data_store::{maxalign, Crc32, DataStore, Datum, HashStore, HashStoreBuilder, RowRef, SlotValue, SourceTuple, Tuple, TupleAccess, CRC32_TABLE};

static NULL_DATUM: Datum = Datum::Null;

/// The functions that a query supplies to the join engine.
///
/// Functions report evaluation errors through the kernel context. An error
/// aborts the join after the current step.
pub trait GpuJoinFuncs: Sync {
    /// Qualifiers of the source relation scan.
    fn scan_quals(&self, _kcxt: &mut KernContext<'_>, _tuple: SourceTuple<'_>) -> bool {
        true
    }

    /// Join qualifiers of `depth`, evaluated on an outer combination and an
    /// inner row.
    fn join_quals(
        &self,
        kcxt: &mut KernContext<'_>,
        depth: u32,
        outer: &JoinRecord<'_>,
        inner: &InnerRow<'_>,
    ) -> bool;

    /// Hash value of the join keys of `depth`. `None` if a key is `NULL`.
    fn hash_value(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>) -> Option<u32>;

    /// Computes the output values of a joined combination.
    fn projection(&self, kcxt: &mut KernContext<'_>, record: &JoinRecord<'_>, buf: &mut ProjectionBuf);

    /// Post-processes the values of a slot form row after its
    /// variable-length payload was placed into the destination store.
    fn slot_projection(&self, _kcxt: &mut KernContext<'_>, _values: &mut Vec<SlotValue>) {}
}

/// A partial join combination: one row reference per joined relation.
///
/// A null reference stands for the null-extended side of an outer join.
#[derive(Clone, Copy, Debug)]
pub struct JoinRecord<'a> {
    kmrels: &'a MultiRels,
    kds_src: Option<&'a DataStore>,
    refs: &'a [RowRef],
}

impl<'a> JoinRecord<'a> {
    pub fn new(kmrels: &'a MultiRels, kds_src: Option<&'a DataStore>, refs: &'a [RowRef]) -> Self {
        Self {
            kmrels,
            kds_src,
            refs,
        }
    }

    /// The deepest relation of the combination.
    pub fn depth(&self) -> u32 {
        self.refs.len().saturating_sub(1) as u32
    }

    pub fn refs(&self) -> &'a [RowRef] {
        self.refs
    }

    pub fn row(&self, depth: u32) -> Option<RowRef> {
        self.refs.get(depth as usize).copied()
    }

    /// Reads column `col` of the row joined at `depth`.
    ///
    /// Depth 0 is the source relation. Returns `None` for null references.
    pub fn attr(&self, depth: u32, col: usize) -> Option<&'a Datum> {
        let row = self.row(depth)?;
        if depth == 0 {
            self.kds_src?.attr(row, col)
        } else {
            self.kmrels.chunk(depth)?.store().attr(row, col)
        }
    }

    /// Like `attr`, but reads null references as `NULL`.
    pub fn datum(&self, depth: u32, col: usize) -> &'a Datum {
        self.attr(depth, col).unwrap_or(&NULL_DATUM)
    }
}

/// A row of an inner relation.
#[derive(Clone, Copy, Debug)]
pub struct InnerRow<'a> {
    store: &'a InnerStore,
    row: RowRef,
}

impl<'a> InnerRow<'a> {
    pub fn new(store: &'a InnerStore, row: RowRef) -> Self {
        Self { store, row }
    }

    pub fn row(&self) -> RowRef {
        self.row
    }

    pub fn attr(&self, col: usize) -> Option<&'a Datum> {
        self.store.attr(self.row, col)
    }
}

/// An output value of a projection.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjValue {
    Datum(Datum),
    /// Variable-length payload in the extra buffer.
    Extra { offset: u32, len: u32 },
}

/// Output values of a projection.
///
/// Variable-length values can be placed in the extra buffer. In slot form,
/// the extra buffer is copied into the destination store, and references to
/// it are relocated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectionBuf {
    values: Vec<ProjValue>,
    extra: Vec<u8>,
}

impl ProjectionBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.extra.clear();
    }

    pub fn push(&mut self, datum: Datum) {
        self.values.push(ProjValue::Datum(datum));
    }

    /// Appends `bytes` to the extra buffer at an aligned offset.
    pub fn push_extra(&mut self, bytes: &[u8]) {
        let offset = maxalign(self.extra.len());
        self.extra.resize(offset, 0);
        self.extra.extend_from_slice(bytes);
        self.values.push(ProjValue::Extra {
            offset: offset as u32,
            len: bytes.len() as u32,
        });
    }

    pub fn values(&self) -> &[ProjValue] {
        &self.values
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// The length of the extra buffer.
    pub fn extra_len(&self) -> usize {
        self.extra.len()
    }

    /// Resolves extra buffer references into plain values.
    pub fn to_datums(&self) -> Vec<Datum> {
        self.values
            .iter()
            .map(|v| match *v {
                ProjValue::Datum(ref d) => d.clone(),
                ProjValue::Extra { offset, len } => {
                    let begin = offset as usize;
                    self.extra
                        .get(begin..begin + len as usize)
                        .map_or(Datum::Null, |b| Datum::Bytes(b.to_vec()))
                }
            })
            .collect()
    }

    /// Converts the values to slot form, with the extra buffer placed at
    /// `heap_pos`.
    pub fn to_slot_values(&self, heap_pos: u32) -> Vec<SlotValue> {
        self.values
            .iter()
            .map(|v| match *v {
                ProjValue::Datum(ref d) => SlotValue::Datum(d.clone()),
                ProjValue::Extra { offset, len } => SlotValue::Heap {
                    pos: heap_pos + offset,
                    len,
                },
            })
            .collect()
    }
}

/// An equality join key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinKey {
    /// The depth of the outer relation that supplies the key.
    pub outer_depth: u32,
    pub outer_col: usize,
    pub inner_col: usize,
}

type ScanFilter = Box<dyn Fn(SourceTuple<'_>) -> bool + Send + Sync>;

/// Join functions of an equi-join.
///
/// Every depth joins on the conjunction of its keys; a depth without keys is
/// a cross join. `NULL` keys never match. The projection emits the target
/// columns in order, with byte strings placed in the extra buffer.
pub struct EquiJoin {
    keys: Vec<Vec<JoinKey>>,
    targets: Vec<(u32, usize)>,
    scan_filter: Option<ScanFilter>,
}

impl EquiJoin {
    /// Creates an equi-join of `nrels` inner relations that projects the
    /// columns `(depth, col)` of `targets`.
    pub fn new(nrels: u32, targets: Vec<(u32, usize)>) -> Self {
        Self {
            keys: vec![Vec::new(); nrels as usize],
            targets,
            scan_filter: None,
        }
    }

    /// Adds a key to the join qualifiers of `depth`.
    pub fn key(mut self, depth: u32, key: JoinKey) -> Self {
        if let Some(keys) = depth
            .checked_sub(1)
            .and_then(|i| self.keys.get_mut(i as usize))
        {
            keys.push(key);
        }
        self
    }

    pub fn scan_filter<P>(mut self, pred: P) -> Self
    where
        P: Fn(SourceTuple<'_>) -> bool + Send + Sync + 'static,
    {
        self.scan_filter = Some(Box::new(pred));
        self
    }

    fn keys(&self, depth: u32) -> &[JoinKey] {
        depth
            .checked_sub(1)
            .and_then(|i| self.keys.get(i as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Hash value of the inner key columns of `depth`.
    pub fn inner_hash(&self, depth: u32, tuple: &Tuple) -> Option<u32> {
        let mut crc = Crc32::new(&CRC32_TABLE);
        for key in self.keys(depth) {
            crc.update(&tuple.attr(key.inner_col)?.hash_bytes()?);
        }
        Some(crc.finish())
    }

    /// Builds the hash table of the inner relation at `depth`.
    ///
    /// Rows with `NULL` keys are kept under hash value 0, so that a right
    /// outer join can still emit them.
    pub fn build_hash_store(&self, depth: u32, ncols: usize, tuples: Vec<Tuple>) -> data_store::error::Result<HashStore> {
        HashStoreBuilder::new(ncols)
            .extend(
                tuples
                    .into_iter()
                    .map(|t| (self.inner_hash(depth, &t).unwrap_or(0), t)),
            )
            .build()
    }
}

impl GpuJoinFuncs for EquiJoin {
    fn scan_quals(&self, _kcxt: &mut KernContext<'_>, tuple: SourceTuple<'_>) -> bool {
        self.scan_filter.as_ref().map_or(true, |pred| pred(tuple))
    }

    fn join_quals(
        &self,
        _kcxt: &mut KernContext<'_>,
        depth: u32,
        outer: &JoinRecord<'_>,
        inner: &InnerRow<'_>,
    ) -> bool {
        self.keys(depth).iter().all(|key| {
            match (outer.attr(key.outer_depth, key.outer_col), inner.attr(key.inner_col)) {
                (Some(o), Some(i)) => !o.is_null() && o == i,
                _ => false,
            }
        })
    }

    fn hash_value(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>) -> Option<u32> {
        kcxt.hash_keys(
            self.keys(depth)
                .iter()
                .map(|key| outer.datum(key.outer_depth, key.outer_col)),
        )
    }

    fn projection(&self, _kcxt: &mut KernContext<'_>, record: &JoinRecord<'_>, buf: &mut ProjectionBuf) {
        for &(depth, col) in self.targets.iter() {
            match record.datum(depth, col) {
                Datum::Bytes(b) => buf.push_extra(b),
                d => buf.push(d.clone()),
            }
        }
    }
}
