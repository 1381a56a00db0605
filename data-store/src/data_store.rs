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


use crate::block_store::BlockStore;
use crate::column_store::ColumnStore;
use crate::datum::{Datum, RowRef, Tuple};
use crate::row_store::RowStore;
use serde_derive::{Deserialize, Serialize};

/// Physical layout of a data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStoreFormat {
    Row,
    Block,
    Column,
    Hash,
    Slot,
}

/// Physical location of a tuple within a block store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPointer {
    pub block_nr: u32,
    pub line_no: u16,
}

/// Reads attributes of rows referenced by a `RowRef`.
///
/// Joined combinations only carry `RowRef`s; projections resolve them through
/// this trait.
pub trait TupleAccess {
    /// Returns `None` for the null `RowRef` and for references that are out
    /// of bounds.
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum>;
}

/// A candidate row of the source relation, handed to the scan qualifiers.
#[derive(Clone, Copy, Debug)]
pub enum SourceTuple<'a> {
    /// A row of a row-oriented or block-oriented store.
    Heap {
        t_self: Option<ItemPointer>,
        tuple: &'a Tuple,
    },
    /// A row of a column-oriented store.
    Column {
        store: &'a ColumnStore,
        row_index: u32,
    },
}

impl<'a> SourceTuple<'a> {
    pub fn attr(&self, col: usize) -> Option<&'a Datum> {
        match *self {
            SourceTuple::Heap { tuple, .. } => tuple.attr(col),
            SourceTuple::Column { store, row_index } => store.datum_at(row_index, col),
        }
    }
}

/// The driving relation of a join.
#[derive(Clone, Debug)]
pub enum DataStore {
    Row(RowStore),
    Block(BlockStore),
    Column(ColumnStore),
}

impl DataStore {
    pub fn format(&self) -> DataStoreFormat {
        match self {
            DataStore::Row(_) => DataStoreFormat::Row,
            DataStore::Block(_) => DataStoreFormat::Block,
            DataStore::Column(_) => DataStoreFormat::Column,
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            DataStore::Row(s) => s.ncols(),
            DataStore::Block(s) => s.ncols(),
            DataStore::Column(s) => s.ncols(),
        }
    }

    /// The number of items. For block stores, these are pages, not tuples.
    pub fn nitems(&self) -> u32 {
        match self {
            DataStore::Row(s) => s.nitems(),
            DataStore::Block(s) => s.nitems(),
            DataStore::Column(s) => s.nitems(),
        }
    }
}

impl TupleAccess for DataStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        match self {
            DataStore::Row(s) => s.attr(row, col),
            DataStore::Block(s) => s.attr(row, col),
            DataStore::Column(s) => s.attr(row, col),
        }
    }
}

impl From<RowStore> for DataStore {
    fn from(s: RowStore) -> Self {
        DataStore::Row(s)
    }
}

impl From<BlockStore> for DataStore {
    fn from(s: BlockStore) -> Self {
        DataStore::Block(s)
    }
}

impl From<ColumnStore> for DataStore {
    fn from(s: ColumnStore) -> Self {
        DataStore::Column(s)
    }
}
