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


//! # Data Stores
//!
//! `data-store` provides the in-memory relation formats consumed by the join
//! kernels in `sql-ops`:
//!
//! - [`RowStore`]: one tuple per row, directly indexed.
//! - [`BlockStore`]: tuples packed into fixed-capacity pages with line pointers.
//! - [`ColumnStore`]: one vector per attribute.
//! - [`HashStore`]: tuples chained into hash slots, used as hash join inner relation.
//! - [`DestStore`]: the destination buffer of a join, in row or slot form.
//!
//! All formats address rows with a [`RowRef`]. A `RowRef` is a non-zero
//! handle. The zero handle is reserved for "no row", which is used by outer
//! joins for null-extended combinations.

pub mod error;

mod block_store;
mod column_store;
mod crc32;
mod data_store;
mod datum;
mod dest_store;
mod hash_store;
mod row_store;

pub use block_store::{BlockStore, ItemId, Page};
pub use column_store::ColumnStore;
pub use crc32::{Crc32, CRC32_TABLE};
pub use data_store::{DataStore, DataStoreFormat, ItemPointer, SourceTuple, TupleAccess};
pub use datum::{heap_tuple_size, maxalign, Datum, RowRef, Tuple, MAXIMUM_ALIGNOF};
pub use dest_store::{
    DestFormat, DestItem, DestSlot, DestStore, DestTuple, NoSpace, Reservation, SlotValue,
};
pub use hash_store::{HashItem, HashStore, HashStoreBuilder};
pub use row_store::RowStore;
