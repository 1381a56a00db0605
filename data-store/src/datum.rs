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


use serde_derive::{Deserialize, Serialize};

/// Alignment of tuples and variable-length regions, in bytes.
pub const MAXIMUM_ALIGNOF: usize = 8;

/// Size of a heap tuple header without the null bitmap.
const HEAP_TUPLE_HEADER_SIZE: usize = 23;

/// Size of the length word in front of a variable-length value.
const VARHDRSZ: usize = 4;

/// Aligns `len` to `MAXIMUM_ALIGNOF`.
pub fn maxalign(len: usize) -> usize {
    typealign(MAXIMUM_ALIGNOF, len)
}

fn typealign(align: usize, len: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Datum::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// The byte representation hashed by hash joins.
    ///
    /// Returns `None` for `NULL`, because `NULL` keys never match.
    pub fn hash_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(vec![*b as u8]),
            Datum::Int(i) => Some(i.to_le_bytes().to_vec()),
            Datum::Float(f) => Some(f.to_bits().to_le_bytes().to_vec()),
            Datum::Bytes(b) => Some(b.clone()),
        }
    }
}

/// A tuple, i.e., the attribute values of a row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Datum>,
}

impl Tuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn natts(&self) -> usize {
        self.values.len()
    }

    pub fn attr(&self, col: usize) -> Option<&Datum> {
        self.values.get(col)
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }
}

impl From<Vec<Datum>> for Tuple {
    fn from(values: Vec<Datum>) -> Self {
        Self::new(values)
    }
}

/// Computes the size of a heap tuple that stores `values`.
///
/// The tuple consists of a fixed header, an optional null bitmap, and the
/// aligned attributes. `NULL` attributes only occupy a bit in the bitmap.
pub fn heap_tuple_size(values: &[Datum]) -> usize {
    let has_null = values.iter().any(Datum::is_null);
    let mut len = HEAP_TUPLE_HEADER_SIZE;
    if has_null {
        len += (values.len() + 7) / 8;
    }
    len = maxalign(len);

    for value in values {
        len = match value {
            Datum::Null => len,
            Datum::Bool(_) => len + 1,
            Datum::Int(_) | Datum::Float(_) => typealign(8, len) + 8,
            Datum::Bytes(b) => typealign(4, len) + VARHDRSZ + b.len(),
        };
    }

    len
}

/// A handle to a row of a data store.
///
/// The handle is the row's index plus one. The zero handle references no row
/// at all and is used for null-extended outer join combinations.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowRef(u32);

impl RowRef {
    pub const NULL: RowRef = RowRef(0);

    pub fn from_index(index: u32) -> Self {
        debug_assert!(index < u32::MAX);
        RowRef(index + 1)
    }

    pub fn from_raw(raw: u32) -> Self {
        RowRef(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the row index, or `None` for the null handle.
    pub fn index(self) -> Option<u32> {
        self.0.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ref_null() {
        assert!(RowRef::NULL.is_null());
        assert_eq!(RowRef::NULL.index(), None);
        assert_eq!(RowRef::from_index(0).index(), Some(0));
        assert!(!RowRef::from_index(0).is_null());
    }

    #[test]
    fn tuple_size_is_aligned_per_attribute() {
        let fixed = heap_tuple_size(&[Datum::Int(1), Datum::Int(2)]);
        assert_eq!(fixed, 24 + 16);

        let with_null = heap_tuple_size(&[Datum::Int(1), Datum::Null]);
        assert_eq!(with_null, 24 + 8);

        let varlena = heap_tuple_size(&[Datum::Bytes(vec![0; 5])]);
        assert_eq!(varlena, 24 + 4 + 5);
    }

    #[test]
    fn null_has_no_hash_bytes() {
        assert_eq!(Datum::Null.hash_bytes(), None);
        assert_eq!(Datum::Int(1).hash_bytes(), Some(vec![1, 0, 0, 0, 0, 0, 0, 0]));
    }
}
