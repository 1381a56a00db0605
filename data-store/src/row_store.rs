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

/// A relation stored row by row.
///
/// Rows are directly indexed, thus the `RowRef` of row `i` is
/// `RowRef::from_index(i)`.
#[derive(Clone, Debug, Default)]
pub struct RowStore {
    ncols: usize,
    tuples: Vec<Tuple>,
}

impl RowStore {
    pub fn new(ncols: usize) -> Self {
        Self {
            ncols,
            tuples: Vec::new(),
        }
    }

    /// Builds a store from tuples that all have `ncols` attributes.
    pub fn from_tuples(ncols: usize, tuples: Vec<Tuple>) -> Result<Self> {
        let mut store = Self::new(ncols);
        for tuple in tuples {
            store.push(tuple)?;
        }
        Ok(store)
    }

    pub fn push(&mut self, tuple: Tuple) -> Result<RowRef> {
        if tuple.natts() != self.ncols {
            Err(ErrorKind::InvalidArgument(format!(
                "Tuple has {} attributes, but the store expects {}",
                tuple.natts(),
                self.ncols
            )))?;
        }
        if self.tuples.len() >= u32::MAX as usize - 1 {
            Err(ErrorKind::IntegerOverflow(
                "Row store is full".to_string(),
            ))?;
        }

        self.tuples.push(tuple);
        Ok(RowRef::from_index(self.tuples.len() as u32 - 1))
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nitems(&self) -> u32 {
        self.tuples.len() as u32
    }

    pub fn tuple_at(&self, index: u32) -> Option<&Tuple> {
        self.tuples.get(index as usize)
    }

    pub fn tuple(&self, row: RowRef) -> Option<&Tuple> {
        row.index().and_then(|i| self.tuple_at(i))
    }
}

impl TupleAccess for RowStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        self.tuple(row).and_then(|t| t.attr(col))
    }
}
