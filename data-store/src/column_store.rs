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

/// A relation stored column by column.
///
/// All columns have the same length. Rows are directly indexed like in a
/// `RowStore`.
#[derive(Clone, Debug, Default)]
pub struct ColumnStore {
    nitems: u32,
    columns: Vec<Vec<Datum>>,
}

impl ColumnStore {
    pub fn new(columns: Vec<Vec<Datum>>) -> Result<Self> {
        let nitems = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != nitems) {
            Err(ErrorKind::InvalidArgument(
                "Columns have different lengths".to_string(),
            ))?;
        }
        if nitems >= u32::MAX as usize {
            Err(ErrorKind::IntegerOverflow(
                "Column store has too many rows".to_string(),
            ))?;
        }

        Ok(Self {
            nitems: nitems as u32,
            columns,
        })
    }

    /// Transposes row-wise tuples into columns.
    pub fn from_tuples(ncols: usize, tuples: Vec<Tuple>) -> Result<Self> {
        let mut columns: Vec<Vec<Datum>> = (0..ncols)
            .map(|_| Vec::with_capacity(tuples.len()))
            .collect();

        for tuple in tuples {
            if tuple.natts() != ncols {
                Err(ErrorKind::InvalidArgument(format!(
                    "Tuple has {} attributes, but the store expects {}",
                    tuple.natts(),
                    ncols
                )))?;
            }
            columns
                .iter_mut()
                .zip(tuple.into_values())
                .for_each(|(c, v)| c.push(v));
        }

        Self::new(columns)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn nitems(&self) -> u32 {
        self.nitems
    }

    pub fn column(&self, col: usize) -> Option<&[Datum]> {
        self.columns.get(col).map(Vec::as_slice)
    }

    pub fn datum_at(&self, row_index: u32, col: usize) -> Option<&Datum> {
        self.columns
            .get(col)
            .and_then(|c| c.get(row_index as usize))
    }
}

impl TupleAccess for ColumnStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        row.index().and_then(|i| self.datum_at(i, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposes_tuples() -> Result<()> {
        let store = ColumnStore::from_tuples(
            2,
            vec![
                Tuple::new(vec![Datum::Int(1), Datum::Int(10)]),
                Tuple::new(vec![Datum::Int(2), Datum::Int(20)]),
            ],
        )?;

        assert_eq!(store.nitems(), 2);
        assert_eq!(store.attr(RowRef::from_index(1), 1), Some(&Datum::Int(20)));
        assert_eq!(store.attr(RowRef::NULL, 0), None);
        Ok(())
    }

    #[test]
    fn rejects_ragged_columns() {
        assert!(ColumnStore::new(vec![vec![Datum::Int(1)], vec![]]).is_err());
    }
}
