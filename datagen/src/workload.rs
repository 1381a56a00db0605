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
use crate::relation::{KeyAttribute, UniformRelation};

use data_store::{Datum, Tuple};

use serde_derive::{Deserialize, Serialize};

/// A star-shaped join workload.
///
/// The outer relation has one foreign key column per inner relation, followed
/// by a payload column: `[fk_1, ..., fk_n, payload]`. Each inner relation has
/// a primary key and a payload column: `[pk, payload]`.
#[derive(Clone, Debug)]
pub struct JoinWorkload {
    pub outer: Vec<Tuple>,
    pub inners: Vec<Vec<Tuple>>,
}

impl JoinWorkload {
    /// The outer column that joins with inner relation `depth`, counted from 1.
    pub fn outer_key_column(depth: usize) -> usize {
        depth - 1
    }

    pub fn outer_ncols(&self) -> usize {
        self.inners.len() + 1
    }

    pub fn inner_ncols() -> usize {
        2
    }
}

/// Configures a `JoinWorkload`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinWorkloadBuilder {
    outer_rows: usize,
    inner_rows: usize,
    relations: usize,
    selectivity: Option<u32>,
    payload_max: usize,
}

impl Default for JoinWorkloadBuilder {
    fn default() -> Self {
        Self {
            outer_rows: 1024,
            inner_rows: 256,
            relations: 1,
            selectivity: None,
            payload_max: 1000,
        }
    }
}

impl JoinWorkloadBuilder {
    pub fn outer_rows(&mut self, rows: usize) -> &mut Self {
        self.outer_rows = rows;
        self
    }

    pub fn inner_rows(&mut self, rows: usize) -> &mut Self {
        self.inner_rows = rows;
        self
    }

    pub fn relations(&mut self, relations: usize) -> &mut Self {
        self.relations = relations;
        self
    }

    /// Sets the percentage of inner keys that are not `NULL`.
    pub fn selectivity(&mut self, selectivity: u32) -> &mut Self {
        self.selectivity = Some(selectivity);
        self
    }

    pub fn payload_max(&mut self, payload_max: usize) -> &mut Self {
        self.payload_max = payload_max;
        self
    }

    pub fn build(&self) -> Result<JoinWorkload> {
        if self.relations == 0 {
            Err(ErrorKind::InvalidArgument(
                "At least one inner relation is required".to_string(),
            ))?;
        }
        if self.inner_rows == 0 {
            Err(ErrorKind::InvalidArgument(
                "Inner relations must not be empty".to_string(),
            ))?;
        }

        let mut outer_columns: Vec<Vec<Datum>> = Vec::with_capacity(self.relations + 1);
        let mut inners = Vec::with_capacity(self.relations);

        for _ in 0..self.relations {
            let mut pk = vec![None; self.inner_rows];
            UniformRelation::gen_primary_key_par::<i64>(&mut pk, self.selectivity)?;

            let mut fk = vec![None; self.outer_rows];
            UniformRelation::gen_foreign_key_from_primary_key(&mut fk, &pk);
            outer_columns.push(fk.into_iter().map(i64::to_datum).collect());

            let mut payload = vec![0_i64; self.inner_rows];
            UniformRelation::gen_attr_par(&mut payload, 0..=self.payload_max)?;

            let inner = pk
                .into_iter()
                .zip(payload)
                .map(|(k, p)| Tuple::new(vec![i64::to_datum(k), Datum::Int(p)]))
                .collect();
            inners.push(inner);
        }

        let mut payload = vec![0_i64; self.outer_rows];
        UniformRelation::gen_attr_par(&mut payload, 0..=self.payload_max)?;
        outer_columns.push(payload.into_iter().map(Datum::Int).collect());

        let outer = (0..self.outer_rows)
            .map(|row| {
                Tuple::new(
                    outer_columns
                        .iter()
                        .map(|column| column[row].clone())
                        .collect(),
                )
            })
            .collect();

        Ok(JoinWorkload { outer, inners })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::error::Error;

    #[test]
    fn shapes_match_configuration() -> std::result::Result<(), Box<dyn Error>> {
        let workload = JoinWorkloadBuilder::default()
            .outer_rows(100)
            .inner_rows(10)
            .relations(3)
            .build()?;

        assert_eq!(workload.outer.len(), 100);
        assert_eq!(workload.inners.len(), 3);
        assert!(workload.outer.iter().all(|t| t.natts() == 4));
        assert!(workload
            .inners
            .iter()
            .all(|r| r.len() == 10 && r.iter().all(|t| t.natts() == 2)));
        Ok(())
    }

    #[test]
    fn outer_keys_reference_inner_keys() -> std::result::Result<(), Box<dyn Error>> {
        let workload = JoinWorkloadBuilder::default()
            .outer_rows(50)
            .inner_rows(20)
            .relations(2)
            .selectivity(70)
            .build()?;

        for (depth, inner) in (1..).zip(workload.inners.iter()) {
            let keys: HashSet<i64> = inner
                .iter()
                .filter_map(|t| t.attr(0).and_then(Datum::as_int))
                .collect();
            let col = JoinWorkload::outer_key_column(depth);
            assert!(workload
                .outer
                .iter()
                .filter_map(|t| t.attr(col).and_then(Datum::as_int))
                .all(|k| keys.contains(&k)));
        }
        Ok(())
    }

    #[test]
    fn rejects_empty_join() {
        assert!(JoinWorkloadBuilder::default().relations(0).build().is_err());
    }
}
