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


#![allow(dead_code)]

use datagen::workload::{JoinWorkload, JoinWorkloadBuilder};
use data_store::{BlockStore, ColumnStore, DataStore, Datum, DestFormat, DestStore, RowStore, Tuple};
use sql_ops::join::{EquiJoin, GpuJoin, GpuJoinBuilder, GpuJoinFuncs, JoinKey, JoinType, MultiRels, MultiRelsBuilder};
use std::error::Error;
use std::result::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMethod {
    NestLoop,
    Hash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Row,
    Block,
    Column,
}

/// A star join of an outer relation with several inner relations.
///
/// Inner relation `d` joins on outer column `key_cols[d - 1]` equal to its
/// column 0.
#[derive(Clone, Debug)]
pub struct JoinCase {
    pub outer: Vec<Tuple>,
    pub outer_ncols: usize,
    pub inners: Vec<Vec<Tuple>>,
    pub inner_ncols: usize,
    pub join_types: Vec<JoinType>,
    pub key_cols: Vec<usize>,
    pub targets: Vec<(u32, usize)>,
}

impl JoinCase {
    /// Projects the outer payload, followed by key and payload of each inner
    /// relation.
    pub fn from_workload(workload: JoinWorkload, join_types: &[JoinType]) -> Self {
        let nrels = workload.inners.len();
        let outer_ncols = workload.outer_ncols();
        let mut targets = vec![(0, outer_ncols - 1)];
        for depth in 1..=nrels as u32 {
            targets.push((depth, 0));
            targets.push((depth, 1));
        }

        Self {
            outer: workload.outer,
            outer_ncols,
            inners: workload.inners,
            inner_ncols: JoinWorkload::inner_ncols(),
            join_types: join_types.to_vec(),
            key_cols: (1..=nrels).map(JoinWorkload::outer_key_column).collect(),
            targets,
        }
    }

    /// Generates a workload where some outer keys miss all inner rows.
    pub fn generate(
        outer_rows: usize,
        inner_rows: usize,
        join_types: &[JoinType],
        selectivity: u32,
    ) -> Result<Self, Box<dyn Error>> {
        let workload = JoinWorkloadBuilder::default()
            .outer_rows(outer_rows)
            .inner_rows(inner_rows)
            .relations(join_types.len())
            .selectivity(selectivity)
            .build()?;
        let mut case = Self::from_workload(workload, join_types);

        // Every seventh outer row references a key that doesn't exist.
        let missing = Datum::Int(inner_rows as i64 + 1000);
        for (i, tuple) in case.outer.iter_mut().enumerate().filter(|(i, _)| i % 7 == 3) {
            let mut values = tuple.values().to_vec();
            values[i % case.inners.len()] = missing.clone();
            *tuple = Tuple::new(values);
        }
        Ok(case)
    }

    /// Builds a case with byte string payloads from explicit keys.
    ///
    /// Outer row `i` is `(key, "o<i>")`, and row `r` of inner relation `d`
    /// is `(key, "r<d>-<r>")`. All inner relations join on outer column 0.
    pub fn with_keys(outer_keys: &[Option<i64>], inner_keys: &[&[Option<i64>]], join_types: &[JoinType]) -> Self {
        let key = |k: &Option<i64>| k.map_or(Datum::Null, Datum::Int);
        let outer = outer_keys
            .iter()
            .enumerate()
            .map(|(i, k)| Tuple::new(vec![key(k), Datum::Bytes(format!("o{}", i).into_bytes())]))
            .collect();
        let inners: Vec<Vec<Tuple>> = (1..)
            .zip(inner_keys.iter())
            .map(|(d, keys)| {
                keys.iter()
                    .enumerate()
                    .map(|(r, k)| Tuple::new(vec![key(k), Datum::Bytes(format!("r{}-{}", d, r).into_bytes())]))
                    .collect()
            })
            .collect();

        let mut targets = vec![(0, 1)];
        for depth in 1..=inners.len() as u32 {
            targets.push((depth, 0));
            targets.push((depth, 1));
        }

        Self {
            outer,
            outer_ncols: 2,
            key_cols: vec![0; inners.len()],
            inners,
            inner_ncols: 2,
            join_types: join_types.to_vec(),
            targets,
        }
    }

    pub fn nrels(&self) -> u32 {
        self.inners.len() as u32
    }

    pub fn equi_join(&self) -> EquiJoin {
        (1..)
            .zip(self.key_cols.iter())
            .fold(EquiJoin::new(self.nrels(), self.targets.clone()), |funcs, (depth, &col)| {
                funcs.key(
                    depth,
                    JoinKey {
                        outer_depth: 0,
                        outer_col: col,
                        inner_col: 0,
                    },
                )
            })
    }

    pub fn multirels(&self, method: JoinMethod) -> Result<MultiRels, Box<dyn Error>> {
        let funcs = self.equi_join();
        let mut builder = MultiRelsBuilder::new();
        for (depth, (tuples, &join_type)) in (1..).zip(self.inners.iter().zip(self.join_types.iter())) {
            builder = match method {
                JoinMethod::NestLoop => {
                    builder.nestloop(RowStore::from_tuples(self.inner_ncols, tuples.clone())?, join_type)
                }
                JoinMethod::Hash => builder.hashjoin(
                    funcs.build_hash_store(depth, self.inner_ncols, tuples.clone())?,
                    join_type,
                ),
            };
        }
        Ok(builder.build()?)
    }

    /// Splits the outer relation into `nchunks` source stores.
    pub fn sources(&self, format: SourceFormat, nchunks: usize) -> Result<Vec<DataStore>, Box<dyn Error>> {
        let chunk_len = ((self.outer.len() + nchunks - 1) / nchunks).max(1);
        self.outer
            .chunks(chunk_len)
            .map(|chunk| -> Result<DataStore, Box<dyn Error>> {
                let tuples = chunk.to_vec();
                let store: DataStore = match format {
                    SourceFormat::Row => RowStore::from_tuples(self.outer_ncols, tuples)?.into(),
                    SourceFormat::Block => BlockStore::from_tuples(self.outer_ncols, 8, 4, tuples)?.into(),
                    SourceFormat::Column => ColumnStore::from_tuples(self.outer_ncols, tuples)?.into(),
                };
                Ok(store)
            })
            .collect()
    }

    fn outer_key(&self, combo: &[Option<usize>], depth: usize) -> Option<&Datum> {
        let row = combo[0]?;
        self.outer[row]
            .attr(self.key_cols[depth - 1])
            .filter(|d| !d.is_null())
    }

    /// The expected rows in canonical order.
    pub fn expected(&self) -> Vec<String> {
        canonical(self.expected_rows())
    }

    /// Joins by brute force, relation by relation.
    pub fn expected_rows(&self) -> Vec<Vec<Datum>> {
        let mut combos: Vec<Vec<Option<usize>>> = (0..self.outer.len()).map(|i| vec![Some(i)]).collect();

        for (depth, (inner, &join_type)) in (1..).zip(self.inners.iter().zip(self.join_types.iter())) {
            let left = join_type == JoinType::Left || join_type == JoinType::Full;
            let right = join_type == JoinType::Right || join_type == JoinType::Full;
            let mut referenced = vec![false; inner.len()];
            let mut next = Vec::new();

            for combo in combos.iter() {
                let key = self.outer_key(combo, depth);
                let mut matched = false;
                for (row, tuple) in inner.iter().enumerate() {
                    if key.is_some() && key == tuple.attr(0) {
                        matched = true;
                        referenced[row] = true;
                        let mut joined = combo.clone();
                        joined.push(Some(row));
                        next.push(joined);
                    }
                }
                if !matched && left {
                    let mut joined = combo.clone();
                    joined.push(None);
                    next.push(joined);
                }
            }

            if right {
                for (row, _) in referenced.iter().enumerate().filter(|(_, r)| !**r) {
                    let mut joined = vec![None; depth];
                    joined.push(Some(row));
                    next.push(joined);
                }
            }
            combos = next;
        }

        combos
            .iter()
            .map(|combo| {
                self.targets
                    .iter()
                    .map(|&(depth, col)| {
                        let tuple = match (depth, combo[depth as usize]) {
                            (_, None) => None,
                            (0, Some(row)) => self.outer.get(row),
                            (d, Some(row)) => self.inners[d as usize - 1].get(row),
                        };
                        tuple
                            .and_then(|t| t.attr(col))
                            .cloned()
                            .unwrap_or(Datum::Null)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Sorts rows into a canonical order for multiset comparison.
pub fn canonical(rows: Vec<Vec<Datum>>) -> Vec<String> {
    let mut rows: Vec<String> = rows.iter().map(|row| format!("{:?}", row)).collect();
    rows.sort();
    rows
}

/// Collects the rows of all destination stores.
pub fn collect_rows(dsts: &[DestStore]) -> Result<Vec<String>, Box<dyn Error>> {
    let mut rows = Vec::new();
    for dst in dsts {
        rows.extend(dst.rows()?);
    }
    Ok(canonical(rows))
}

/// Engine configuration of a test run.
#[derive(Clone, Copy, Debug)]
pub struct Setup {
    pub method: JoinMethod,
    pub src_format: SourceFormat,
    pub dst_format: DestFormat,
    pub dst_length: usize,
    pub grid_size: u32,
    pub block_size: u32,
    pub nchunks: usize,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            method: JoinMethod::Hash,
            src_format: SourceFormat::Row,
            dst_format: DestFormat::Row,
            dst_length: 1 << 20,
            grid_size: 4,
            block_size: 32,
            nchunks: 1,
        }
    }
}

pub fn build_join<F>(case: &JoinCase, setup: &Setup, funcs: F) -> Result<GpuJoin<F>, Box<dyn Error>>
where
    F: GpuJoinFuncs,
{
    Ok(GpuJoinBuilder::new()
        .grid_size(setup.grid_size)
        .block_size(setup.block_size)
        .num_threads(2)
        .build(case.multirels(setup.method)?, funcs)?)
}

/// Runs the join to completion and returns its destination stores.
pub fn run_join(case: &JoinCase, setup: &Setup) -> Result<Vec<DestStore>, Box<dyn Error>> {
    let mut join = build_join(case, setup, case.equi_join())?;
    let sources = case.sources(setup.src_format, setup.nchunks)?;
    let ncols = case.targets.len();
    let (format, length) = (setup.dst_format, setup.dst_length);

    Ok(join.run_to_completion(&sources, || Ok(DestStore::new(format, ncols, length)?))?)
}
