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


mod data_point;
mod error;
mod harness;
mod types;

use crate::data_point::DataPoint;
use crate::error::{ErrorKind, Result};
use crate::harness::RunResult;
use crate::types::*;
use data_store::{BlockStore, ColumnStore, DataStore, DestFormat, DestStore, RowStore};
use datagen::workload::{JoinWorkload, JoinWorkloadBuilder};
use sql_ops::join::{
    EquiJoin, GpuJoinBuilder, JoinKey, JoinType, MultiRels, MultiRelsBuilder, GPUJOIN_MAX_DEPTH,
};
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LINES_PER_PAGE: u32 = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cmd = CmdOpt::from_args();
    cmd.validate()?;

    let join_types: Vec<JoinType> = (1..=cmd.relations as u32)
        .map(|depth| join_type(depth, &cmd.left_outer, &cmd.right_outer))
        .collect();
    info!(
        relations = cmd.relations,
        outer_rows = cmd.outer_rows,
        inner_rows = cmd.inner_rows,
        join_types = ?join_types,
        "Generating workload"
    );

    let mut builder = JoinWorkloadBuilder::default();
    builder
        .outer_rows(cmd.outer_rows)
        .inner_rows(cmd.inner_rows)
        .relations(cmd.relations);
    if let Some(selectivity) = cmd.selectivity {
        builder.selectivity(selectivity);
    }
    let workload = builder.build()?;
    let sources = vec![cmd.source_store(&workload)?];

    let csv_file = cmd
        .csv
        .as_ref()
        .map(std::fs::File::create)
        .transpose()?;
    let template = cmd.fill_data_point(&DataPoint::new()?, &join_types);

    let dst_format: DestFormat = cmd.dst_format.into();
    let dst_ncols = equi_join(&workload).1;
    let dst_bytes = cmd.dst_bytes;

    harness::measure(cmd.repeat, csv_file, template, || {
        let (funcs, _) = equi_join(&workload);
        let kmrels = cmd.multirels(&workload, &join_types, &funcs)?;
        let mut join = cmd.join_builder().build(kmrels, funcs)?;

        let timer = Instant::now();
        let results = join.run_to_completion(&sources, || {
            Ok(DestStore::new(dst_format, dst_ncols, dst_bytes)?)
        })?;
        let duration = timer.elapsed();

        let stats = join.stats();
        debug!(
            source_nitems = stats.source_nitems,
            outer_nitems = stats.outer_nitems,
            stat_nitems = ?stats.stat_nitems,
            "Join statistics"
        );

        Ok(RunResult {
            result_rows: results.iter().map(|dst| dst.nitems() as u64).sum(),
            dst_stores: results.len(),
            duration,
        })
    })?;

    Ok(())
}

/// Joins every inner relation on its primary key, and projects the outer
/// payload and all inner columns.
///
/// Returns the join functions and the number of projected columns.
fn equi_join(workload: &JoinWorkload) -> (EquiJoin, usize) {
    let nrels = workload.inners.len() as u32;
    let mut targets = vec![(0, workload.outer_ncols() - 1)];
    targets.extend((1..=nrels).flat_map(|depth| vec![(depth, 0), (depth, 1)]));
    let ncols = targets.len();

    let funcs = (1..=nrels).fold(EquiJoin::new(nrels, targets), |funcs, depth| {
        funcs.key(
            depth,
            JoinKey {
                outer_depth: 0,
                outer_col: JoinWorkload::outer_key_column(depth as usize),
                inner_col: 0,
            },
        )
    });

    (funcs, ncols)
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct CmdOpt {
    /// Number of tuples in the outer relation
    #[structopt(long, default_value = "1000000")]
    outer_rows: usize,

    /// Number of tuples in each inner relation
    #[structopt(long, default_value = "10000")]
    inner_rows: usize,

    /// Number of inner relations
    #[structopt(long, default_value = "2")]
    relations: usize,

    /// Join algorithm of all inner relations
    #[structopt(
        long,
        default_value = "Hash",
        possible_values = &ArgJoinMethod::variants(),
        case_insensitive = true
    )]
    join_method: ArgJoinMethod,

    /// Inner relations that are left outer joined (e.g.: 1,2)
    #[structopt(long, require_delimiter = true)]
    left_outer: Vec<u32>,

    /// Inner relations that are right outer joined (e.g.: 2)
    #[structopt(long, require_delimiter = true)]
    right_outer: Vec<u32>,

    /// Percentage of inner keys that are NULL and never match
    #[structopt(long)]
    selectivity: Option<u32>,

    /// Storage format of the outer relation
    #[structopt(
        long,
        default_value = "Row",
        possible_values = &ArgSourceFormat::variants(),
        case_insensitive = true
    )]
    src_format: ArgSourceFormat,

    /// Format of the destination stores
    #[structopt(
        long,
        default_value = "Row",
        possible_values = &ArgDestFormat::variants(),
        case_insensitive = true
    )]
    dst_format: ArgDestFormat,

    /// Size of one destination store in bytes
    ///
    /// The kernel suspends whenever a store fills up, and resumes with a new
    /// store. Small stores exercise many suspend and resume cycles.
    #[structopt(long, default_value = "16777216")]
    dst_bytes: usize,

    /// Number of worker groups
    #[structopt(long, default_value = "8")]
    grid_size: u32,

    /// Number of lanes per worker group
    #[structopt(long, default_value = "32")]
    block_size: u32,

    /// Combinations per depth and worker group (default: 4 * block size)
    #[structopt(long)]
    pstack_nrooms: Option<u32>,

    /// Number of CPU threads that execute the worker groups (default: all cores)
    #[structopt(long, default_value = "0")]
    threads: usize,

    /// Number of times to repeat the benchmark
    #[structopt(long, default_value = "10")]
    repeat: u32,

    /// Output filename for measurement CSV file
    #[structopt(long, parse(from_os_str))]
    csv: Option<PathBuf>,
}

impl CmdOpt {
    fn validate(&self) -> Result<()> {
        if self.relations == 0 || self.relations > GPUJOIN_MAX_DEPTH as usize {
            Err(ErrorKind::InvalidArgument(format!(
                "Number of relations must be between 1 and {}",
                GPUJOIN_MAX_DEPTH
            )))?;
        }

        if let Some(&depth) = self
            .left_outer
            .iter()
            .chain(self.right_outer.iter())
            .find(|&&depth| depth == 0 || depth as usize > self.relations)
        {
            Err(ErrorKind::InvalidArgument(format!(
                "Outer join depth {} is not an inner relation",
                depth
            )))?;
        }

        Ok(())
    }

    fn join_builder(&self) -> GpuJoinBuilder {
        let builder = GpuJoinBuilder::new()
            .grid_size(self.grid_size)
            .block_size(self.block_size)
            .num_threads(self.threads);

        match self.pstack_nrooms {
            Some(nrooms) => builder.pstack_nrooms(nrooms),
            None => builder,
        }
    }

    fn source_store(&self, workload: &JoinWorkload) -> Result<DataStore> {
        let ncols = workload.outer_ncols();
        let tuples = workload.outer.clone();

        let store: DataStore = match self.src_format {
            ArgSourceFormat::Row => RowStore::from_tuples(ncols, tuples)?.into(),
            ArgSourceFormat::Block => {
                let part_width = self.block_size.min(8);
                BlockStore::from_tuples(ncols, LINES_PER_PAGE, part_width, tuples)?.into()
            }
            ArgSourceFormat::Column => ColumnStore::from_tuples(ncols, tuples)?.into(),
        };

        Ok(store)
    }

    fn multirels(
        &self,
        workload: &JoinWorkload,
        join_types: &[JoinType],
        funcs: &EquiJoin,
    ) -> Result<MultiRels> {
        let ncols = JoinWorkload::inner_ncols();
        let mut builder = MultiRelsBuilder::new();

        for (depth, (tuples, &join_type)) in (1..).zip(workload.inners.iter().zip(join_types)) {
            builder = match self.join_method {
                ArgJoinMethod::NestLoop => {
                    builder.nestloop(RowStore::from_tuples(ncols, tuples.clone())?, join_type)
                }
                ArgJoinMethod::Hash => builder.hashjoin(
                    funcs.build_hash_store(depth, ncols, tuples.clone())?,
                    join_type,
                ),
            };
        }

        Ok(builder.build()?)
    }

    fn fill_data_point(&self, data_point: &DataPoint, join_types: &[JoinType]) -> DataPoint {
        DataPoint {
            join_method: Some(self.join_method),
            join_types: Some(join_types.iter().map(|jt| format!("{:?}", jt)).collect()),
            relations: Some(self.relations),
            outer_rows: Some(self.outer_rows),
            inner_rows: Some(self.inner_rows),
            selectivity: self.selectivity,
            src_format: Some(self.src_format),
            dst_format: Some(self.dst_format),
            dst_bytes: Some(self.dst_bytes),
            grid_size: Some(self.grid_size),
            block_size: Some(self.block_size),
            pstack_nrooms: Some(self.pstack_nrooms.unwrap_or(4 * self.block_size)),
            threads: Some(self.threads),
            ..data_point.clone()
        }
    }
}
