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


mod gpujoin;

use gpujoin::{build_join, canonical, collect_rows, run_join, JoinCase, JoinMethod, Setup, SourceFormat};

use itertools::izip;
use rand::{thread_rng, Rng};

use data_store::{Datum, DestFormat, DestStore, SlotValue, SourceTuple};
use sql_ops::error::ErrorKind;
use sql_ops::join::{
    EquiJoin, ErrorCode, GpuJoinFuncs, InnerRow, JoinRecord, JoinType, KernContext, KernelStatus,
    ParamBuf, ProjectionBuf,
};
use std::collections::HashMap;
use std::error::Error;
use std::result::Result;

use sql_ops::join::JoinType::{Full, Inner, Left, Right};

fn verify_join(join_types: &[JoinType], setup: Setup) -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(500, 64, join_types, 80)?;
    let dsts = run_join(&case, &setup)?;

    assert_eq!(collect_rows(&dsts)?, case.expected());
    Ok(())
}

macro_rules! gpujoin_tests {
    ($($name:ident: $join_types:expr, $method:expr, $src:expr, $dst:expr,)*) => {
        $(
            #[test]
            fn $name() -> Result<(), Box<dyn Error>> {
                verify_join(
                    $join_types,
                    Setup {
                        method: $method,
                        src_format: $src,
                        dst_format: $dst,
                        ..Setup::default()
                    },
                )
            }
        )*
    };
}

gpujoin_tests! {
    hash_inner_row_row: &[Inner], JoinMethod::Hash, SourceFormat::Row, DestFormat::Row,
    hash_inner_block_slot: &[Inner], JoinMethod::Hash, SourceFormat::Block, DestFormat::Slot,
    hash_inner_column_row: &[Inner], JoinMethod::Hash, SourceFormat::Column, DestFormat::Row,
    nestloop_inner_row_slot: &[Inner], JoinMethod::NestLoop, SourceFormat::Row, DestFormat::Slot,
    nestloop_inner_block_row: &[Inner], JoinMethod::NestLoop, SourceFormat::Block, DestFormat::Row,
    hash_three_rels_row_row: &[Inner, Inner, Inner], JoinMethod::Hash, SourceFormat::Row, DestFormat::Row,
    nestloop_three_rels_column_slot: &[Inner, Inner, Inner], JoinMethod::NestLoop, SourceFormat::Column, DestFormat::Slot,
    hash_left_row_row: &[Left], JoinMethod::Hash, SourceFormat::Row, DestFormat::Row,
    nestloop_left_block_slot: &[Left], JoinMethod::NestLoop, SourceFormat::Block, DestFormat::Slot,
    hash_right_column_row: &[Right], JoinMethod::Hash, SourceFormat::Column, DestFormat::Row,
    nestloop_right_row_row: &[Right], JoinMethod::NestLoop, SourceFormat::Row, DestFormat::Row,
    hash_full_row_slot: &[Full], JoinMethod::Hash, SourceFormat::Row, DestFormat::Slot,
    nestloop_full_block_row: &[Full], JoinMethod::NestLoop, SourceFormat::Block, DestFormat::Row,
    hash_mixed_row_row: &[Inner, Left, Right], JoinMethod::Hash, SourceFormat::Row, DestFormat::Row,
    nestloop_mixed_column_slot: &[Left, Full, Inner], JoinMethod::NestLoop, SourceFormat::Column, DestFormat::Slot,
    hash_two_rights_block_row: &[Right, Full], JoinMethod::Hash, SourceFormat::Block, DestFormat::Row,
}

#[test]
fn many_source_stores() -> Result<(), Box<dyn Error>> {
    verify_join(
        &[Left, Right],
        Setup {
            nchunks: 5,
            ..Setup::default()
        },
    )
}

#[test]
fn single_lane_groups() -> Result<(), Box<dyn Error>> {
    verify_join(
        &[Inner, Full],
        Setup {
            grid_size: 3,
            block_size: 1,
            ..Setup::default()
        },
    )
}

#[test]
fn empty_source() -> Result<(), Box<dyn Error>> {
    let mut case = JoinCase::generate(10, 8, &[Right], 100)?;
    case.outer.clear();
    let dsts = run_join(&case, &Setup::default())?;

    // All inner rows are emitted by the right outer pass.
    assert_eq!(collect_rows(&dsts)?.len(), 8);
    assert_eq!(collect_rows(&dsts)?, case.expected());
    Ok(())
}

#[test]
fn hash_join_emits_every_match() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::with_keys(
        &[Some(5)],
        &[&[Some(1), Some(5), Some(5), Some(2), Some(5)]],
        &[Inner],
    );
    let dsts = run_join(&case, &Setup::default())?;
    let rows = collect_rows(&dsts)?;

    assert_eq!(rows.len(), 3);
    assert_eq!(rows, case.expected());
    Ok(())
}

#[test]
fn random_duplicate_keys_agree_across_methods() -> Result<(), Box<dyn Error>> {
    let mut rng = thread_rng();
    let mut keys = |n: usize| -> Vec<Option<i64>> {
        (0..n)
            .map(|_| match rng.gen_range(0, 20) {
                k if k < 16 => Some(k),
                _ => None,
            })
            .collect()
    };
    let outer_keys = keys(300);
    let (first, second) = (keys(40), keys(40));
    let case = JoinCase::with_keys(&outer_keys, &[&first[..], &second[..]], &[Left, Right]);

    let setups = [
        Setup {
            method: JoinMethod::Hash,
            ..Setup::default()
        },
        Setup {
            method: JoinMethod::NestLoop,
            src_format: SourceFormat::Column,
            ..Setup::default()
        },
    ];
    let results = setups
        .iter()
        .map(|setup| Ok(collect_rows(&run_join(&case, setup)?)?))
        .collect::<Result<Vec<_>, Box<dyn Error>>>()?;

    let expected = case.expected();
    assert_eq!(results[0].len(), expected.len());
    for (hash, nestloop, oracle) in izip!(results[0].iter(), results[1].iter(), expected.iter()) {
        assert_eq!(hash, oracle);
        assert_eq!(nestloop, oracle);
    }
    Ok(())
}

#[test]
fn left_outer_emits_one_row_without_match() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::with_keys(&[Some(9)], &[&[Some(1), Some(2)]], &[Left]);

    for &method in [JoinMethod::Hash, JoinMethod::NestLoop].iter() {
        let dsts = run_join(
            &case,
            &Setup {
                method,
                ..Setup::default()
            },
        )?;
        let rows: Vec<Vec<Datum>> = dsts.iter().map(|d| d.rows()).collect::<Result<Vec<_>, _>>()?.concat();

        assert_eq!(
            rows,
            vec![vec![Datum::Bytes(b"o0".to_vec()), Datum::Null, Datum::Null]]
        );
    }
    Ok(())
}

#[test]
fn left_outer_neither_duplicates_nor_loses() -> Result<(), Box<dyn Error>> {
    let outer_keys: Vec<Option<i64>> = (0..200).map(|i| if i % 11 == 0 { None } else { Some(i % 40) }).collect();
    let inner_keys: Vec<Option<i64>> = (0..60).map(|i| Some(i % 20)).collect();
    let case = JoinCase::with_keys(&outer_keys, &[&inner_keys], &[Left]);

    for &method in [JoinMethod::Hash, JoinMethod::NestLoop].iter() {
        let dsts = run_join(
            &case,
            &Setup {
                method,
                ..Setup::default()
            },
        )?;

        let mut counts: HashMap<Vec<u8>, (usize, usize)> = HashMap::new();
        for row in dsts.iter().map(|d| d.rows()).collect::<Result<Vec<_>, _>>()?.concat() {
            let entry = counts.entry(row[0].as_bytes().unwrap_or_default().to_vec()).or_default();
            if row[1].is_null() {
                entry.1 += 1;
            } else {
                entry.0 += 1;
            }
        }

        assert_eq!(counts.len(), outer_keys.len());
        for (i, key) in outer_keys.iter().enumerate() {
            let k = match key {
                Some(k) if *k < 20 => 3,
                _ => 0,
            };
            let expected = if k == 0 { (0, 1) } else { (k, 0) };
            assert_eq!(counts[format!("o{}", i).as_bytes()], expected, "Outer row {}", i);
        }
    }
    Ok(())
}

#[test]
fn right_outer_emits_complement() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(300, 100, &[Right], 90)?;
    let setup = Setup::default();
    let mut join = build_join(&case, &setup, case.equi_join())?;
    let sources = case.sources(setup.src_format, 1)?;
    let ncols = case.targets.len();

    let main_dst = DestStore::new(DestFormat::Row, ncols, 1 << 20)?;
    assert_eq!(join.launch_main(&sources[0], &main_dst)?, KernelStatus::Completed);
    let referenced: Vec<bool> = (0..100).map(|row| join.kmrels().is_referenced(1, row)).collect();

    join.colocate_outer_join_map();
    let outer_dst = DestStore::new(DestFormat::Row, ncols, 1 << 20)?;
    assert_eq!(join.launch_right_outer(1, &outer_dst)?, KernelStatus::Completed);

    // The right outer pass emits the payload of each unreferenced inner row.
    let mut emitted: Vec<Datum> = outer_dst.rows()?.into_iter().map(|row| row[2].clone()).collect();
    let mut unreferenced: Vec<Datum> = case.inners[0]
        .iter()
        .zip(referenced.iter())
        .filter(|(_, r)| !**r)
        .filter_map(|(t, _)| t.attr(1).cloned())
        .collect();
    emitted.sort_by_key(|d| format!("{:?}", d));
    unreferenced.sort_by_key(|d| format!("{:?}", d));

    assert!(!unreferenced.is_empty());
    assert_eq!(emitted, unreferenced);
    assert!(outer_dst.rows()?.iter().all(|row| row[0].is_null()));
    Ok(())
}

#[test]
fn right_outer_requires_flag() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(10, 8, &[Left], 100)?;
    let mut join = build_join(&case, &Setup::default(), case.equi_join())?;
    let dst = DestStore::new(DestFormat::Row, case.targets.len(), 1 << 16)?;

    assert!(join.launch_right_outer(1, &dst).is_err());
    assert!(join.launch_right_outer(2, &dst).is_err());
    Ok(())
}

#[test]
fn statistics_count_every_depth() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(400, 50, &[Inner, Left], 100)?;
    let setup = Setup::default();
    let mut join = build_join(&case, &setup, case.equi_join())?;
    let sources = case.sources(setup.src_format, 2)?;
    let ncols = case.targets.len();

    let dsts = join.run_to_completion(&sources, || Ok(DestStore::new(DestFormat::Row, ncols, 1 << 20)?))?;
    let nrows: u32 = dsts.iter().map(DestStore::nitems).sum();
    let stats = join.stats();

    assert_eq!(stats.source_nitems, 400);
    assert_eq!(stats.outer_nitems, 400);
    assert_eq!(stats.stat_nitems.len(), 2);
    assert_eq!(stats.stat_nitems[1], nrows as u64);
    assert!(stats.stat_nitems[0] <= 400);
    Ok(())
}

/// Filters the source by `payload >= params[0]`.
struct ThresholdJoin {
    inner: EquiJoin,
    payload_col: usize,
}

impl GpuJoinFuncs for ThresholdJoin {
    fn scan_quals(&self, kcxt: &mut KernContext<'_>, tuple: SourceTuple<'_>) -> bool {
        match (kcxt.params().get(0), tuple.attr(self.payload_col)) {
            (Some(Datum::Int(min)), Some(Datum::Int(v))) => v >= min,
            _ => true,
        }
    }

    fn join_quals(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>, inner: &InnerRow<'_>) -> bool {
        self.inner.join_quals(kcxt, depth, outer, inner)
    }

    fn hash_value(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>) -> Option<u32> {
        self.inner.hash_value(kcxt, depth, outer)
    }

    fn projection(&self, kcxt: &mut KernContext<'_>, record: &JoinRecord<'_>, buf: &mut ProjectionBuf) {
        self.inner.projection(kcxt, record, buf)
    }
}

#[test]
fn scan_reads_parameters() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(300, 40, &[Inner], 100)?;
    let payload_col = case.outer_ncols - 1;
    let mut filtered = case.clone();
    filtered
        .outer
        .retain(|t| matches!(t.attr(payload_col), Some(Datum::Int(v)) if *v >= 500));

    let setup = Setup::default();
    let funcs = ThresholdJoin {
        inner: case.equi_join(),
        payload_col,
    };
    let mut join = build_join(&case, &setup, funcs)?;
    join.set_params(ParamBuf::new(vec![Datum::Int(500)]))?;

    let ncols = case.targets.len();
    let dsts = join.run_to_completion(&case.sources(setup.src_format, 1)?, || {
        Ok(DestStore::new(DestFormat::Row, ncols, 1 << 20)?)
    })?;

    assert_eq!(collect_rows(&dsts)?, filtered.expected());
    assert_eq!(join.stats().source_nitems, 300);
    assert_eq!(join.stats().outer_nitems, filtered.outer.len() as u64);
    Ok(())
}

/// Negates the first output column after the payload was placed.
struct NegatingJoin {
    inner: EquiJoin,
}

impl GpuJoinFuncs for NegatingJoin {
    fn join_quals(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>, inner: &InnerRow<'_>) -> bool {
        self.inner.join_quals(kcxt, depth, outer, inner)
    }

    fn hash_value(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>) -> Option<u32> {
        self.inner.hash_value(kcxt, depth, outer)
    }

    fn projection(&self, kcxt: &mut KernContext<'_>, record: &JoinRecord<'_>, buf: &mut ProjectionBuf) {
        self.inner.projection(kcxt, record, buf)
    }

    fn slot_projection(&self, _kcxt: &mut KernContext<'_>, values: &mut Vec<SlotValue>) {
        if let Some(SlotValue::Datum(Datum::Int(v))) = values.first_mut() {
            *v = -*v;
        }
    }
}

#[test]
fn slot_projection_hook_runs_after_placement() -> Result<(), Box<dyn Error>> {
    let case = JoinCase::generate(200, 30, &[Left], 100)?;
    let setup = Setup {
        dst_format: DestFormat::Slot,
        ..Setup::default()
    };
    let mut join = build_join(&case, &setup, NegatingJoin { inner: case.equi_join() })?;
    let ncols = case.targets.len();
    let dsts = join.run_to_completion(&case.sources(setup.src_format, 1)?, || {
        Ok(DestStore::new(DestFormat::Slot, ncols, 1 << 20)?)
    })?;

    let expected: Vec<Vec<Datum>> = case
        .expected_rows()
        .into_iter()
        .map(|mut row| {
            if let Some(Datum::Int(v)) = row.first_mut() {
                *v = -*v;
            }
            row
        })
        .collect();
    assert_eq!(collect_rows(&dsts)?, canonical(expected));
    Ok(())
}

#[test]
fn slot_form_relocates_byte_strings() -> Result<(), Box<dyn Error>> {
    let outer_keys: Vec<Option<i64>> = (0..100).map(|i| Some(i % 13)).collect();
    let inner_keys: Vec<Option<i64>> = (0..13).map(Some).collect();
    let case = JoinCase::with_keys(&outer_keys, &[&inner_keys, &inner_keys], &[Inner, Inner]);
    let dsts = run_join(
        &case,
        &Setup {
            dst_format: DestFormat::Slot,
            dst_length: 4096,
            ..Setup::default()
        },
    )?;

    assert!(dsts.len() > 1);
    assert_eq!(collect_rows(&dsts)?, case.expected());
    Ok(())
}

/// Fails on one specific outer row.
struct FailingJoin {
    inner: EquiJoin,
}

impl GpuJoinFuncs for FailingJoin {
    fn join_quals(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>, inner: &InnerRow<'_>) -> bool {
        self.inner.join_quals(kcxt, depth, outer, inner)
    }

    fn hash_value(&self, kcxt: &mut KernContext<'_>, depth: u32, outer: &JoinRecord<'_>) -> Option<u32> {
        self.inner.hash_value(kcxt, depth, outer)
    }

    fn projection(&self, kcxt: &mut KernContext<'_>, record: &JoinRecord<'_>, buf: &mut ProjectionBuf) {
        if record.datum(0, 1) == &Datum::Bytes(b"o42".to_vec()) {
            kcxt.set_error(ErrorCode::InvalidValue, "Unsupported payload o42");
            return;
        }
        self.inner.projection(kcxt, record, buf)
    }
}

#[test]
fn evaluation_error_aborts_launch() -> Result<(), Box<dyn Error>> {
    let outer_keys: Vec<Option<i64>> = (0..100).map(|i| Some(i % 10)).collect();
    let inner_keys: Vec<Option<i64>> = (0..10).map(Some).collect();
    let case = JoinCase::with_keys(&outer_keys, &[&inner_keys], &[Inner]);
    let setup = Setup::default();
    let mut join = build_join(&case, &setup, FailingJoin { inner: case.equi_join() })?;
    let dst = DestStore::new(DestFormat::Row, case.targets.len(), 1 << 20)?;
    let sources = case.sources(setup.src_format, 1)?;

    let error = join
        .launch_main(&sources[0], &dst)
        .err()
        .ok_or("Expected the launch to fail")?;
    match error.kind() {
        ErrorKind::KernelError { code, message } => {
            assert_eq!(*code, ErrorCode::InvalidValue);
            assert!(message.contains("o42"));
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert_eq!(join.pending(), None);
    Ok(())
}
