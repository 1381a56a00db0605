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


use crate::data_point::DataPoint;
use crate::error::Result;
use std::io::Write;
use std::time::Duration;
use tracing::info;

/// The outcome of one benchmark run.
#[derive(Clone, Copy, Debug)]
pub struct RunResult {
    pub result_rows: u64,
    pub dst_stores: usize,
    pub duration: Duration,
}

/// Runs `func` once as warm-up and `repeat` times measured, and writes one
/// CSV record per run.
pub fn measure<W, F>(repeat: u32, writer: Option<W>, template: DataPoint, mut func: F) -> Result<()>
where
    W: Write,
    F: FnMut() -> Result<RunResult>,
{
    let measurements = (0..=repeat)
        .zip(std::iter::once(true).chain(std::iter::repeat(false)))
        .map(|(run, warm_up)| {
            func().map(|result| {
                info!(
                    run,
                    warm_up,
                    rows = result.result_rows,
                    dst_stores = result.dst_stores,
                    ms = result.duration.as_secs_f64() * 1000.0,
                    "Finished join"
                );
                DataPoint {
                    result_rows: Some(result.result_rows),
                    dst_stores: Some(result.dst_stores),
                    warm_up: Some(warm_up),
                    ns: Some(result.duration.as_nanos() as f64),
                    ..template.clone()
                }
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(w) = writer {
        let mut csv = csv::Writer::from_writer(w);
        measurements.iter().try_for_each(|row| csv.serialize(row))?;
        csv.flush()?;
    }

    Ok(())
}
