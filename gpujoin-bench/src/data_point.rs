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
use crate::types::*;
use serde::Serializer;
use serde_derive::Serialize;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DataPoint {
    pub hostname: String,
    pub join_method: Option<ArgJoinMethod>,
    #[serde(serialize_with = "serialize_vec")]
    pub join_types: Option<Vec<String>>,
    pub relations: Option<usize>,
    pub outer_rows: Option<usize>,
    pub inner_rows: Option<usize>,
    pub selectivity: Option<u32>,
    pub src_format: Option<ArgSourceFormat>,
    pub dst_format: Option<ArgDestFormat>,
    pub dst_bytes: Option<usize>,
    pub grid_size: Option<u32>,
    pub block_size: Option<u32>,
    pub pstack_nrooms: Option<u32>,
    pub threads: Option<usize>,
    pub result_rows: Option<u64>,
    pub dst_stores: Option<usize>,
    pub warm_up: Option<bool>,
    pub ns: Option<f64>,
}

impl DataPoint {
    pub fn new() -> Result<Self> {
        let hostname =
            hostname::get_hostname().ok_or_else(|| ErrorKind::from("Couldn't get hostname"))?;

        let dp = DataPoint {
            hostname,
            ..DataPoint::default()
        };

        Ok(dp)
    }
}

/// Serialize `Option<Vec<T>>` as a single comma-separated field.
///
/// The `csv` crate cannot serialize a nested sequence.
fn serialize_vec<S, T>(option: &Option<Vec<T>>, ser: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: ToString,
{
    if let Some(vec) = option {
        let record = vec
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        ser.serialize_str(&record)
    } else {
        ser.serialize_none()
    }
}
