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


use data_store::DestFormat;
use serde_derive::Serialize;
use sql_ops::join::JoinType;
use structopt::clap::arg_enum;

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgJoinMethod {
        NestLoop,
        Hash,
    }
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgSourceFormat {
        Row,
        Block,
        Column,
    }
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgDestFormat {
        Row,
        Slot,
    }
}

impl From<ArgDestFormat> for DestFormat {
    fn from(format: ArgDestFormat) -> Self {
        match format {
            ArgDestFormat::Row => DestFormat::Row,
            ArgDestFormat::Slot => DestFormat::Slot,
        }
    }
}

/// Join type of the inner relation at `depth`, counted from 1.
///
/// `left_outer` and `right_outer` list the depths that are outer joined. A
/// depth in both lists is a full outer join.
pub fn join_type(depth: u32, left_outer: &[u32], right_outer: &[u32]) -> JoinType {
    match (left_outer.contains(&depth), right_outer.contains(&depth)) {
        (false, false) => JoinType::Inner,
        (true, false) => JoinType::Left,
        (false, true) => JoinType::Right,
        (true, true) => JoinType::Full,
    }
}
