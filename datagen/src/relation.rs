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

use data_store::Datum;

use num_traits::FromPrimitive;

use std::convert::TryFrom;
use std::ops::RangeInclusive;

use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use rayon::prelude::*;

/// A join key type. `None` represents the `NULL` key.
pub trait KeyAttribute: Sized + Copy {
    fn try_from_usize(x: usize) -> Result<Self>;
    fn to_datum(key: Option<Self>) -> Datum;
}

impl KeyAttribute for i32 {
    fn try_from_usize(x: usize) -> Result<Self> {
        Self::try_from(x).map_err(|_| {
            ErrorKind::IntegerOverflow("Failed to convert from usize".to_string()).into()
        })
    }

    fn to_datum(key: Option<Self>) -> Datum {
        key.map_or(Datum::Null, |k| Datum::Int(k as i64))
    }
}

impl KeyAttribute for i64 {
    fn try_from_usize(x: usize) -> Result<Self> {
        Self::try_from(x).map_err(|_| {
            ErrorKind::IntegerOverflow("Failed to convert from usize".to_string()).into()
        })
    }

    fn to_datum(key: Option<Self>) -> Datum {
        key.map_or(Datum::Null, Datum::Int)
    }
}

/// Generator for relations with uniform distribution.
pub struct UniformRelation;

impl UniformRelation {
    fn check_selectivity(selectivity: Option<u32>) -> Result<u32> {
        match selectivity.unwrap_or(100) {
            s if s <= 100 => Ok(s),
            s => Err(ErrorKind::InvalidArgument(format!(
                "Selectivity {}% exceeds 100%",
                s
            ))
            .into()),
        }
    }

    /// Generates a primary key attribute.
    ///
    /// The generated keys are unique and contiguous. The key range starts from
    /// 1 and ends at, i.e. including, attr.len(). Keys are placed at random
    /// locations within the slice.
    ///
    /// `selectivity` specifies the join selectivity in percent. The remaining
    /// keys are set to `NULL`. By default (`None`), the selectivity is 100%.
    pub fn gen_primary_key<T: KeyAttribute>(
        attr: &mut [Option<T>],
        selectivity: Option<u32>,
    ) -> Result<()> {
        let selectivity = Self::check_selectivity(selectivity)?;
        let percent = Uniform::from(1..=100);
        let mut rng = thread_rng();

        attr.iter_mut()
            .zip(1..)
            .map(|(x, i)| {
                T::try_from_usize(i).map(|i| {
                    *x = if percent.sample(&mut rng) <= selectivity {
                        Some(i)
                    } else {
                        None
                    };
                })
            })
            .collect::<Result<()>>()?;

        attr.shuffle(&mut rng);
        Ok(())
    }

    /// Generates a primary key attribute in parallel.
    ///
    /// Same as `gen_primary_key`, but the keys are shuffled by sorting on a
    /// random tag.
    pub fn gen_primary_key_par<T: KeyAttribute + Send>(
        attr: &mut [Option<T>],
        selectivity: Option<u32>,
    ) -> Result<()> {
        let selectivity = Self::check_selectivity(selectivity)?;
        let percent = Uniform::from(1..=100);
        let mut shuffled: Vec<(u64, Option<T>)> = (1..(attr.len() + 1))
            .into_par_iter()
            .map_init(thread_rng, |rng, i| {
                T::try_from_usize(i).map(|i| {
                    let val = if percent.sample(rng) <= selectivity {
                        Some(i)
                    } else {
                        None
                    };
                    (rng.gen(), val)
                })
            })
            .collect::<Result<_>>()?;

        shuffled.par_sort_unstable_by_key(|x| x.0);

        attr.par_iter_mut()
            .zip_eq(shuffled.into_par_iter())
            .for_each(|(x, t)| *x = t.1);

        Ok(())
    }

    /// Generates a foreign key attribute based on a primary key attribute.
    ///
    /// The generated keys are sampled from the primary key attribute, that is,
    /// they follow a foreign-key relationship. `NULL` primary keys yield
    /// `NULL` foreign keys. If the foreign key attribute is shorter than the
    /// primary key attribute, some primary keys remain unreferenced.
    pub fn gen_foreign_key_from_primary_key<T: Copy>(
        fk_attr: &mut [Option<T>],
        pk_attr: &[Option<T>],
    ) {
        let mut rng = thread_rng();

        fk_attr
            .iter_mut()
            .zip(pk_attr.iter().cycle())
            .for_each(|(fk, pk)| *fk = *pk);
        fk_attr.shuffle(&mut rng);
    }

    /// Generates a uniformly distributed attribute.
    ///
    /// The generated values are sampled from `range`.
    pub fn gen_attr<T: FromPrimitive>(attr: &mut [T], range: RangeInclusive<usize>) -> Result<()> {
        let mut rng = thread_rng();
        let between = Uniform::from(range);

        attr.iter_mut()
            .map(|x| {
                FromPrimitive::from_usize(between.sample(&mut rng))
                    .ok_or_else(|| {
                        ErrorKind::IntegerOverflow("Failed to convert from usize".to_string())
                            .into()
                    })
                    .map(|r| *x = r)
            })
            .collect::<Result<()>>()?;

        Ok(())
    }

    /// Generates a uniformly distributed attribute in parallel.
    ///
    /// The generated values are sampled from `range`.
    pub fn gen_attr_par<T: FromPrimitive + Send>(
        attr: &mut [T],
        range: RangeInclusive<usize>,
    ) -> Result<()> {
        let between = Uniform::from(range);

        attr.par_iter_mut()
            .map_init(thread_rng, |rng, x| {
                FromPrimitive::from_usize(between.sample(rng))
                    .ok_or_else(|| {
                        ErrorKind::IntegerOverflow("Failed to convert from usize".to_string())
                            .into()
                    })
                    .map(|r| *x = r)
            })
            .collect::<Result<()>>()?;

        Ok(())
    }
}
