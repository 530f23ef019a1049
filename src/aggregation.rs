/*
Copyright 2021 Jakub Lewandowski

This file is part of Verification Archive Builder (verifarc).

Verification Archive Builder (verifarc) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Verification Archive Builder (verifarc) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Verification Archive Builder (verifarc). If not, see https://www.gnu.org/licenses/.
*/

//! Aggregation engine reducing extracted member slots
//! `(leadtime, location, member)` to the fields stored in the archive.
//!
//! Missing members (`NaN`) are ignored by every statistic; when all members
//! of a cell are missing the statistic is missing as well.

use crate::constants::MISSING_OBS_SENTINEL;
use crate::errors::SourceError;
use ndarray::{Array2, Array3, ArrayView1, ArrayView3, Axis, Zip};
use serde::Deserialize;

/// Statistic used as the central estimate of the members.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Mean,
    Median,
    Min,
    Max,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::Mean
    }
}

impl Aggregator {
    fn apply(&self, members: ArrayView1<f32>) -> f32 {
        let valid = members.iter().filter(|v| !v.is_nan());

        match self {
            Aggregator::Mean => {
                let (sum, count) = valid.fold((0.0_f64, 0_usize), |(s, c), v| {
                    (s + f64::from(*v), c + 1)
                });
                if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                }
            }
            Aggregator::Median => percentile(members, 0.5),
            Aggregator::Min => valid.copied().fold(f32::NAN, f32::min),
            Aggregator::Max => valid.copied().fold(f32::NAN, f32::max),
        }
    }
}

/// Linear transformation `value * multiply + add` applied after aggregation.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Scaling {
    pub multiply: f32,
    pub add: f32,
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling {
            multiply: 1.0,
            add: 0.0,
        }
    }
}

impl Scaling {
    /// Values pinned to the missing-observation sentinel stay missing.
    pub fn apply(&self, value: f32) -> f32 {
        if value == MISSING_OBS_SENTINEL {
            f32::NAN
        } else {
            value * self.multiply + self.add
        }
    }
}

/// Settings of the reduction, fixed for a whole run.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Reducer {
    pub aggregator: Aggregator,
    pub thresholds: Vec<f32>,
    pub quantiles: Vec<f32>,
    /// Size of the archive ensemble dimension when members are stored.
    pub ensemble_size: Option<usize>,
    pub scaling: Scaling,
}

/// Fields derived from one source.
#[derive(Clone, PartialEq, Debug)]
pub struct Reduction {
    /// `(leadtime, location)`
    pub central: Array2<f32>,
    /// `(leadtime, location, threshold)`
    pub exceedance: Array3<f32>,
    /// `(leadtime, location, quantile)`
    pub quantiles: Array3<f32>,
    /// `(leadtime, location, ensemble_member)` when kept.
    pub ensemble: Option<Array3<f32>>,
}

impl Reducer {
    pub fn reduce(&self, raw: ArrayView3<f32>) -> Result<Reduction, SourceError> {
        let (leadtimes, locations, members) = raw.dim();

        let ensemble = match self.ensemble_size {
            Some(size) if size != members => {
                return Err(SourceError::EnsembleMismatch(members, size));
            }
            Some(_) => Some(raw.mapv(|v| self.scaling.apply(v))),
            None => None,
        };

        let mut central = Array2::from_elem((leadtimes, locations), f32::NAN);
        let mut exceedance =
            Array3::from_elem((leadtimes, locations, self.thresholds.len()), f32::NAN);
        let mut quantiles =
            Array3::from_elem((leadtimes, locations, self.quantiles.len()), f32::NAN);

        // statistics of the raw members, only the results are scaled
        Zip::from(&mut central)
            .and(exceedance.lanes_mut(Axis(2)))
            .and(quantiles.lanes_mut(Axis(2)))
            .and(raw.lanes(Axis(2)))
            .for_each(|central, mut exceedance, mut quantiles, members| {
                *central = self.scaling.apply(self.aggregator.apply(members));

                for (probability, threshold) in exceedance.iter_mut().zip(&self.thresholds) {
                    *probability = fraction_below(members, *threshold);
                }

                for (value, level) in quantiles.iter_mut().zip(&self.quantiles) {
                    *value = self.scaling.apply(percentile(members, *level));
                }
            });

        Ok(Reduction {
            central,
            exceedance,
            quantiles,
            ensemble,
        })
    }
}

/// Fraction of valid members strictly below threshold.
fn fraction_below(members: ArrayView1<f32>, threshold: f32) -> f32 {
    let (below, valid) = members
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0_usize, 0_usize), |(b, n), v| {
            (b + usize::from(*v < threshold), n + 1)
        });

    if valid == 0 {
        f32::NAN
    } else {
        below as f32 / valid as f32
    }
}

/// Empirical percentile (`level` in `[0, 1]`) with linear interpolation
/// between order statistics.
fn percentile(members: ArrayView1<f32>, level: f32) -> f32 {
    if members.iter().any(|v| v.is_nan()) {
        nan_percentile(members, level)
    } else {
        exact_percentile(members.to_vec(), level)
    }
}

fn exact_percentile(mut values: Vec<f32>, level: f32) -> f32 {
    values.sort_by(f32::total_cmp);
    interpolate_sorted(&values, level)
}

/// Slower path skipping missing members.
fn nan_percentile(members: ArrayView1<f32>, level: f32) -> f32 {
    let mut values: Vec<f32> = members.iter().copied().filter(|v| !v.is_nan()).collect();
    values.sort_by(f32::total_cmp);
    interpolate_sorted(&values, level)
}

fn interpolate_sorted(sorted: &[f32], level: f32) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }

    let position = f64::from(level.clamp(0.0, 1.0)) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;

    let (lo, hi) = (f64::from(sorted[lower]), f64::from(sorted[upper]));

    (lo + (hi - lo) * weight) as f32
}

#[cfg(test)]
mod tests {
    use super::{percentile, Aggregator, Reducer, Scaling};
    use crate::errors::SourceError;
    use float_cmp::approx_eq;
    use ndarray::{arr1, arr3, Array3};

    fn reducer(aggregator: Aggregator) -> Reducer {
        Reducer {
            aggregator,
            ..Reducer::default()
        }
    }

    #[test]
    fn central_estimates() {
        let raw = arr3(&[[[3.0_f32, 5.0]]]);

        assert_eq!(reducer(Aggregator::Mean).reduce(raw.view()).unwrap().central[[0, 0]], 4.0);
        assert_eq!(reducer(Aggregator::Min).reduce(raw.view()).unwrap().central[[0, 0]], 3.0);
        assert_eq!(reducer(Aggregator::Max).reduce(raw.view()).unwrap().central[[0, 0]], 5.0);
        assert_eq!(reducer(Aggregator::Median).reduce(raw.view()).unwrap().central[[0, 0]], 4.0);
    }

    #[test]
    fn missing_members_are_ignored() {
        let raw = arr3(&[[[3.0_f32, f32::NAN, 7.0], [f32::NAN, f32::NAN, f32::NAN]]]);

        for aggregator in [Aggregator::Mean, Aggregator::Median, Aggregator::Min, Aggregator::Max] {
            let reduction = reducer(aggregator).reduce(raw.view()).unwrap();
            assert!(!reduction.central[[0, 0]].is_nan());
            assert!(reduction.central[[0, 1]].is_nan());
        }

        let mean = reducer(Aggregator::Mean).reduce(raw.view()).unwrap();
        assert_eq!(mean.central[[0, 0]], 5.0);
    }

    #[test]
    fn exceedance_probabilities() {
        let raw = arr3(&[[[1.0_f32, 2.0, f32::NAN, 4.0, 5.0], [f32::NAN; 5]]]);
        let reducer = Reducer {
            thresholds: vec![0.5, 2.0, 4.5, 10.0],
            ..Reducer::default()
        };

        let reduction = reducer.reduce(raw.view()).unwrap();

        assert_eq!(reduction.exceedance[[0, 0, 0]], 0.0);
        // strictly less than: 2.0 itself is not counted
        assert_eq!(reduction.exceedance[[0, 0, 1]], 0.25);
        assert_eq!(reduction.exceedance[[0, 0, 2]], 0.75);
        assert_eq!(reduction.exceedance[[0, 0, 3]], 1.0);
        assert!(reduction.exceedance[[0, 1, 0]].is_nan());
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let raw = arr3(&[[[4.0_f32, 1.0, 3.0, 2.0]]]);
        let reducer = Reducer {
            quantiles: vec![0.0, 0.1, 0.5, 1.0],
            ..Reducer::default()
        };

        let reduction = reducer.reduce(raw.view()).unwrap();

        assert_eq!(reduction.quantiles[[0, 0, 0]], 1.0);
        assert!(approx_eq!(f32, reduction.quantiles[[0, 0, 1]], 1.3, ulps = 4));
        assert_eq!(reduction.quantiles[[0, 0, 2]], 2.5);
        assert_eq!(reduction.quantiles[[0, 0, 3]], 4.0);
    }

    #[test]
    fn masked_and_exact_percentiles_agree() {
        let full = arr1(&[2.0_f32, 8.0, 4.0, 6.0]);
        let masked = arr1(&[2.0_f32, f32::NAN, 8.0, 4.0, f32::NAN, 6.0]);

        for level in [0.0, 0.25, 0.33, 0.5, 0.9, 1.0] {
            assert_eq!(percentile(full.view(), level), percentile(masked.view(), level));
        }
    }

    #[test]
    fn ensemble_pass_through() {
        let raw = Array3::from_shape_fn((2, 1, 3), |(t, _, e)| (t * 10 + e) as f32);
        let mut reducer = Reducer {
            ensemble_size: Some(3),
            ..Reducer::default()
        };

        let ensemble = reducer.reduce(raw.view()).unwrap().ensemble.unwrap();
        assert_eq!(ensemble, raw);

        reducer.ensemble_size = Some(2);
        assert!(matches!(
            reducer.reduce(raw.view()),
            Err(SourceError::EnsembleMismatch(3, 2))
        ));
    }

    #[test]
    fn scaling_after_aggregation() {
        let raw = arr3(&[[[3.0_f32, 5.0]], [[-999.0, -999.0]]]);
        let reducer = Reducer {
            scaling: Scaling {
                multiply: 2.0,
                add: 1.0,
            },
            thresholds: vec![4.0],
            ..Reducer::default()
        };

        let reduction = reducer.reduce(raw.view()).unwrap();

        assert_eq!(reduction.central[[0, 0]], 9.0);
        // thresholds compare with unscaled members
        assert_eq!(reduction.exceedance[[0, 0, 0]], 0.5);
        assert!(reduction.central[[1, 0]].is_nan());
    }

    #[test]
    fn negative_multiplier_scales_the_statistic() {
        let raw = arr3(&[[[3.0_f32, 5.0]], [[-999.0, 1.0]]]);
        let reducer = Reducer {
            aggregator: Aggregator::Max,
            quantiles: vec![0.9],
            ensemble_size: Some(2),
            scaling: Scaling {
                multiply: -1.0,
                add: 0.0,
            },
            ..Reducer::default()
        };

        let reduction = reducer.reduce(raw.view()).unwrap();

        assert_eq!(reduction.central[[0, 0]], -5.0);
        assert!(approx_eq!(f32, reduction.quantiles[[0, 0, 0]], -4.8, ulps = 4));
        assert_eq!(reduction.central[[1, 0]], -1.0);

        let ensemble = reduction.ensemble.unwrap();
        assert_eq!(ensemble[[0, 0, 1]], -5.0);
        assert!(ensemble[[1, 0, 0]].is_nan());

        let mean = Reducer {
            scaling: Scaling {
                multiply: -1.0,
                add: 0.0,
            },
            ..Reducer::default()
        };
        // the sentinel is a member like any other before aggregation
        assert_eq!(mean.reduce(raw.view()).unwrap().central[[1, 0]], 499.0);
    }
}
