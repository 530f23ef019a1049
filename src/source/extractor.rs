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

//! Field extractor pulling values of located cells
//! out of canonical `(time, y, x, ensemble)` fields.
//!
//! The result has shape `(leadtime, location, member_slot)`. Every requested
//! ensemble member contributes `(2 * hood + 1)^2` slots, ordered by member,
//! then row offset, then column offset. No reduction happens here.

use super::locator::GridIndex;
use crate::errors::SourceError;
use ndarray::{s, Array3, ArrayView4, Axis};

/// What to extract from a source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExtractRequest {
    pub field: String,
    /// Explicit ensemble members, all (or the only) members when `None`.
    pub members: Option<Vec<usize>>,
    /// Neighbourhood radius in grid cells.
    pub hood: usize,
    /// Accumulation window in lead time steps.
    pub time_window: usize,
    /// Field is already accumulated and has to be differenced.
    pub deacc: bool,
}

/// Resolves which ensemble members are read from the source.
pub fn select_members(
    requested: Option<&[usize]>,
    available: usize,
) -> Result<Vec<usize>, SourceError> {
    match requested {
        None if available > 1 => Ok((0..available).collect()),
        None => Ok(vec![0]),
        Some(members) => {
            if let Some(member) = members.iter().find(|m| **m >= available) {
                return Err(SourceError::MemberOutOfRange(*member, available));
            }
            Ok(members.to_vec())
        }
    }
}

/// Number of member slots produced for given members and neighbourhood.
pub fn member_slots(members: usize, hood: usize) -> usize {
    let side = 2 * hood + 1;
    members * side * side
}

/// Collects values of located cells (and their neighbourhoods)
/// for every lead time and station. Cells outside the grid are `NaN`.
pub fn extract(
    field: ArrayView4<f32>,
    indices: &[GridIndex],
    members: &[usize],
    hood: usize,
) -> Array3<f32> {
    let (times, rows, cols, _) = field.dim();
    let hood = hood as isize;
    let slots = member_slots(members.len(), hood as usize);

    let mut values = Array3::from_elem((times, indices.len(), slots), f32::NAN);

    for (station, index) in indices.iter().enumerate() {
        let (row, col) = match index {
            Some(index) => *index,
            None => continue,
        };

        let mut slot = 0;

        for member in members {
            for dy in -hood..=hood {
                for dx in -hood..=hood {
                    let (r, c) = (row as isize + dy, col as isize + dx);

                    if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
                        values
                            .slice_mut(s![.., station, slot])
                            .assign(&field.slice(s![.., r as usize, c as usize, *member]));
                    }

                    slot += 1;
                }
            }
        }
    }

    values
}

/// Converts instantaneous values to sums over sliding window
/// of `window` lead times. First `window - 1` lead times are `NaN`.
pub fn accumulate(values: &mut Array3<f32>, window: usize) {
    if window <= 1 {
        return;
    }

    for mut lane in values.lanes_mut(Axis(0)) {
        let raw = lane.to_vec();

        for (t, value) in lane.iter_mut().enumerate() {
            *value = if t + 1 < window {
                f32::NAN
            } else {
                raw[t + 1 - window..=t].iter().sum()
            };
        }
    }
}

/// Differences already accumulated values with fixed lag.
/// First `lag` lead times are `NaN`.
pub fn deaccumulate(values: &mut Array3<f32>, lag: usize) {
    let lag = lag.max(1);

    for mut lane in values.lanes_mut(Axis(0)) {
        let raw = lane.to_vec();

        for (t, value) in lane.iter_mut().enumerate() {
            *value = if t < lag { f32::NAN } else { raw[t] - raw[t - lag] };
        }
    }
}
