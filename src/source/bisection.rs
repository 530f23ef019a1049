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

//! Module containg methods for conducting
//! binary search (bisection) of elements closests
//! to searched values in coordinate axes.

use crate::{errors::SearchError, Float};

/// Core bisection function, simply an implementation
/// of binary search algorithm adapted to searching values
/// in-between the set items.
///
/// Works for both ascending and descending arrays.
fn binary_search<T: PartialOrd>(array: &[T], x: &T) -> Result<usize, SearchError> {
    let (first, last) = match (array.first(), array.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(SearchError::EmptyArray),
    };

    if x < first && x < last || x > first && x > last {
        return Err(SearchError::OutOfBounds);
    }

    let mut lo = 0;
    let mut hi = array.len() - 1;

    // if the array is sorted descendingly we use a function with reversed signs
    if first < last {
        while lo < hi {
            let mid = (lo + hi) / 2;

            if array[mid] >= *x {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
    } else {
        while lo < hi {
            let mid = (lo + hi) / 2;

            if array[mid] <= *x {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
    }

    Ok(lo)
}

/// Convienience public method to find a closest value
/// to requested to the left of the searched item.
pub fn find_left_closest<T: PartialOrd>(array: &[T], x: &T) -> Result<usize, SearchError> {
    let found_index = binary_search(array, x)?;
    let ascending = array[0] < array[array.len() - 1];

    let on_left = if ascending {
        array[found_index] <= *x
    } else {
        array[found_index] >= *x
    };

    if on_left {
        Ok(found_index)
    } else {
        found_index.checked_sub(1).ok_or(SearchError::OutOfBounds)
    }
}

/// Fractional position of `x` in a monotone array,
/// linearly interpolated between neighbouring items.
pub fn fractional_index(array: &[Float], x: Float) -> Result<Float, SearchError> {
    // NaN compares false with every bound
    if !x.is_finite() {
        return Err(SearchError::OutOfBounds);
    }

    let left = find_left_closest(array, &x)?;

    if left + 1 >= array.len() || array[left] == x {
        return Ok(left as Float);
    }

    let span = array[left + 1] - array[left];

    Ok(left as Float + (x - array[left]) / span)
}

/// Index of the item nearest to `x` in a monotone array.
/// Values outside the array extent are rejected.
pub fn nearest_index(array: &[Float], x: Float) -> Result<usize, SearchError> {
    let position = fractional_index(array, x)?;

    Ok((position.round() as usize).min(array.len() - 1))
}

#[cfg(test)]
mod tests {
    use super::{find_left_closest, nearest_index};
    use crate::errors::SearchError;

    #[test]
    fn left_closest_in_both_directions() {
        let ascending = [0.0, 1.0, 2.0, 3.0];
        let descending = [3.0, 2.0, 1.0, 0.0];

        assert_eq!(find_left_closest(&ascending, &1.5), Ok(1));
        assert_eq!(find_left_closest(&ascending, &3.0), Ok(3));
        assert_eq!(find_left_closest(&descending, &1.5), Ok(1));
        assert_eq!(find_left_closest(&descending, &3.0), Ok(0));
    }

    #[test]
    fn nearest_rounds_to_closer_neighbour() {
        let axis = [10.0, 20.0, 30.0];

        assert_eq!(nearest_index(&axis, 14.0), Ok(0));
        assert_eq!(nearest_index(&axis, 16.0), Ok(1));
        assert_eq!(nearest_index(&axis, 30.0), Ok(2));
        assert_eq!(nearest_index(&[30.0, 20.0, 10.0], 26.0), Ok(0));
    }

    #[test]
    fn out_of_extent() {
        assert_eq!(nearest_index(&[1.0, 2.0], 2.5), Err(SearchError::OutOfBounds));
        assert_eq!(nearest_index(&[], 2.5), Err(SearchError::EmptyArray));
        assert_eq!(nearest_index(&[5.0], 5.0), Ok(0));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert_eq!(nearest_index(&[0.0, 1.0, 2.0], f64::NAN), Err(SearchError::OutOfBounds));
        assert_eq!(nearest_index(&[5.0], f64::NAN), Err(SearchError::OutOfBounds));
        assert_eq!(nearest_index(&[0.0, 1.0], f64::INFINITY), Err(SearchError::OutOfBounds));
        assert_eq!(find_left_closest(&[5.0], &f64::NAN), Err(SearchError::OutOfBounds));
    }
}
