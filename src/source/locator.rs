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

//! Spatial locator finding the grid cell nearest
//! to every station of the archive.
//!
//! Three strategies are used depending on what the source describes:
//!
//! - projected grids (proj4 string and `x`/`y` axes): stations are projected
//!   and searched by bisection in both axes,
//! - regular lat/lon grids (1-D axes): nearest value searched in each axis,
//! - curvilinear lat/lon fields (2-D): brute-force great-circle nearest neighbour.

use super::{bisection, projection::Projection};
use crate::{constants::EARTH_RADIUS, Float};
use log::debug;
use ndarray::Array2;

/// Row (y) and column (x) of the located cell,
/// `None` when the station is outside of the grid.
pub type GridIndex = Option<(usize, usize)>;

/// Horizontal grid of a forecast source.
#[derive(Clone, Debug)]
pub enum Grid {
    Projected {
        projection: Projection,
        x: Vec<Float>,
        y: Vec<Float>,
    },
    Regular {
        lats: Vec<Float>,
        lons: Vec<Float>,
    },
    Curvilinear {
        lats: Array2<Float>,
        lons: Array2<Float>,
    },
}

impl Grid {
    /// Finds nearest grid cell for each station.
    pub fn locate(&self, lats: &[Float], lons: &[Float]) -> Vec<GridIndex> {
        match self {
            Grid::Projected { projection, x, y } => {
                debug!("Locating {} stations on projected grid", lats.len());
                locate_projected(projection, x, y, lats, lons)
            }
            Grid::Regular {
                lats: grid_lats,
                lons: grid_lons,
            } => {
                debug!("Locating {} stations on regular grid", lats.len());
                locate_regular(grid_lats, grid_lons, lats, lons)
            }
            Grid::Curvilinear {
                lats: grid_lats,
                lons: grid_lons,
            } => {
                debug!(
                    "Could not find projection, computing nearest neighbour of {} stations from lat/lon",
                    lats.len()
                );
                locate_curvilinear(grid_lats, grid_lons, lats, lons)
            }
        }
    }

    /// Number of rows and columns of the grid.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Grid::Projected { x, y, .. } => (y.len(), x.len()),
            Grid::Regular { lats, lons } => (lats.len(), lons.len()),
            Grid::Curvilinear { lats, .. } => lats.dim(),
        }
    }
}

/// Coordinate axis sorted ascendingly with the mapping
/// back to the native order of the grid.
struct SortedAxis {
    values: Vec<Float>,
    native: Vec<usize>,
}

impl SortedAxis {
    fn new(axis: &[Float]) -> Self {
        let mut native: Vec<usize> = (0..axis.len()).collect();
        native.sort_by(|a, b| axis[*a].total_cmp(&axis[*b]));
        let values = native.iter().map(|i| axis[*i]).collect();

        SortedAxis { values, native }
    }

    /// Nearest item, rejecting values outside of the axis extent.
    fn nearest(&self, x: Float) -> Option<usize> {
        bisection::nearest_index(&self.values, x)
            .ok()
            .map(|i| self.native[i])
    }

    /// Nearest item, accepting values up to half a grid step outside of the axis.
    fn nearest_within_half_step(&self, x: Float) -> Option<usize> {
        let (first, last) = (*self.values.first()?, *self.values.last()?);

        if !x.is_finite() {
            return None;
        }

        if self.values.len() == 1 {
            return Some(self.native[0]);
        }

        let half_step = 0.5 * (self.values[1] - self.values[0]).abs();

        let x = if x < first && first - x <= half_step {
            first
        } else if x > last && x - last <= half_step {
            last
        } else {
            x
        };

        self.nearest(x)
    }
}

fn locate_projected(
    projection: &Projection,
    x: &[Float],
    y: &[Float],
    lats: &[Float],
    lons: &[Float],
) -> Vec<GridIndex> {
    let x_axis = SortedAxis::new(x);
    let y_axis = SortedAxis::new(y);
    let (x_min, x_max) = (
        x_axis.values.first().copied().unwrap_or(0.0),
        x_axis.values.last().copied().unwrap_or(0.0),
    );

    lats.iter()
        .zip(lons)
        .map(|(lat, lon)| {
            let lon = if projection.is_geographic() {
                convert_to_axis_longitudes(*lon, x_min, x_max)
            } else {
                *lon
            };

            let (xx, yy) = projection.project(lon, *lat);

            Some((y_axis.nearest(yy)?, x_axis.nearest(xx)?))
        })
        .collect()
}

fn locate_regular(
    grid_lats: &[Float],
    grid_lons: &[Float],
    lats: &[Float],
    lons: &[Float],
) -> Vec<GridIndex> {
    let lat_axis = SortedAxis::new(grid_lats);
    let lon_axis = SortedAxis::new(grid_lons);
    let (lon_min, lon_max) = (
        lon_axis.values.first().copied().unwrap_or(0.0),
        lon_axis.values.last().copied().unwrap_or(0.0),
    );

    lats.iter()
        .zip(lons)
        .map(|(lat, lon)| {
            let lon = convert_to_axis_longitudes(*lon, lon_min, lon_max);

            Some((
                lat_axis.nearest_within_half_step(*lat)?,
                lon_axis.nearest_within_half_step(lon)?,
            ))
        })
        .collect()
}

/// Deliberately slow fallback, O(stations * cells).
fn locate_curvilinear(
    grid_lats: &Array2<Float>,
    grid_lons: &Array2<Float>,
    lats: &[Float],
    lons: &[Float],
) -> Vec<GridIndex> {
    lats.iter()
        .zip(lons)
        .map(|(lat, lon)| {
            let mut best: Option<((usize, usize), Float)> = None;

            for ((index, cell_lat), cell_lon) in grid_lats.indexed_iter().zip(grid_lons.iter()) {
                let distance = great_circle_distance(*lat, *lon, *cell_lat, *cell_lon);

                if distance.is_nan() {
                    continue;
                }

                match best {
                    Some((_, shortest)) if shortest <= distance => {}
                    _ => best = Some((index, distance)),
                }
            }

            best.map(|(index, _)| index)
        })
        .collect()
}

/// Converts station longitude to the convention used
/// by the grid axis (`-180..180` or `0..360`).
fn convert_to_axis_longitudes(longitude: Float, axis_min: Float, axis_max: Float) -> Float {
    if longitude < 0.0 && axis_max > 180.0 {
        return longitude + 360.0;
    }

    if longitude > 180.0 && axis_min < 0.0 {
        return longitude - 360.0;
    }

    longitude
}

/// Haversine distance on a sphere of mean Earth radius, in metres.
pub fn great_circle_distance(lat1: Float, lon1: Float, lat2: Float, lon2: Float) -> Float {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = phi2 - phi1;
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::{great_circle_distance, Grid};
    use crate::source::projection::Projection;
    use float_cmp::approx_eq;
    use ndarray::Array2;

    #[test]
    fn projected_grid_with_descending_axis() {
        let projection = Projection::from_proj4(
            "+proj=lcc +lat_0=63 +lon_0=15 +lat_1=63 +lat_2=63 +R=6.371e+06",
        )
        .unwrap();

        // 2.5 km grid centred at the projection origin, y stored north to south
        let x: Vec<f64> = (-2..=2).map(|i| i as f64 * 2500.0).collect();
        let y: Vec<f64> = (-2..=2).rev().map(|i| i as f64 * 2500.0).collect();

        let grid = Grid::Projected { projection, x, y };
        let indices = grid.locate(&[63.0, 63.02, 70.0], &[15.0, 15.0, 15.0]);

        assert_eq!(indices[0], Some((2, 2)));
        // about 2.2 km north: one row up, which is a lower row index here
        assert_eq!(indices[1], Some((1, 2)));
        assert_eq!(indices[2], None);
    }

    #[test]
    fn stations_without_coordinates_are_not_located() {
        let projection = Projection::from_proj4(
            "+proj=lcc +lat_0=63 +lon_0=15 +lat_1=63 +lat_2=63 +R=6.371e+06",
        )
        .unwrap();

        let projected = Grid::Projected {
            projection,
            x: vec![0.0],
            y: vec![-2500.0, 0.0, 2500.0],
        };
        let regular = Grid::Regular {
            lats: vec![63.0],
            lons: vec![15.0],
        };

        for grid in [projected, regular] {
            let indices = grid.locate(&[f64::NAN, 63.0], &[15.0, f64::NAN]);
            assert_eq!(indices, vec![None, None]);
        }
    }

    #[test]
    fn regular_grid_wraps_longitudes() {
        let grid = Grid::Regular {
            lats: vec![60.0, 61.0, 62.0],
            lons: vec![350.0, 351.0, 352.0],
        };

        let indices = grid.locate(&[61.2, 62.4, 65.0], &[-8.9, -8.0, -9.0]);

        assert_eq!(indices, vec![Some((1, 1)), Some((2, 2)), None]);
    }

    #[test]
    fn curvilinear_brute_force() {
        let lats = Array2::from_shape_fn((3, 3), |(i, j)| 59.0 + i as f64 + 0.1 * j as f64);
        let lons = Array2::from_shape_fn((3, 3), |(i, j)| 10.0 + j as f64 + 0.1 * i as f64);

        let grid = Grid::Curvilinear { lats, lons };
        let indices = grid.locate(&[60.05, 61.3], &[11.9, 9.0]);

        assert_eq!(indices, vec![Some((1, 2)), Some((2, 0))]);
    }

    #[test]
    fn haversine() {
        let one_degree = great_circle_distance(0.0, 0.0, 1.0, 0.0);
        assert!(approx_eq!(f64, one_degree, 111_194.9, epsilon = 1.0));
        assert!(approx_eq!(f64, great_circle_distance(10.0, 10.0, 10.0, 10.0), 0.0));
    }
}
