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

//! Driver of gridded (deterministic or ensemble) netCDF forecast files.
//!
//! The file is opened only to discover times when the source is created
//! and again for every extraction, so a long batch does not keep
//! hundreds of handles open.

use super::{
    dimensions::{DimensionRoles, Role},
    extractor::{self, ExtractRequest},
    locator::{Grid, GridIndex},
    projection::Projection,
    ForecastSource,
};
use crate::{constants::NC_FILL_F32, errors::SourceError, timeutil, Float};
use log::{debug, warn};
use ndarray::{Array2, Array3, Array4, ArrayD, IxDyn};
use netcdf::AttributeValue;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Station indices located once per source.
#[derive(Clone, Debug)]
struct Located {
    indices: Vec<GridIndex>,
    shape: (usize, usize),
}

#[derive(Debug)]
pub struct GriddedSource {
    path: PathBuf,
    reference_time: Option<i64>,
    leadtimes: Vec<Float>,
    roles: FxHashMap<String, DimensionRoles>,
    located: Option<Located>,
}

impl GriddedSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = netcdf::open(path)?;

        let times = read_times(&file)?;
        let first_time = *times.first().ok_or(SourceError::NoTimes)?;

        let reference_time = match file.variable("forecast_reference_time") {
            Some(var) => read_reference_time(&var)?,
            None => {
                warn!(
                    "forecast_reference_time not found in {}, using the first time",
                    path.display()
                );
                Some(first_time)
            }
        };

        let leadtimes = match reference_time {
            Some(frt) => times
                .iter()
                .map(|t| (t - frt) as Float / 3600.0)
                .collect(),
            None => Vec::new(),
        };

        debug!(
            "Opened {} with {} lead times",
            path.display(),
            leadtimes.len()
        );

        Ok(GriddedSource {
            path: path.to_path_buf(),
            reference_time,
            leadtimes,
            roles: FxHashMap::default(),
            located: None,
        })
    }

    fn field_roles(
        &mut self,
        file: &netcdf::File,
        field: &str,
    ) -> Result<DimensionRoles, SourceError> {
        if let Some(roles) = self.roles.get(field) {
            return Ok(roles.clone());
        }

        let var = file
            .variable(field)
            .ok_or_else(|| SourceError::MissingField(field.to_string()))?;

        let dims: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|d| (d.name(), d.len()))
            .collect();

        let roles = DimensionRoles::resolve(field, &dims)?;
        self.roles.insert(field.to_string(), roles.clone());

        Ok(roles)
    }

    fn locate(
        &mut self,
        file: &netcdf::File,
        lats: &[Float],
        lons: &[Float],
    ) -> Result<Located, SourceError> {
        if let Some(located) = &self.located {
            return Ok(located.clone());
        }

        let grid = read_grid(file)?;
        let located = Located {
            indices: grid.locate(lats, lons),
            shape: grid.shape(),
        };

        let outside = located.indices.iter().filter(|i| i.is_none()).count();
        if outside > 0 {
            debug!(
                "{} of {} stations are outside of the grid of {}",
                outside,
                lats.len(),
                self.path.display()
            );
        }

        self.located = Some(located.clone());

        Ok(located)
    }
}

impl ForecastSource for GriddedSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn reference_time(&self) -> Option<i64> {
        self.reference_time
    }

    fn leadtimes(&self) -> &[Float] {
        &self.leadtimes
    }

    fn extract(
        &mut self,
        lats: &[Float],
        lons: &[Float],
        request: &ExtractRequest,
    ) -> Result<Array3<f32>, SourceError> {
        let file = netcdf::open(&self.path)?;

        let roles = self.field_roles(&file, &request.field)?;
        let located = self.locate(&file, lats, lons)?;

        if (roles.len(Role::Y), roles.len(Role::X)) != located.shape {
            return Err(SourceError::InconsistentGrid(
                "field and coordinates have different horizontal shape",
            ));
        }

        if roles.len(Role::Time) != self.leadtimes.len() {
            return Err(SourceError::Dimensionality(
                request.field.clone(),
                "time axis differs from the time variable".to_string(),
            ));
        }

        let field = read_field(&file, &request.field, &roles)?;

        let members = extractor::select_members(request.members.as_deref(), roles.len(Role::Ensemble))?;
        let mut values = extractor::extract(field.view(), &located.indices, &members, request.hood);

        if request.deacc {
            extractor::deaccumulate(&mut values, request.time_window);
        } else {
            extractor::accumulate(&mut values, request.time_window);
        }

        Ok(values)
    }
}

/// Reads the `time` variable as unix times.
fn read_times(file: &netcdf::File) -> Result<Vec<i64>, SourceError> {
    let var = file.variable("time").ok_or(SourceError::NoTimes)?;

    if var.len() == 0 {
        return Err(SourceError::NoTimes);
    }

    let raw: Vec<f64> = var.get_values(..)?;
    let units = string_attribute(&var, "units");

    raw.into_iter()
        .map(|t| match &units {
            Some(units) => Ok(timeutil::convert_time(t, units)?),
            None => Ok(t.round() as i64),
        })
        .collect()
}

/// Reference time is missing when it holds a fill value.
fn read_reference_time(var: &netcdf::Variable) -> Result<Option<i64>, SourceError> {
    let raw: Vec<f64> = var.get_values(..)?;

    let value = match raw.first() {
        Some(value) => *value,
        None => return Ok(None),
    };

    let fill = numeric_attribute(var, "_FillValue");
    if !value.is_finite() || fill == Some(value) || value as f32 == NC_FILL_F32 {
        return Ok(None);
    }

    match string_attribute(var, "units") {
        Some(units) => Ok(Some(timeutil::convert_time(value, &units)?)),
        None => Ok(Some(value.round() as i64)),
    }
}

/// Discovers the horizontal grid of the file.
///
/// Projection string is searched on all variables and the
/// first one found is used.
fn read_grid(file: &netcdf::File) -> Result<Grid, SourceError> {
    if let (Some(x_var), Some(y_var)) = (file.variable("x"), file.variable("y")) {
        let proj4 = file
            .variables()
            .find_map(|var| string_attribute(&var, "proj4"));

        if let Some(proj4) = proj4 {
            let projection = Projection::from_proj4(&proj4)?;

            let x = read_axis(&x_var, &projection)?;
            let y = read_axis(&y_var, &projection)?;

            return Ok(Grid::Projected { projection, x, y });
        }
    }

    let (lat_var, lon_var) = match (file.variable("latitude"), file.variable("longitude")) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => match (file.variable("lat"), file.variable("lon")) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(SourceError::MissingGrid),
        },
    };

    let lats: Vec<Float> = lat_var.get_values(..)?;
    let lons: Vec<Float> = lon_var.get_values(..)?;

    match (lat_var.dimensions().len(), lon_var.dimensions().len()) {
        (1, 1) => Ok(Grid::Regular { lats, lons }),
        (2, 2) => {
            let dims: Vec<(String, usize)> = lat_var
                .dimensions()
                .iter()
                .map(|d| (d.name(), d.len()))
                .collect();

            if lons.len() != lats.len() {
                return Err(SourceError::InconsistentGrid(
                    "latitude and longitude have different sizes",
                ));
            }

            let shape = (dims[0].1, dims[1].1);
            let lats = Array2::from_shape_vec(shape, lats)
                .map_err(|_| SourceError::InconsistentGrid("latitude shape"))?;
            let lons = Array2::from_shape_vec(shape, lons)
                .map_err(|_| SourceError::InconsistentGrid("longitude shape"))?;

            // coordinates stored as (x, y) are transposed to (y, x)
            if super::dimensions::role_of(&dims[0].0) == Role::X {
                Ok(Grid::Curvilinear {
                    lats: lats.reversed_axes().as_standard_layout().into_owned(),
                    lons: lons.reversed_axes().as_standard_layout().into_owned(),
                })
            } else {
                Ok(Grid::Curvilinear { lats, lons })
            }
        }
        _ => Err(SourceError::InconsistentGrid(
            "latitude and longitude must both be 1-D or 2-D",
        )),
    }
}

/// Reads projected coordinate axis in units of the projection.
fn read_axis(var: &netcdf::Variable, projection: &Projection) -> Result<Vec<Float>, SourceError> {
    let values: Vec<Float> = var.get_values(..)?;

    if projection.is_geographic() {
        return Ok(values);
    }

    let axis_to_meter = match string_attribute(var, "units").as_deref() {
        Some("km") => 1000.0,
        Some("m") | Some("meter") | Some("meters") | Some("metre") | Some("metres") => 1.0,
        _ => return Ok(values),
    };

    let scale = axis_to_meter / projection.to_meter();

    Ok(values.into_iter().map(|v| v * scale).collect())
}

/// Reads whole field, converts source missing values to `NaN`
/// and puts it in canonical layout.
fn read_field(
    file: &netcdf::File,
    field: &str,
    roles: &DimensionRoles,
) -> Result<Array4<f32>, SourceError> {
    let var = file
        .variable(field)
        .ok_or_else(|| SourceError::MissingField(field.to_string()))?;

    let raw: Vec<f32> = var.get_values(..)?;

    let fill = numeric_attribute(&var, "_FillValue").map(|v| v as f32);
    let missing = numeric_attribute(&var, "missing_value").map(|v| v as f32);
    let scale = numeric_attribute(&var, "scale_factor").unwrap_or(1.0) as f32;
    let offset = numeric_attribute(&var, "add_offset").unwrap_or(0.0) as f32;

    let values: Vec<f32> = raw
        .into_iter()
        .map(|v| {
            if Some(v) == fill || Some(v) == missing || v == NC_FILL_F32 {
                f32::NAN
            } else {
                v * scale + offset
            }
        })
        .collect();

    let data = ArrayD::from_shape_vec(IxDyn(roles.shape()), values).map_err(|err| {
        SourceError::Dimensionality(field.to_string(), err.to_string())
    })?;

    roles.normalize(data)
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(value) => Some(value),
        _ => None,
    }
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Schar(v) => Some(f64::from(v)),
        AttributeValue::Uchar(v) => Some(f64::from(v)),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|f| f64::from(*f)),
        _ => None,
    }
}
