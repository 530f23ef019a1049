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

//! Store of the verification archive.
//!
//! All per-time variables are exchanged with the rest of the crate as
//! `(time, leadtime, location, k)` buffers, where `k` is the threshold,
//! quantile or ensemble member axis (length `1` for `fcst` and `obs`).
//! Inside buffers missing values are always `NaN`, the archive fill value
//! is only used on disk.

use crate::{
    constants::{ARCHIVE_CONVENTIONS, NC_FILL_F32},
    errors::ArchiveError,
    input::locations::Location,
    Float,
};
use log::debug;
use ndarray::Array4;
use netcdf::AttributeValue;
use std::path::{Path, PathBuf};

/// Per-time variables of the archive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Field {
    Fcst,
    Obs,
    Cdf,
    Quantiles,
    Ensemble,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Fcst,
        Field::Obs,
        Field::Cdf,
        Field::Quantiles,
        Field::Ensemble,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Fcst => "fcst",
            Field::Obs => "obs",
            Field::Cdf => "cdf",
            Field::Quantiles => "x",
            Field::Ensemble => "ensemble",
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, Field::Fcst | Field::Obs)
    }
}

/// Everything needed to create a new archive.
#[derive(Clone, PartialEq, Debug)]
pub struct Layout {
    pub locations: Vec<Location>,
    pub leadtimes: Vec<f32>,
    pub thresholds: Option<Vec<f32>>,
    pub quantiles: Option<Vec<f32>>,
    pub members: usize,
    pub standard_name: String,
    pub units: Option<String>,
    pub x0: Option<f32>,
    pub x1: Option<f32>,
}

/// Open verification archive.
pub struct Archive {
    path: PathBuf,
    file: netcdf::FileMut,
    times: Vec<i64>,
    leadtimes: Vec<Float>,
    locations: Vec<Location>,
    thresholds: Option<Vec<f32>>,
    quantiles: Option<Vec<f32>>,
    ensemble_size: Option<usize>,
}

impl Archive {
    /// Opens existing archive for update.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }

        let file = netcdf::append(path)?;

        for dim in ["time", "leadtime", "location"] {
            if file.dimension(dim).is_none() {
                return Err(ArchiveError::MissingDimension(dim));
            }
        }

        for field in [Field::Fcst, Field::Obs] {
            if file.variable(field.name()).is_none() {
                return Err(ArchiveError::MissingVariable(field.name()));
            }
        }

        let time_var = coordinate(&file, "time")?;
        let times: Vec<i64> = if time_var.len() == 0 {
            Vec::new()
        } else {
            time_var.get_values(..)?
        };

        let leadtimes: Vec<Float> = coordinate(&file, "leadtime")?.get_values(..)?;
        let ids: Vec<i32> = coordinate(&file, "location")?.get_values(..)?;
        let lats: Vec<Float> = coordinate(&file, "lat")?.get_values(..)?;
        let lons: Vec<Float> = coordinate(&file, "lon")?.get_values(..)?;

        let altitudes: Vec<Float> = match file.variable("altitude") {
            Some(var) => var
                .get_values::<Float, _>(..)?
                .into_iter()
                .map(|a| if a as f32 == NC_FILL_F32 { Float::NAN } else { a })
                .collect(),
            None => vec![Float::NAN; ids.len()],
        };

        if lats.len() != ids.len() || lons.len() != ids.len() || altitudes.len() != ids.len() {
            return Err(ArchiveError::ShapeMismatch("location metadata".to_string()));
        }

        let locations = ids
            .iter()
            .zip(&lats)
            .zip(&lons)
            .zip(&altitudes)
            .map(|(((id, lat), lon), altitude)| Location {
                id: *id,
                lat: *lat,
                lon: *lon,
                altitude: *altitude,
            })
            .collect();

        let thresholds = match file.dimension("threshold") {
            Some(_) => Some(coordinate(&file, "threshold")?.get_values::<f32, _>(..)?),
            None => None,
        };

        let quantiles = match file.dimension("quantile") {
            Some(_) => Some(coordinate(&file, "quantile")?.get_values::<f32, _>(..)?),
            None => None,
        };

        let ensemble_size = file.dimension("ensemble_member").map(|d| d.len());

        debug!(
            "Opened archive {} with {} times, {} lead times and {} locations",
            path.display(),
            times.len(),
            leadtimes.len(),
            ids.len()
        );

        Ok(Archive {
            path: path.to_path_buf(),
            file,
            times,
            leadtimes,
            locations,
            thresholds,
            quantiles,
            ensemble_size,
        })
    }

    /// Creates new archive with empty time axis, in netCDF classic format.
    pub fn create(path: &Path, layout: &Layout) -> Result<Self, ArchiveError> {
        let mut locations = layout.locations.clone();
        locations.sort_by_key(|l| l.id);

        {
            let mut file = netcdf::create_with(path, netcdf::Options::CLASSIC)?;

            file.add_unlimited_dimension("time")?;
            file.add_dimension("leadtime", layout.leadtimes.len())?;
            file.add_dimension("location", locations.len())?;

            if let Some(quantiles) = &layout.quantiles {
                file.add_dimension("quantile", quantiles.len())?;
            }
            if let Some(thresholds) = &layout.thresholds {
                file.add_dimension("threshold", thresholds.len())?;
            }
            if layout.members > 0 {
                file.add_dimension("ensemble_member", layout.members)?;
            }

            file.add_variable::<i32>("time", &["time"])?;

            file.add_variable::<f32>("leadtime", &["leadtime"])?
                .put_values(&layout.leadtimes, ..)?;

            let ids: Vec<i32> = locations.iter().map(|l| l.id).collect();
            file.add_variable::<i32>("location", &["location"])?
                .put_values(&ids, ..)?;

            let columns: [(&str, fn(&Location) -> Float); 3] = [
                ("lat", |l| l.lat),
                ("lon", |l| l.lon),
                ("altitude", |l| l.altitude),
            ];
            for (name, column) in columns {
                let values: Vec<f32> = locations
                    .iter()
                    .map(|l| {
                        let v = column(l) as f32;
                        if v.is_nan() {
                            NC_FILL_F32
                        } else {
                            v
                        }
                    })
                    .collect();
                file.add_variable::<f32>(name, &["location"])?
                    .put_values(&values, ..)?;
            }

            file.add_variable::<f32>("fcst", &["time", "leadtime", "location"])?;
            file.add_variable::<f32>("obs", &["time", "leadtime", "location"])?;

            if let Some(quantiles) = &layout.quantiles {
                file.add_variable::<f32>("quantile", &["quantile"])?
                    .put_values(quantiles, ..)?;
                file.add_variable::<f32>("x", &["time", "leadtime", "location", "quantile"])?;
            }

            if let Some(thresholds) = &layout.thresholds {
                file.add_variable::<f32>("threshold", &["threshold"])?
                    .put_values(thresholds, ..)?;
                file.add_variable::<f32>("cdf", &["time", "leadtime", "location", "threshold"])?;
            }

            if layout.members > 0 {
                file.add_variable::<f32>(
                    "ensemble",
                    &["time", "leadtime", "location", "ensemble_member"],
                )?;
            }

            file.add_attribute("Conventions", ARCHIVE_CONVENTIONS)?;
            file.add_attribute("standard_name", layout.standard_name.as_str())?;
            if let Some(units) = &layout.units {
                file.add_attribute("units", units.as_str())?;
            }
            if let Some(x0) = layout.x0 {
                file.add_attribute("x0", x0)?;
            }
            if let Some(x1) = layout.x1 {
                file.add_attribute("x1", x1)?;
            }
        }

        Archive::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    /// Lead times in hours.
    pub fn leadtimes(&self) -> &[Float] {
        &self.leadtimes
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn thresholds(&self) -> &[f32] {
        self.thresholds.as_deref().unwrap_or(&[])
    }

    pub fn quantiles(&self) -> &[f32] {
        self.quantiles.as_deref().unwrap_or(&[])
    }

    pub fn ensemble_size(&self) -> Option<usize> {
        self.ensemble_size
    }

    /// Length of the trailing axis of the field, `None` when the archive does not hold it.
    pub fn depth(&self, field: Field) -> Option<usize> {
        let depth = match field {
            Field::Fcst | Field::Obs => Some(1),
            Field::Cdf => self.thresholds.as_ref().map(Vec::len),
            Field::Quantiles => self.quantiles.as_ref().map(Vec::len),
            Field::Ensemble => self.ensemble_size,
        }?;

        self.file.variable(field.name()).map(|_| depth)
    }

    /// Fields stored in this archive.
    pub fn fields(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| self.depth(*f).is_some())
            .collect()
    }

    fn buffer_shape(&self, field: Field) -> Result<(usize, usize, usize, usize), ArchiveError> {
        let depth = self
            .depth(field)
            .ok_or(ArchiveError::MissingVariable(field.name()))?;

        Ok((self.times.len(), self.leadtimes.len(), self.locations.len(), depth))
    }

    /// Reads the whole field, fill values become `NaN`.
    pub fn read_buffer(&self, field: Field) -> Result<Array4<f32>, ArchiveError> {
        let shape = self.buffer_shape(field)?;

        if shape.0 == 0 {
            return Ok(Array4::from_elem(shape, f32::NAN));
        }

        let var = self
            .file
            .variable(field.name())
            .ok_or(ArchiveError::MissingVariable(field.name()))?;
        let fill = fill_value(&var);

        let raw: Vec<f32> = var.get_values(..)?;
        let buffer = Array4::from_shape_vec(shape, raw)
            .map_err(|_| ArchiveError::ShapeMismatch(field.name().to_string()))?;

        Ok(buffer.mapv_into(|v| if v == fill || v == NC_FILL_F32 { f32::NAN } else { v }))
    }

    /// Writes the whole field, `NaN` become fill values.
    /// The buffer must cover the current time axis.
    pub fn write_buffer(&mut self, field: Field, buffer: &Array4<f32>) -> Result<(), ArchiveError> {
        let shape = self.buffer_shape(field)?;

        if buffer.dim() != shape {
            return Err(ArchiveError::ShapeMismatch(field.name().to_string()));
        }

        if shape.0 == 0 {
            return Ok(());
        }

        let mut var = self
            .file
            .variable_mut(field.name())
            .ok_or(ArchiveError::MissingVariable(field.name()))?;
        let fill = fill_value(&var);

        let data: Vec<f32> = buffer
            .iter()
            .map(|v| if v.is_nan() { fill } else { *v })
            .collect();

        let (nt, nl, nloc, depth) = shape;

        if field.is_scalar() {
            var.put_values(&data, (0..nt, 0..nl, 0..nloc))?;
        } else {
            var.put_values(&data, (0..nt, 0..nl, 0..nloc, 0..depth))?;
        }

        Ok(())
    }

    /// Replaces the time axis. Times may only be added or reordered.
    pub fn write_times(&mut self, times: &[i64]) -> Result<(), ArchiveError> {
        let raw = times
            .iter()
            .map(|t| i32::try_from(*t).map_err(|_| ArchiveError::TimeOverflow(*t)))
            .collect::<Result<Vec<i32>, ArchiveError>>()?;

        if !raw.is_empty() {
            let mut var = self
                .file
                .variable_mut("time")
                .ok_or(ArchiveError::MissingVariable("time"))?;
            var.put_values(&raw, 0..raw.len())?;
        }

        self.times = times.to_vec();

        Ok(())
    }

    /// Closes and reopens the archive so that written data reach the disk.
    pub fn sync(self) -> Result<Self, ArchiveError> {
        let path = self.path.clone();
        drop(self);

        debug!("Synced archive {}", path.display());

        Archive::open(&path)
    }
}

fn coordinate<'f>(
    file: &'f netcdf::File,
    name: &'static str,
) -> Result<netcdf::Variable<'f>, ArchiveError> {
    file.variable(name)
        .ok_or(ArchiveError::MissingVariable(name))
}

/// Declared `_FillValue` of the variable or the netCDF default.
fn fill_value(var: &netcdf::Variable) -> f32 {
    match var.attribute_value("_FillValue").and_then(Result::ok) {
        Some(AttributeValue::Float(v)) => v,
        Some(AttributeValue::Double(v)) => v as f32,
        _ => NC_FILL_F32,
    }
}

#[cfg(test)]
mod tests {
    use super::{Archive, Field, Layout};
    use crate::errors::ArchiveError;
    use crate::input::locations::Location;
    use ndarray::Array4;
    use std::fs;
    use tempfile::tempdir;

    fn layout() -> Layout {
        Layout {
            locations: vec![
                Location {
                    id: 50540,
                    lat: 60.383,
                    lon: 5.3327,
                    altitude: 12.0,
                },
                Location {
                    id: 18700,
                    lat: 59.9423,
                    lon: 10.72,
                    altitude: 94.0,
                },
            ],
            leadtimes: vec![0.0, 1.0, 2.0],
            thresholds: Some(vec![0.0, 5.0]),
            quantiles: None,
            members: 2,
            standard_name: "air_temperature".to_string(),
            units: Some("K".to_string()),
            x0: None,
            x1: None,
        }
    }

    #[test]
    fn create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verif.nc");

        let archive = Archive::create(&path, &layout()).unwrap();

        assert!(archive.times().is_empty());
        assert_eq!(archive.leadtimes(), &[0.0, 1.0, 2.0]);
        // sorted by id
        assert_eq!(archive.locations()[0].id, 18700);
        assert_eq!(archive.thresholds(), &[0.0, 5.0]);
        assert!(archive.quantiles().is_empty());
        assert_eq!(archive.ensemble_size(), Some(2));
        assert_eq!(
            archive.fields(),
            vec![Field::Fcst, Field::Obs, Field::Cdf, Field::Ensemble]
        );
    }

    #[test]
    fn created_in_classic_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verif.nc");

        Archive::create(&path, &layout()).unwrap();

        let signature = fs::read(&path).unwrap();
        assert!(matches!(&signature[..4], [b'C', b'D', b'F', 1 | 2]));
    }

    #[test]
    fn fill_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verif.nc");

        let mut archive = Archive::create(&path, &layout()).unwrap();
        archive.write_times(&[1_625_097_600, 1_625_140_800]).unwrap();

        let mut buffer = Array4::from_elem((2, 3, 2, 1), f32::NAN);
        buffer[[1, 2, 0, 0]] = 21.5;
        archive.write_buffer(Field::Fcst, &buffer).unwrap();

        let archive = archive.sync().unwrap();
        let read = archive.read_buffer(Field::Fcst).unwrap();

        assert_eq!(archive.times(), &[1_625_097_600, 1_625_140_800]);
        assert_eq!(read[[1, 2, 0, 0]], 21.5);
        assert_eq!(read.iter().filter(|v| v.is_nan()).count(), 11);

        // never written variables read as missing
        assert!(archive.read_buffer(Field::Obs).unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn missing_archive() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Archive::open(&dir.path().join("none.nc")),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn shape_is_checked() {
        let dir = tempdir().unwrap();
        let mut archive = Archive::create(&dir.path().join("verif.nc"), &layout()).unwrap();

        archive.write_times(&[0]).unwrap();
        let buffer = Array4::from_elem((1, 3, 2, 3), 1.0_f32);

        assert!(matches!(
            archive.write_buffer(Field::Ensemble, &buffer),
            Err(ArchiveError::ShapeMismatch(_))
        ));
    }
}
