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

//! Module responsible for parsing and checking the run configuration.
//!
//! The run configuration uses [YAML](https://en.wikipedia.org/wiki/YAML)
//! and `serde` to enforce strong typing. One run performs exactly one task
//! on one archive:
//!
//! ```yaml
//! archive: verif.nc
//! task:
//!   addfcst:
//!     files: [fc_2021070100.nc, fc_2021070112.nc]
//!     variable: air_temperature_2m
//!     policy: overwrite
//! resources:
//!   memory: 4096
//! ```
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside the configuration file.

use crate::{aggregation::Aggregator, errors::ConfigError, Float};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// How values of a source are combined with values already in the archive.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Later source wins a cell.
    Overwrite,
    /// First writer wins, filled cells are never touched.
    FillMissing,
}

impl WritePolicy {
    /// Decides whether a new value replaces the stored one.
    /// A missing new value never erases stored data.
    pub fn admits(&self, stored: f32, new: f32) -> bool {
        if new.is_nan() {
            return false;
        }

        match self {
            WritePolicy::Overwrite => true,
            WritePolicy::FillMissing => stored.is_nan(),
        }
    }
}

/// Options of adding gridded forecasts.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct AddFcst {
    /// Forecast files, processed in the given order.
    pub files: Vec<PathBuf>,

    /// Name of the field in forecast files.
    pub variable: String,

    /// _(Optional)_ Ensemble members to use. By default the only member
    /// of deterministic sources or all members of ensembles.
    #[serde(default)]
    pub members: Option<Vec<usize>>,

    /// _(Optional)_ Central estimate of members. Defaults to `mean`.
    #[serde(default)]
    pub aggregator: Aggregator,

    /// _(Optional)_ Neighbourhood radius in grid cells. Defaults to `0`.
    #[serde(default)]
    pub hood: usize,

    /// _(Optional)_ Accumulation window in lead time steps. Defaults to `1`
    /// (instantaneous values).
    #[serde(default = "AddFcst::default_time_window")]
    pub time_window: usize,

    /// _(Optional)_ Field is accumulated since the forecast start
    /// and has to be differenced over `time_window` steps.
    #[serde(default)]
    pub deacc: bool,

    /// _(Optional)_ Hours after the forecast reference time for which
    /// the forecast is repeated as a later initialization. Defaults to `[0]`.
    #[serde(default = "AddFcst::default_repeats")]
    pub repeats: Vec<Float>,

    /// _(Optional)_ Defaults to `fill_missing`.
    #[serde(default = "AddFcst::default_policy")]
    pub policy: WritePolicy,

    /// _(Optional)_ Sort the time axis of the archive. Defaults to `false`.
    #[serde(default)]
    pub sort: bool,

    /// _(Optional)_ Discard forecasts already stored in the archive.
    #[serde(default)]
    pub clear: bool,

    /// _(Optional)_ Write the archive to disk after every this many sources.
    #[serde(default)]
    pub sync_every: Option<usize>,

    #[serde(default = "default_multiply")]
    pub multiply: f32,

    #[serde(default)]
    pub add: f32,

    /// _(Optional)_ Store raw members when the archive has an ensemble
    /// dimension. Defaults to `true`.
    #[serde(default = "default_true")]
    pub write_ensemble: bool,
}

impl AddFcst {
    fn default_time_window() -> usize {
        1
    }

    fn default_repeats() -> Vec<Float> {
        vec![0.0]
    }

    fn default_policy() -> WritePolicy {
        WritePolicy::FillMissing
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::OutOfBounds("No forecast files provided"));
        }

        if self.time_window < 1 {
            return Err(ConfigError::OutOfBounds("Time window cannot be less than 1"));
        }

        if self.repeats.is_empty() {
            return Err(ConfigError::OutOfBounds("Repeats list cannot be empty"));
        }

        if self.repeats.iter().any(|r| !r.is_finite()) {
            return Err(ConfigError::OutOfBounds("Repeats must be finite numbers of hours"));
        }

        if matches!(&self.members, Some(members) if members.is_empty()) {
            return Err(ConfigError::OutOfBounds("Members list cannot be empty"));
        }

        if self.sync_every == Some(0) {
            return Err(ConfigError::OutOfBounds("Sync interval cannot be 0"));
        }

        check_scaling(self.multiply, self.add)
    }
}

/// Options of adding point observations.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct AddObs {
    pub files: Vec<PathBuf>,

    /// Name of the observed variable column.
    pub variable: String,

    /// _(Optional)_ Hours of the day (UTC) at which forecasts are initialized.
    /// Defaults to `[0]`.
    #[serde(default = "AddObs::default_init_hours")]
    pub init_hours: Vec<Float>,

    /// _(Optional)_ Values outside of `[min, max]` are treated as missing.
    #[serde(default)]
    pub force_range: Option<(f32, f32)>,

    #[serde(default)]
    pub sort: bool,

    #[serde(default)]
    pub clear: bool,

    /// _(Optional)_ Defaults to `overwrite`.
    #[serde(default = "AddObs::default_policy")]
    pub policy: WritePolicy,

    #[serde(default = "default_multiply")]
    pub multiply: f32,

    #[serde(default)]
    pub add: f32,
}

impl AddObs {
    fn default_init_hours() -> Vec<Float> {
        vec![0.0]
    }

    fn default_policy() -> WritePolicy {
        WritePolicy::Overwrite
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::OutOfBounds("No observation files provided"));
        }

        if self.init_hours.iter().any(|h| !(0.0..24.0).contains(h)) {
            return Err(ConfigError::OutOfBounds(
                "Initialization hours must be within 0 and 24",
            ));
        }

        if let Some((min, max)) = self.force_range {
            if min > max {
                return Err(ConfigError::OutOfBounds(
                    "Lower bound of forced range is above the upper bound",
                ));
            }
        }

        check_scaling(self.multiply, self.add)
    }
}

/// Options of creating a new archive.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Init {
    /// Station metadata file (KDVH or comps format).
    pub locations: PathBuf,

    /// Lead times in hours.
    pub leadtimes: Vec<f32>,

    #[serde(default = "Init::default_standard_name")]
    pub standard_name: String,

    #[serde(default)]
    pub units: Option<String>,

    #[serde(default)]
    pub quantiles: Option<Vec<f32>>,

    #[serde(default)]
    pub thresholds: Option<Vec<f32>>,

    /// _(Optional)_ Number of stored ensemble members, `0` for none.
    #[serde(default)]
    pub members: usize,

    /// _(Optional)_ Lower boundary of a discrete mass (e.g. `0` for precipitation).
    #[serde(default)]
    pub x0: Option<f32>,

    /// _(Optional)_ Upper boundary of a discrete mass (e.g. `100` for humidity).
    #[serde(default)]
    pub x1: Option<f32>,
}

impl Init {
    fn default_standard_name() -> String {
        "Unknown".to_string()
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.leadtimes.is_empty() {
            return Err(ConfigError::OutOfBounds("Lead times list cannot be empty"));
        }

        if self.leadtimes.iter().any(|lt| !lt.is_finite()) {
            return Err(ConfigError::OutOfBounds("Lead times must be finite"));
        }

        if let Some(quantiles) = &self.quantiles {
            if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
                return Err(ConfigError::OutOfBounds("Quantiles must be within 0 and 1"));
            }
        }

        if let Some(thresholds) = &self.thresholds {
            if thresholds.iter().any(|t| !t.is_finite()) {
                return Err(ConfigError::OutOfBounds("Thresholds must be finite"));
            }
        }

        Ok(())
    }
}

/// Task performed in the run.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Init(Init),
    AddFcst(AddFcst),
    AddObs(AddObs),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Init(_) => "init",
            Task::AddFcst(_) => "addfcst",
            Task::AddObs(_) => "addobs",
        }
    }
}

/// _(Optional)_ Fields with information about
/// resources available for the run.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Resources {
    /// _(Optional)_ Heap memory limit in MB.
    ///
    /// Cannot be less than `128`. Defaults to whole addressable space.
    ///
    /// With the limit set, exhausting memory on a large archive
    /// aborts with an out-of-memory message instead of the process
    /// being killed by the system without any information.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_memory() -> usize {
        usize::MAX / (1024 * 1024)
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            memory: Resources::default_memory(),
        }
    }
}

/// Main config structure representing the fields in
/// the run configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Config {
    /// Path of the verification archive.
    pub archive: PathBuf,

    pub task: Task,

    #[serde(default)]
    pub resources: Resources,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        let config: Config = serde_yaml::from_slice(data.as_slice())?;

        config.check_bounds()?;

        Ok(config)
    }

    fn check_bounds(&self) -> Result<(), ConfigError> {
        match &self.task {
            Task::Init(init) => init.check_bounds()?,
            Task::AddFcst(addfcst) => addfcst.check_bounds()?,
            Task::AddObs(addobs) => addobs.check_bounds()?,
        }

        self.resources.check_bounds()
    }
}

fn default_multiply() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn check_scaling(multiply: f32, add: f32) -> Result<(), ConfigError> {
    if !multiply.is_finite() || !add.is_finite() {
        return Err(ConfigError::OutOfBounds("Scaling factors must be finite"));
    }

    Ok(())
}
