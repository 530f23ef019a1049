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

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Error while reading run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while accessing the archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Unrecoverable error in source {0:?}: {1}")]
    Source(PathBuf, SourceError),

    #[error("Error while reading locations: {0}")]
    Locations(#[from] InputError),

    #[error("Cannot set the memory limit of {0} MB")]
    MemoryLimit(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open run configuration: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize run configuration: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Archive is missing variable {0}")]
    MissingVariable(&'static str),

    #[error("Archive is missing dimension {0}")]
    MissingDimension(&'static str),

    #[error("Buffer of variable {0} does not match the archive shape")]
    ShapeMismatch(String),

    #[error("Initialization time {0} does not fit into the archive time variable")]
    TimeOverflow(i64),
}

/// Errors raised while reading or extracting a single forecast source.
///
/// Most of them only cause the source to be skipped, see [`SourceError::is_fatal`].
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Cannot open source: {0}")]
    CantOpen(#[from] netcdf::Error),

    #[error("Cannot read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognised source format")]
    UnknownFormat,

    #[error("Source does not have any time steps")]
    NoTimes,

    #[error("Field {0} is not present in the source")]
    MissingField(String),

    #[error("Field {0} has no time dimension")]
    NoTimeDimension(String),

    #[error("Field {0} has unexpected dimensionality: {1}")]
    Dimensionality(String, String),

    #[error("Ensemble member {0} requested but source has {1} members")]
    MemberOutOfRange(usize, usize),

    #[error("Extracted {0} ensemble members but the archive holds {1}")]
    EnsembleMismatch(usize, usize),

    #[error("Grid has neither latitude/longitude nor projection information")]
    MissingGrid,

    #[error("Grid coordinates are inconsistent: {0}")]
    InconsistentGrid(&'static str),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Cannot convert source time: {0}")]
    Time(#[from] TimeError),

    #[error("Cannot read observations: {0}")]
    Input(#[from] InputError),
}

impl SourceError {
    /// Errors that no other source of the batch could avoid either,
    /// so continuing the run makes no sense.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::MissingGrid | SourceError::EnsembleMismatch(_, _)
        )
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ProjectionError {
    #[error("Projection parameters are incorrect: {0}")]
    IncorrectParams(&'static str),

    #[error("Projection {0} is not supported")]
    Unsupported(String),

    #[error("Cannot parse projection parameter {0}")]
    CantParse(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SearchError {
    #[error("Searched array is empty")]
    EmptyArray,

    #[error("Searched value is out of array bounds")]
    OutOfBounds,
}

/// Errors of text inputs (observations and locations).
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Cannot read input file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse delimited input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Input {0:?} has unrecognised format")]
    UnknownFormat(PathBuf),

    #[error("Header is missing column {0}")]
    MissingColumn(String),

    #[error("Input contains no usable records")]
    Empty,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimeError {
    #[error("Unsupported time units: {0}")]
    UnsupportedUnits(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}
