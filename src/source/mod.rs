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

//! Module responsible for reading forecast sources
//! and extracting their values at archive stations.
//!
//! Every file format is a variant of [`SourceDriver`], selected by
//! sniffing the file content. The rest of the crate only talks to
//! sources through the [`ForecastSource`] trait.

mod bisection;
pub mod dimensions;
pub mod extractor;
mod gridded;
pub mod locator;
pub mod projection;

use crate::{errors::SourceError, timeutil, Float};
use extractor::ExtractRequest;
use gridded::GriddedSource;
use ndarray::Array3;
use std::{fs::File, io::Read, path::Path};

/// Capabilities shared by all forecast source formats.
pub trait ForecastSource {
    fn path(&self) -> &Path;

    /// Initialization time of the forecast, `None` when the file does not define it.
    fn reference_time(&self) -> Option<i64>;

    /// Lead times (hours since reference time) of the time steps in the file.
    fn leadtimes(&self) -> &[Float];

    /// Extracts values `(leadtime, location, member_slot)` at given stations.
    fn extract(
        &mut self,
        lats: &[Float],
        lons: &[Float],
        request: &ExtractRequest,
    ) -> Result<Array3<f32>, SourceError>;

    /// Reference times this source is used for, one per delay (hours).
    fn candidate_times(&self, delays: &[Float]) -> Vec<i64> {
        match self.reference_time() {
            Some(frt) => delays
                .iter()
                .map(|delay| frt + timeutil::hours_to_seconds(*delay))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Forecast source formats.
#[derive(Debug)]
pub enum SourceDriver {
    Gridded(GriddedSource),
}

impl SourceDriver {
    /// Opens a source choosing the driver by file signature.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut signature = [0_u8; 8];
        let read = File::open(path)?.read(&mut signature)?;

        match sniff(&signature[..read]) {
            Some(Format::NetCdf) => Ok(SourceDriver::Gridded(GriddedSource::open(path)?)),
            None => Err(SourceError::UnknownFormat),
        }
    }

    fn inner(&self) -> &dyn ForecastSource {
        match self {
            SourceDriver::Gridded(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ForecastSource {
        match self {
            SourceDriver::Gridded(source) => source,
        }
    }
}

impl ForecastSource for SourceDriver {
    fn path(&self) -> &Path {
        self.inner().path()
    }

    fn reference_time(&self) -> Option<i64> {
        self.inner().reference_time()
    }

    fn leadtimes(&self) -> &[Float] {
        self.inner().leadtimes()
    }

    fn extract(
        &mut self,
        lats: &[Float],
        lons: &[Float],
        request: &ExtractRequest,
    ) -> Result<Array3<f32>, SourceError> {
        self.inner_mut().extract(lats, lons, request)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Format {
    NetCdf,
}

/// Recognises netCDF classic, 64-bit offset, CDF5 and netCDF-4 (HDF5) files.
fn sniff(signature: &[u8]) -> Option<Format> {
    const HDF5: &[u8] = b"\x89HDF\r\n\x1a\n";

    match signature {
        [b'C', b'D', b'F', 1 | 2 | 5, ..] => Some(Format::NetCdf),
        s if s.starts_with(HDF5) => Some(Format::NetCdf),
        _ => None,
    }
}
