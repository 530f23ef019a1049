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

use super::{
    configuration::Init,
    store::{Archive, Layout},
    RunSummary,
};
use crate::{errors::RunError, input::locations};
use log::{info, warn};
use std::path::Path;

/// Creates an empty archive for stations of the locations file.
pub fn run(path: &Path, options: &Init) -> Result<RunSummary, RunError> {
    let locations = locations::read(&options.locations)?;

    if path.exists() {
        warn!("Archive {} already exists and is replaced", path.display());
    }

    info!(
        "Creating archive {} with {} locations and {} lead times",
        path.display(),
        locations.len(),
        options.leadtimes.len()
    );

    let layout = Layout {
        locations,
        leadtimes: options.leadtimes.clone(),
        thresholds: options.thresholds.clone(),
        quantiles: options.quantiles.clone(),
        members: options.members,
        standard_name: options.standard_name.clone(),
        units: options.units.clone(),
        x0: options.x0,
        x1: options.x1,
    };

    Archive::create(path, &layout)?;

    Ok(RunSummary::new("init"))
}
