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

//! Verification Archive Builder (verifarc) merges gridded forecasts
//! and point observations into a single netCDF verification archive
//! indexed by initialization time, lead time and location.
//!
//! Forecast values are taken from the grid cell nearest to every station
//! of the archive (optionally with a neighbourhood around it and from
//! several ensemble members), reduced to a central estimate, exceedance
//! probabilities and quantiles and written next to the observations
//! valid at the same time. Verification scores are computed by
//! downstream tools from the archive.

mod aggregation;
mod archive;
mod constants;
mod errors;
mod input;
mod source;
mod timeutil;

use cap::Cap;
use env_logger::Env;
use log::{error, info};
use std::{alloc, path::PathBuf, process};

type Float = f64;

/// Global allocator used by the program.
///
/// Use of static global allocator allows for capping the memory to the limit set by user
/// in run configuration and in effect provide better OOM error handling on long batches.
#[global_allocator]
static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);

/// The main program function.
/// Prepares the runtime environment and calls the [`archive::main`].
///
/// The only accepted argument is a path to the run configuration
/// (`run.yaml` in the working directory when omitted).
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("VERIFARC_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("VERIFARC_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map_or_else(|| PathBuf::from("run.yaml"), PathBuf::from);

    if args.next().is_some() {
        error!("Usage: verifarc [RUN_CONFIG.yaml]");
        process::exit(2);
    }

    match archive::main(&config_path) {
        Ok(summary) => {
            info!("{}", summary);
            if summary.failed() > 0 {
                info!("Some sources were skipped, check the log for details.");
            }
        }
        Err(err) => {
            error!("Archive update failed with error: {}", err);
            process::exit(1);
        }
    }
}
