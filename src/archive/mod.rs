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

//! Module containing the archive update tasks.
//!
//! The archive is a netCDF file indexed by initialization time (growing,
//! unlimited), lead time and location. A run opens it once, merges the
//! times implied by new inputs into the time axis, fills the working
//! buffers and writes them back.
//!
//! Processing of inputs is strictly sequential: later sources win
//! a cell unless the `fill_missing` policy is selected. Errors of a single
//! source are logged and recorded in the [`RunSummary`], only errors that
//! would repeat for every source (or that concern the archive itself)
//! abort the run.

mod addfcst;
mod addobs;
mod configuration;
mod init;
mod store;
mod timeaxis;

#[cfg(test)]
mod super_tests;

use crate::{
    errors::{RunError, SourceError},
    ALLOCATOR,
};
use configuration::{Config, Task};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use store::Archive;

/// Main archive function, performing the task of the run configuration.
pub fn main(config_path: &Path) -> Result<RunSummary, RunError> {
    debug!("Reading configuration from {}", config_path.display());
    let config = Config::new_from_file(config_path)?;

    debug!("Setting memory limit");
    ALLOCATOR
        .set_limit(config.resources.memory.saturating_mul(1024 * 1024))
        .map_err(|_| RunError::MemoryLimit(config.resources.memory))?;

    info!(
        "Running {} on {}",
        config.task.name(),
        config.archive.display()
    );

    run_task(&config.archive, &config.task)
}

fn run_task(archive_path: &Path, task: &Task) -> Result<RunSummary, RunError> {
    match task {
        Task::Init(options) => init::run(archive_path, options),
        Task::AddFcst(options) => addfcst::run(Archive::open(archive_path)?, options),
        Task::AddObs(options) => addobs::run(Archive::open(archive_path)?, options),
    }
}

/// Outcomes of all inputs of one run.
#[derive(Debug)]
pub struct RunSummary {
    task: &'static str,
    /// Written cells or read records of every input, or the reason it was skipped.
    outcomes: Vec<(PathBuf, Result<usize, SourceError>)>,
    added_times: usize,
}

impl RunSummary {
    fn new(task: &'static str) -> Self {
        RunSummary {
            task,
            outcomes: Vec::new(),
            added_times: 0,
        }
    }

    fn record(&mut self, path: &Path, outcome: Result<usize, SourceError>) {
        self.outcomes.push((path.to_path_buf(), outcome));
    }

    /// Number of skipped inputs.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_err()).count()
    }

    pub fn outcomes(&self) -> &[(PathBuf, Result<usize, SourceError>)] {
        &self.outcomes
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} finished: {} inputs processed, {} skipped, {} initialization times added",
            self.task,
            self.outcomes.len() - self.failed(),
            self.failed(),
            self.added_times
        )
    }
}

fn new_progress_bar(len: usize, prefix: &'static str) -> ProgressBar {
    let progress_bar = ProgressBar::new(len as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );
    progress_bar.set_prefix(prefix);

    progress_bar
}
