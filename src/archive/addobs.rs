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

//! Adding point observations to the archive.
//!
//! An observation valid at `v` is stored in every cell `(t, lt)` with
//! `t + lt = v`, for initialization times `t` falling on one of the
//! permitted hours of the day.

use super::{
    configuration::AddObs,
    new_progress_bar,
    store::{Archive, Field},
    timeaxis::{MergePlan, TimeBuffers},
    RunSummary,
};
use crate::{
    aggregation::Scaling,
    constants::SECONDS_PER_DAY,
    errors::{ArchiveError, RunError, SourceError},
    input::observations::{self, ObservationRecord},
    timeutil::hours_to_seconds,
    Float,
};
use log::{debug, error, info, warn};
use ndarray::Array4;
use rustc_hash::{FxHashMap, FxHashSet};

/// Latest observation of every (location index, valid time),
/// with valid times in the order they were first seen.
struct Observations {
    values: FxHashMap<(usize, i64), f32>,
    valid_times: Vec<i64>,
}

impl Observations {
    fn collect(records: &[ObservationRecord], stations: &FxHashMap<i32, usize>) -> Self {
        let mut values = FxHashMap::default();
        let mut seen = FxHashSet::default();
        let mut valid_times = Vec::new();
        let mut unknown = FxHashSet::default();

        for record in records {
            let loc = match stations.get(&record.id) {
                Some(loc) => *loc,
                None => {
                    unknown.insert(record.id);
                    continue;
                }
            };

            values.insert((loc, record.valid_time), record.value);

            if seen.insert(record.valid_time) {
                valid_times.push(record.valid_time);
            }
        }

        if !unknown.is_empty() {
            debug!("{} stations are not in the archive and are ignored", unknown.len());
        }

        Observations {
            values,
            valid_times,
        }
    }
}

/// Initialization times at permitted hours for which some lead time
/// is valid at one of the observation times.
fn proposed_times(valid_times: &[i64], leadtimes: &[Float], init_hours: &[Float]) -> Vec<i64> {
    let init_seconds: Vec<i64> = init_hours.iter().map(|h| hours_to_seconds(*h)).collect();

    valid_times
        .iter()
        .flat_map(|valid| leadtimes.iter().map(move |lt| valid - hours_to_seconds(*lt)))
        .filter(|time| init_seconds.contains(&time.rem_euclid(SECONDS_PER_DAY)))
        .collect()
}

/// Cells `(time index, leadtime index)` sharing every valid time.
fn valid_time_cells(times: &[i64], leadtimes: &[Float]) -> FxHashMap<i64, Vec<(usize, usize)>> {
    let mut cells: FxHashMap<i64, Vec<(usize, usize)>> = FxHashMap::default();

    for (t, time) in times.iter().enumerate() {
        for (l, lt) in leadtimes.iter().enumerate() {
            cells
                .entry(time + hours_to_seconds(*lt))
                .or_default()
                .push((t, l));
        }
    }

    cells
}

/// Removes every stored observation outside `[min, max]`,
/// returns the number of removed values.
fn force_range(obs: &mut Array4<f32>, min: f32, max: f32) -> usize {
    let mut removed = 0;

    obs.mapv_inplace(|v| {
        if v < min || v > max {
            removed += 1;
            f32::NAN
        } else {
            v
        }
    });

    removed
}

pub fn run(mut archive: Archive, options: &AddObs) -> Result<RunSummary, RunError> {
    let mut summary = RunSummary::new("addobs");

    let progress_bar = new_progress_bar(options.files.len(), "Read observation files");
    let mut records = Vec::new();

    for path in &options.files {
        match observations::read(path, &options.variable) {
            Ok(file_records) => {
                summary.record(path, Ok(file_records.len()));
                records.extend(file_records);
            }
            Err(err) => {
                error!("Could not read {}: {}", path.display(), err);
                println!();
                summary.record(path, Err(SourceError::from(err)));
            }
        }
        progress_bar.inc(1);
    }

    progress_bar.finish_with_message("All observation files read");

    let stations: FxHashMap<i32, usize> = archive
        .locations()
        .iter()
        .enumerate()
        .map(|(i, l)| (l.id, i))
        .collect();

    let observations = Observations::collect(&records, &stations);

    let proposed = proposed_times(
        &observations.valid_times,
        archive.leadtimes(),
        &options.init_hours,
    );

    let plan = MergePlan::new(archive.times(), proposed, options.sort);
    plan.log_summary();
    summary.added_times = plan.added();

    let cleared: &[Field] = if options.clear { &[Field::Obs] } else { &[] };
    let mut buffers = TimeBuffers::load(&archive, &plan, &[Field::Obs], cleared)?;

    archive.write_times(plan.times())?;

    if plan.is_permuted() {
        let companions: Vec<Field> = archive
            .fields()
            .into_iter()
            .filter(|f| *f != Field::Obs)
            .collect();

        TimeBuffers::load(&archive, &plan, &companions, &[])?.store(&mut archive)?;
    }

    let scaling = Scaling {
        multiply: options.multiply,
        add: options.add,
    };

    let cells = valid_time_cells(plan.times(), archive.leadtimes());

    let obs = buffers
        .get_mut(Field::Obs)
        .ok_or(ArchiveError::MissingVariable("obs"))?;

    let mut written = 0_usize;

    for ((loc, valid_time), raw) in &observations.values {
        let value = scaling.apply(*raw);

        if let Some(targets) = cells.get(valid_time) {
            for (t, l) in targets {
                let stored = &mut obs[[*t, *l, *loc, 0]];

                if options.policy.admits(*stored, value) {
                    *stored = value;
                    written += 1;
                }
            }
        }
    }

    if let Some((min, max)) = options.force_range {
        let removed = force_range(obs, min, max);
        if removed > 0 {
            warn!("{} observations outside of the forced range were removed", removed);
        }
    }

    info!("Writing {} observation cells to {}", written, archive.path().display());
    buffers.store(&mut archive)?;

    Ok(summary)
}
