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

//! Adding gridded forecasts to the archive.
//!
//! Every source is opened once to discover its reference time and lead
//! times, the time axis is merged for all sources at once and then the
//! sources are extracted one by one in the given order. A failing source
//! is reported and skipped, values written by earlier sources are kept.

use super::{
    configuration::{AddFcst, WritePolicy},
    new_progress_bar,
    store::{Archive, Field},
    timeaxis::{MergePlan, TimeBuffers},
    RunSummary,
};
use crate::{
    aggregation::{Reducer, Reduction, Scaling},
    errors::{RunError, SourceError},
    source::{extractor::ExtractRequest, ForecastSource, SourceDriver},
    timeutil::hours_to_seconds,
    Float,
};
use log::{debug, error, info};
use ndarray::{s, Array4};
use rustc_hash::FxHashMap;

const FCST_FIELDS: [Field; 4] = [Field::Fcst, Field::Cdf, Field::Quantiles, Field::Ensemble];

/// Archive row and the pairs of archive and source lead time indices
/// filled from one source for one repeat.
#[derive(Clone, PartialEq, Eq, Debug)]
struct Target {
    row: usize,
    leadtimes: Vec<(usize, usize)>,
}

pub fn run(mut archive: Archive, options: &AddFcst) -> Result<RunSummary, RunError> {
    let mut summary = RunSummary::new("addfcst");

    info!("Reading {} forecast sources", options.files.len());

    let mut sources = Vec::with_capacity(options.files.len());
    for path in &options.files {
        match SourceDriver::open(path) {
            Ok(source) if source.reference_time().is_some() => sources.push(source),
            Ok(_) => {
                error!("Forecast {} has no reference time, skipping", path.display());
                summary.record(path, Err(SourceError::NoTimes));
            }
            Err(err) => {
                error!("Could not open {}: {}", path.display(), err);
                summary.record(path, Err(err));
            }
        }
    }

    let proposed: Vec<i64> = sources
        .iter()
        .flat_map(|source| source.candidate_times(&options.repeats))
        .collect();

    let plan = MergePlan::new(archive.times(), proposed, options.sort);
    plan.log_summary();
    summary.added_times = plan.added();

    let updated: Vec<Field> = FCST_FIELDS
        .iter()
        .copied()
        .filter(|f| archive.depth(*f).is_some())
        .filter(|f| *f != Field::Ensemble || options.write_ensemble)
        .collect();

    let cleared: &[Field] = if options.clear { &updated } else { &[] };
    let mut buffers = TimeBuffers::load(&archive, &plan, &updated, cleared)?;

    archive.write_times(plan.times())?;

    // companions are only rewritten when their rows move
    if plan.is_permuted() {
        let companions: Vec<Field> = archive
            .fields()
            .into_iter()
            .filter(|f| !updated.contains(f))
            .collect();

        TimeBuffers::load(&archive, &plan, &companions, &[])?.store(&mut archive)?;
    }

    let reducer = Reducer {
        aggregator: options.aggregator,
        thresholds: archive.thresholds().to_vec(),
        quantiles: archive.quantiles().to_vec(),
        ensemble_size: archive
            .ensemble_size()
            .filter(|_| updated.contains(&Field::Ensemble)),
        scaling: Scaling {
            multiply: options.multiply,
            add: options.add,
        },
    };

    let request = ExtractRequest {
        field: options.variable.clone(),
        members: options.members.clone(),
        hood: options.hood,
        time_window: options.time_window,
        deacc: options.deacc,
    };

    let lats: Vec<Float> = archive.locations().iter().map(|l| l.lat).collect();
    let lons: Vec<Float> = archive.locations().iter().map(|l| l.lon).collect();
    let index = plan.index();

    let progress_bar = new_progress_bar(sources.len(), "Processed forecasts");

    for (processed, mut source) in sources.into_iter().enumerate() {
        info!("Processing {}", source.path().display());

        let targets = targets(&source, &index, archive.leadtimes(), &options.repeats);

        let outcome = process_source(
            &mut source,
            &targets,
            &mut buffers,
            &reducer,
            &request,
            options.policy,
            (lats.as_slice(), lons.as_slice()),
        );

        match outcome {
            Err(err) if err.is_fatal() => {
                progress_bar.abandon();
                return Err(RunError::Source(source.path().to_path_buf(), err));
            }
            Err(err) => {
                error!("Could not process {}: {}", source.path().display(), err);
                // keeps error messages apart from the progress bar
                println!();
                summary.record(source.path(), Err(err));
            }
            Ok(written) => summary.record(source.path(), Ok(written)),
        }

        progress_bar.inc(1);

        if let Some(every) = options.sync_every {
            if (processed + 1) % every == 0 {
                buffers.store(&mut archive)?;
                archive = archive.sync()?;
            }
        }
    }

    progress_bar.finish_with_message("All forecasts processed");

    info!("Writing forecasts to {}", archive.path().display());
    buffers.store(&mut archive)?;

    Ok(summary)
}

/// Rows of the archive filled by the source, one per repeat.
///
/// A repeat shifts the initialization time by `delay` hours,
/// so source lead time `lt` lands at archive lead time `lt - delay`.
fn targets(
    source: &SourceDriver,
    index: &FxHashMap<i64, usize>,
    archive_leadtimes: &[Float],
    repeats: &[Float],
) -> Vec<Target> {
    let candidates = source.candidate_times(repeats);

    candidates
        .iter()
        .zip(repeats)
        .filter_map(|(time, delay)| {
            let row = *index.get(time)?;

            let leadtimes = archive_leadtimes
                .iter()
                .enumerate()
                .filter_map(|(i, lt)| {
                    source
                        .leadtimes()
                        .iter()
                        .position(|source_lt| {
                            hours_to_seconds(source_lt - delay) == hours_to_seconds(*lt)
                        })
                        .map(|j| (i, j))
                })
                .collect();

            Some(Target { row, leadtimes })
        })
        .collect()
}

fn process_source(
    source: &mut SourceDriver,
    targets: &[Target],
    buffers: &mut TimeBuffers,
    reducer: &Reducer,
    request: &ExtractRequest,
    policy: WritePolicy,
    (lats, lons): (&[Float], &[Float]),
) -> Result<usize, SourceError> {
    let central = buffers
        .get(Field::Fcst)
        .ok_or_else(|| SourceError::MissingField(Field::Fcst.name().to_string()))?;

    // with fill_missing a source covering only filled cells is not read at all
    let needed = targets.iter().any(|target| {
        target.leadtimes.iter().any(|(i, _)| {
            central
                .slice(s![target.row, *i, .., 0])
                .iter()
                .any(|v| policy.admits(*v, 0.0))
        })
    });

    if !needed {
        debug!("All cells of {} are already filled", source.path().display());
        return Ok(0);
    }

    let raw = source.extract(lats, lons, request)?;
    let reduction = reducer.reduce(raw.view())?;

    let mut written = 0;

    for target in targets {
        written += write_target(buffers, &reduction, target, policy);
    }

    Ok(written)
}

/// Writes reduced values of one target, policy is decided on the central
/// estimate and applied to every field of the cell.
fn write_target(
    buffers: &mut TimeBuffers,
    reduction: &Reduction,
    target: &Target,
    policy: WritePolicy,
) -> usize {
    let mut admitted = Vec::new();

    if let Some(fcst) = buffers.get_mut(Field::Fcst) {
        for (i, j) in &target.leadtimes {
            for (loc, new) in reduction.central.slice(s![*j, ..]).iter().enumerate() {
                let stored = &mut fcst[[target.row, *i, loc, 0]];

                if policy.admits(*stored, *new) {
                    *stored = *new;
                    admitted.push((*i, *j, loc));
                }
            }
        }
    }

    let companions = [
        (Field::Cdf, Some(&reduction.exceedance)),
        (Field::Quantiles, Some(&reduction.quantiles)),
        (Field::Ensemble, reduction.ensemble.as_ref()),
    ];

    for (field, values) in companions {
        if let (Some(buffer), Some(values)) = (buffers.get_mut(field), values) {
            write_lanes(buffer, values, target.row, &admitted);
        }
    }

    admitted.len()
}

fn write_lanes(
    buffer: &mut Array4<f32>,
    values: &ndarray::Array3<f32>,
    row: usize,
    cells: &[(usize, usize, usize)],
) {
    debug_assert_eq!(buffer.dim().3, values.dim().2);

    for (i, j, loc) in cells {
        buffer
            .slice_mut(s![row, *i, *loc, ..])
            .assign(&values.slice(s![*j, *loc, ..]));
    }
}

#[cfg(test)]
mod tests {
    use super::{write_target, Target};
    use crate::aggregation::Reduction;
    use crate::archive::{configuration::WritePolicy, store::Field, timeaxis::TimeBuffers};
    use ndarray::{arr2, Array3, Array4};

    fn reduction() -> Reduction {
        Reduction {
            central: arr2(&[[1.0_f32, f32::NAN], [2.0, 3.0]]),
            exceedance: Array3::from_elem((2, 2, 1), 0.5),
            quantiles: Array3::from_elem((2, 2, 0), 0.0),
            ensemble: None,
        }
    }

    #[test]
    fn policy_decides_on_central_estimate() {
        let mut fcst = Array4::from_elem((1, 2, 2, 1), f32::NAN);
        fcst[[0, 1, 0, 0]] = 9.0;
        let cdf = Array4::from_elem((1, 2, 2, 1), f32::NAN);

        let mut buffers = TimeBuffers::from_parts(vec![(Field::Fcst, fcst), (Field::Cdf, cdf)]);
        let target = Target {
            row: 0,
            leadtimes: vec![(0, 0), (1, 1)],
        };

        let written = write_target(&mut buffers, &reduction(), &target, WritePolicy::FillMissing);

        let fcst = buffers.get(Field::Fcst).unwrap();
        let cdf = buffers.get(Field::Cdf).unwrap();

        // (0,0) filled, (0,1) new value missing, (1,0) already filled, (1,1) filled
        assert_eq!(written, 2);
        assert_eq!(fcst[[0, 0, 0, 0]], 1.0);
        assert!(fcst[[0, 0, 1, 0]].is_nan());
        assert_eq!(fcst[[0, 1, 0, 0]], 9.0);
        assert_eq!(fcst[[0, 1, 1, 0]], 3.0);
        assert!(cdf[[0, 1, 0, 0]].is_nan());
        assert_eq!(cdf[[0, 1, 1, 0]], 0.5);
    }
}
