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

//! End-to-end tests running whole tasks on temporary archives.

use super::store::{Archive, Field, Layout};
use crate::errors::{RunError, SourceError};
use crate::input::locations::Location;
use float_cmp::approx_eq;
use ndarray::{s, Array4};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::{tempdir, TempDir};

/// 2021-07-01 00:00 UTC
const DAY: i64 = 1_625_097_600;

fn layout(members: usize) -> Layout {
    Layout {
        locations: vec![
            Location {
                id: 50540,
                lat: 61.0,
                lon: 11.0,
                altitude: 12.0,
            },
            Location {
                id: 18700,
                lat: 60.0,
                lon: 10.0,
                altitude: 94.0,
            },
        ],
        leadtimes: vec![0.0, 1.0, 2.0],
        thresholds: Some(vec![4.5]),
        quantiles: None,
        members,
        standard_name: "air_temperature".to_string(),
        units: Some("K".to_string()),
        x0: None,
        x1: None,
    }
}

fn new_archive(dir: &TempDir, members: usize, times: &[i64]) -> PathBuf {
    let path = dir.path().join("verif.nc");
    let mut archive = Archive::create(&path, &layout(members)).unwrap();
    archive.write_times(times).unwrap();

    path
}

/// Writes a forecast on a regular 4x4 lat/lon grid (59..62 N, 9..12 E),
/// uniform in space. `values[time][member]`, time steps are hourly.
fn write_source(path: &Path, reference_time: i64, values: &[Vec<f32>], with_grid: bool) {
    let (times, members) = (values.len(), values[0].len());

    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", times).unwrap();
    file.add_dimension("ensemble_member", members).unwrap();
    file.add_dimension("lat", 4).unwrap();
    file.add_dimension("lon", 4).unwrap();

    {
        let mut var = file.add_variable::<f64>("time", &["time"]).unwrap();
        var.put_attribute("units", "seconds since 1970-01-01 00:00:00 +00:00")
            .unwrap();
        let time: Vec<f64> = (0..times)
            .map(|k| (reference_time + k as i64 * 3600) as f64)
            .collect();
        var.put_values(&time, ..).unwrap();
    }

    if with_grid {
        {
            let mut var = file.add_variable::<f64>("latitude", &["lat"]).unwrap();
            var.put_values::<f64, _>(&[59.0, 60.0, 61.0, 62.0], ..).unwrap();
        }
        {
            let mut var = file.add_variable::<f64>("longitude", &["lon"]).unwrap();
            var.put_values::<f64, _>(&[9.0, 10.0, 11.0, 12.0], ..).unwrap();
        }
    }

    let data: Vec<f32> = values
        .iter()
        .flat_map(|members| members.iter().flat_map(|v| std::iter::repeat(*v).take(16)))
        .collect();

    let mut var = file
        .add_variable::<f32>(
            "air_temperature_2m",
            &["time", "ensemble_member", "lat", "lon"],
        )
        .unwrap();
    var.put_values(&data, ..).unwrap();
}

fn run(dir: &TempDir, archive: &Path, task: &str) -> Result<super::RunSummary, RunError> {
    let config = dir.path().join("run.yaml");
    fs::write(
        &config,
        format!("archive: \"{}\"\ntask:\n{}", archive.display(), task),
    )
    .unwrap();

    super::main(&config)
}

fn addfcst(files: &[&Path], extra: &str) -> String {
    let files: Vec<String> = files.iter().map(|f| format!("\"{}\"", f.display())).collect();

    format!(
        "  addfcst:\n    files: [{}]\n    variable: air_temperature_2m\n{}",
        files.join(", "),
        extra
    )
}

fn addobs(file: &Path) -> String {
    format!(
        "  addobs:\n    files: [\"{}\"]\n    variable: TA\n",
        file.display()
    )
}

fn read(archive: &Path, field: Field) -> (Vec<i64>, Array4<f32>) {
    let archive = Archive::open(archive).unwrap();
    (archive.times().to_vec(), archive.read_buffer(field).unwrap())
}

fn same(a: &Array4<f32>, b: &Array4<f32>) -> bool {
    a.dim() == b.dim()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
}

#[test]
fn deterministic_forecast_fills_new_time() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[DAY - 86_400]);

    let source = dir.path().join("fc.nc");
    write_source(&source, DAY, &[vec![4.0], vec![4.0], vec![8.0]], true);

    let summary = run(&dir, &archive, &addfcst(&[&source], "")).unwrap();
    assert_eq!(summary.failed(), 0);

    let (times, fcst) = read(&archive, Field::Fcst);

    assert_eq!(times, vec![DAY - 86_400, DAY]);
    for loc in 0..2 {
        assert_eq!(fcst.slice(s![1, .., loc, 0]).to_vec(), vec![4.0, 4.0, 8.0]);
    }
    assert!(fcst.slice(s![0, .., .., ..]).iter().all(|v| v.is_nan()));

    let (_, cdf) = read(&archive, Field::Cdf);
    assert_eq!(cdf.slice(s![1, .., 0, 0]).to_vec(), vec![1.0, 1.0, 0.0]);

    let (_, obs) = read(&archive, Field::Obs);
    assert!(obs.iter().all(|v| v.is_nan()));
}

#[test]
fn ensemble_members_are_aggregated_and_kept() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 2, &[]);

    let source = dir.path().join("eps.nc");
    write_source(&source, DAY, &[vec![3.0, 5.0], vec![3.0, 5.0], vec![3.0, 5.0]], true);

    run(&dir, &archive, &addfcst(&[&source], "")).unwrap();

    let (times, fcst) = read(&archive, Field::Fcst);
    let (_, ensemble) = read(&archive, Field::Ensemble);
    let (_, cdf) = read(&archive, Field::Cdf);

    assert_eq!(times, vec![DAY]);
    assert!(approx_eq!(f32, fcst[[0, 2, 1, 0]], 4.0));
    assert_eq!(ensemble.slice(s![0, 0, 0, ..]).to_vec(), vec![3.0, 5.0]);
    assert_eq!(cdf[[0, 1, 0, 0]], 0.5);

    let config = "    aggregator: max\n    policy: overwrite\n    write_ensemble: false\n";
    run(&dir, &archive, &addfcst(&[&source], config)).unwrap();

    let (_, fcst) = read(&archive, Field::Fcst);
    assert_eq!(fcst[[0, 0, 0, 0]], 5.0);
}

#[test]
fn repeated_update_is_idempotent() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[DAY + 86_400]);

    let first = dir.path().join("fc1.nc");
    let second = dir.path().join("fc2.nc");
    write_source(&first, DAY, &[vec![1.0], vec![2.0], vec![3.0]], true);
    write_source(&second, DAY + 86_400, &[vec![7.0], vec![8.0], vec![9.0]], true);

    let task = addfcst(&[&first, &second], "    policy: overwrite\n    sync_every: 1\n");

    run(&dir, &archive, &task).unwrap();
    let (times_once, fcst_once) = read(&archive, Field::Fcst);

    run(&dir, &archive, &task).unwrap();
    let (times_twice, fcst_twice) = read(&archive, Field::Fcst);

    assert_eq!(times_once, vec![DAY + 86_400, DAY]);
    assert_eq!(times_once, times_twice);
    assert!(same(&fcst_once, &fcst_twice));
    assert_eq!(fcst_once[[0, 2, 0, 0]], 9.0);
}

#[test]
fn fill_missing_keeps_first_writer() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[]);

    let first = dir.path().join("fc1.nc");
    let second = dir.path().join("fc2.nc");
    write_source(&first, DAY, &[vec![1.0], vec![2.0]], true);
    write_source(&second, DAY, &[vec![7.0], vec![8.0], vec![9.0]], true);

    run(&dir, &archive, &addfcst(&[&first, &second], "")).unwrap();

    let (_, fcst) = read(&archive, Field::Fcst);
    assert_eq!(fcst.slice(s![0, .., 0, 0]).to_vec(), vec![1.0, 2.0, 9.0]);
}

#[test]
fn disjoint_observations_are_both_kept() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[]);

    let first = dir.path().join("obs1.txt");
    let second = dir.path().join("obs2.txt");
    fs::write(&first, "id;date;hour;TA\n18700;20210701;1;10.0\n").unwrap();
    fs::write(&second, "id;date;hour;TA\n50540;20210701;2;20.0\n").unwrap();

    run(&dir, &archive, &addobs(&first)).unwrap();
    run(&dir, &archive, &addobs(&second)).unwrap();

    let (times, obs) = read(&archive, Field::Obs);

    assert_eq!(times, vec![DAY]);
    // locations are sorted by id: 18700 first
    assert_eq!(obs[[0, 1, 0, 0]], 10.0);
    assert_eq!(obs[[0, 2, 1, 0]], 20.0);
    assert_eq!(obs.iter().filter(|v| !v.is_nan()).count(), 2);
}

#[test]
fn sorting_moves_companion_fields() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[]);

    let observations = dir.path().join("obs.txt");
    fs::write(&observations, "id;date;hour;TA\n18700;20210702;0;1.0\n").unwrap();
    run(&dir, &archive, &addobs(&observations)).unwrap();

    let source = dir.path().join("fc.nc");
    write_source(&source, DAY, &[vec![4.0], vec![4.0], vec![8.0]], true);
    run(&dir, &archive, &addfcst(&[&source], "    sort: true\n")).unwrap();

    let (times, obs) = read(&archive, Field::Obs);
    let (_, fcst) = read(&archive, Field::Fcst);

    assert_eq!(times, vec![DAY, DAY + 86_400]);
    assert_eq!(obs[[1, 0, 0, 0]], 1.0);
    assert!(obs.slice(s![0, .., .., ..]).iter().all(|v| v.is_nan()));
    assert_eq!(fcst[[0, 2, 0, 0]], 8.0);
    assert!(fcst.slice(s![1, .., .., ..]).iter().all(|v| v.is_nan()));
}

#[test]
fn failing_sources_are_skipped() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[]);

    let good = dir.path().join("fc.nc");
    let missing = dir.path().join("none.nc");
    write_source(&good, DAY, &[vec![4.0], vec![4.0], vec![8.0]], true);

    let summary = run(
        &dir,
        &archive,
        &addfcst(&[&missing, &good], "    members: [3]\n"),
    )
    .unwrap();

    // missing file and member out of range
    assert_eq!(summary.failed(), 2);
    assert!(matches!(
        summary.outcomes()[1].1,
        Err(SourceError::MemberOutOfRange(3, 1))
    ));

    let (times, _) = read(&archive, Field::Fcst);
    assert_eq!(times, vec![DAY]);
}

#[test]
fn missing_grid_aborts_the_run() {
    let dir = tempdir().unwrap();
    let archive = new_archive(&dir, 0, &[]);

    let source = dir.path().join("fc.nc");
    write_source(&source, DAY, &[vec![4.0]], false);

    assert!(matches!(
        run(&dir, &archive, &addfcst(&[&source], "")),
        Err(RunError::Source(_, SourceError::MissingGrid))
    ));
}

#[test]
fn init_creates_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("new.nc");
    let stations = dir.path().join("stations.txt");

    fs::write(
        &stations,
        "# id lat lon\n50540 lat=60.383 lon=5.3327 elev=12\n18700 lat=59.9423 lon=10.72 elev=94\n",
    )
    .unwrap();

    let task = format!(
        "  init:\n    locations: \"{}\"\n    leadtimes: [0, 6, 12]\n    quantiles: [0.1, 0.9]\n",
        stations.display()
    );
    run(&dir, &archive, &task).unwrap();

    let archive = Archive::open(&archive).unwrap();

    assert!(archive.times().is_empty());
    assert_eq!(archive.leadtimes(), &[0.0, 6.0, 12.0]);
    assert_eq!(archive.locations()[0].id, 18700);
    assert_eq!(archive.quantiles(), &[0.1, 0.9]);
    assert_eq!(archive.fields(), vec![Field::Fcst, Field::Obs, Field::Quantiles]);
}

#[test]
fn missing_archive_is_fatal() {
    let dir = tempdir().unwrap();
    let observations = dir.path().join("obs.txt");
    fs::write(&observations, "id;date;hour;TA\n").unwrap();

    assert!(matches!(
        run(&dir, &dir.path().join("none.nc"), &addobs(&observations)),
        Err(RunError::Archive(_))
    ));
}
