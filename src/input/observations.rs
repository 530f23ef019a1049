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

//! Point observation files.
//!
//! Two dialects are supported:
//!
//! - semicolon separated text with `id;date;hour;<variable>` header,
//! - KDVH whitespace separated listing with
//!   `Stnr Year Month Day Time(UTC) [MIN] <variable>` header.

use super::{is_number, parse_value};
use crate::{constants::SECONDS_PER_HOUR, errors::InputError, timeutil};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ObservationRecord {
    pub id: i32,
    /// Unix time
    pub valid_time: i64,
    pub value: f32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Dialect {
    Text,
    Kdvh,
}

/// Reads all usable observations of `variable` from the file.
pub fn read(path: &Path, variable: &str) -> Result<Vec<ObservationRecord>, InputError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = String::new();
    reader.read_line(&mut header)?;

    let dialect = if header.starts_with(" Stnr") || header.starts_with("Stnr") {
        Dialect::Kdvh
    } else if header.starts_with("id") {
        Dialect::Text
    } else {
        return Err(InputError::UnknownFormat(path.to_path_buf()));
    };

    debug!("Reading {:?} observations from {}", dialect, path.display());

    let records = match dialect {
        Dialect::Text => read_text(&header, reader, variable)?,
        Dialect::Kdvh => read_kdvh(&header, reader, variable)?,
    };

    if records.is_empty() {
        warn!("No usable observations of {} in {}", variable, path.display());
    }

    Ok(records)
}

/// Cache of `yyyymmdd` to unix time conversions,
/// observation files repeat the same dates many times.
#[derive(Default)]
struct DateLookup {
    cache: FxHashMap<i64, i64>,
}

impl DateLookup {
    fn unixtime(&mut self, date: i64) -> Option<i64> {
        if let Some(time) = self.cache.get(&date) {
            return Some(*time);
        }

        match timeutil::date_to_unixtime(date) {
            Ok(time) => {
                self.cache.insert(date, time);
                Some(time)
            }
            Err(err) => {
                warn!("Skipping observation: {}", err);
                None
            }
        }
    }
}

fn column(header: &[&str], name: &str) -> Result<usize, InputError> {
    header
        .iter()
        .position(|h| *h == name)
        .ok_or_else(|| InputError::MissingColumn(name.to_string()))
}

fn read_text<R: BufRead>(
    header: &str,
    reader: R,
    variable: &str,
) -> Result<Vec<ObservationRecord>, InputError> {
    let header: Vec<&str> = header
        .trim_end()
        .split(';')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();

    let i_id = column(&header, "id")?;
    let i_date = column(&header, "date")?;
    let i_hour = column(&header, "hour")?;
    let i_var = column(&header, variable)?;

    let mut csv_reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut dates = DateLookup::default();
    let mut records = Vec::new();

    for line in csv_reader.records() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("Skipping unreadable observation line: {}", err);
                continue;
            }
        };

        if line.len() <= 1 || !line.get(0).map_or(false, is_number) {
            continue;
        }

        let (id, date, hour) = match parse_keys(&line, i_id, i_date, i_hour) {
            Some(keys) => keys,
            None => {
                warn!("Skipping observation line {:?}", line);
                continue;
            }
        };

        let value = match line.get(i_var).and_then(parse_value) {
            Some(value) => value,
            None => continue,
        };

        if let Some(midnight) = dates.unixtime(date) {
            records.push(ObservationRecord {
                id,
                valid_time: midnight + hour * SECONDS_PER_HOUR,
                value,
            });
        }
    }

    Ok(records)
}

fn parse_keys(line: &StringRecord, i_id: usize, i_date: usize, i_hour: usize) -> Option<(i32, i64, i64)> {
    let id = line.get(i_id)?.parse().ok()?;
    let date = line.get(i_date)?.parse().ok()?;
    let hour = line.get(i_hour)?.parse().ok()?;

    Some((id, date, hour))
}

fn read_kdvh<R: BufRead>(
    header: &str,
    reader: R,
    variable: &str,
) -> Result<Vec<ObservationRecord>, InputError> {
    let header: Vec<&str> = header.split_whitespace().collect();

    let i_id = column(&header, "Stnr")?;
    let i_year = column(&header, "Year")?;
    let i_month = column(&header, "Month")?;
    let i_day = column(&header, "Day")?;
    let i_time = column(&header, "Time(UTC)")?;
    let i_min = header.iter().position(|h| *h == "MIN");
    let i_var = column(&header, variable)?;

    let mut dates = DateLookup::default();
    let mut records = Vec::new();

    for line in reader.split(b'\n') {
        let line = match String::from_utf8(line?) {
            Ok(line) => line,
            Err(err) => {
                warn!("Skipping observation line {:?}", String::from_utf8_lossy(err.as_bytes()));
                continue;
            }
        };
        let data: Vec<&str> = line.split_whitespace().collect();

        if data.len() <= 1 || !is_number(data[0]) {
            continue;
        }

        let parsed = (|| -> Option<(i32, i64, i64)> {
            let id = data.get(i_id)?.parse().ok()?;
            let year: i64 = data.get(i_year)?.parse().ok()?;
            let month: i64 = data.get(i_month)?.parse().ok()?;
            let day: i64 = data.get(i_day)?.parse().ok()?;
            let hour: i64 = data.get(i_time)?.parse().ok()?;

            let minutes: f64 = match i_min {
                Some(i) => data.get(i)?.parse().ok()?,
                None => 0.0,
            };

            let offset = hour * SECONDS_PER_HOUR + (minutes * 60.0).round() as i64;

            Some((id, year * 10_000 + month * 100 + day, offset))
        })();

        let (id, date, offset) = match parsed {
            Some(parsed) => parsed,
            None => {
                warn!("Skipping observation line {:?}", line);
                continue;
            }
        };

        let value = match data.get(i_var).copied().and_then(parse_value) {
            Some(value) => value,
            None => continue,
        };

        if let Some(midnight) = dates.unixtime(date) {
            records.push(ObservationRecord {
                id,
                valid_time: midnight + offset,
                value,
            });
        }
    }

    Ok(records)
}
