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

//! Station metadata files used to create the location axis of an archive.

use super::is_number;
use crate::{errors::InputError, Float};
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::{fs, path::Path};

/// Station of the archive location axis.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Location {
    pub id: i32,
    pub lat: Float,
    pub lon: Float,
    /// Metres above mean sea level, `NaN` when unknown.
    pub altitude: Float,
}

/// Reads stations sorted by id. A later duplicate of an id replaces the earlier one.
pub fn read(path: &Path) -> Result<Vec<Location>, InputError> {
    let content = fs::read_to_string(path)?;

    // dialect is decided by the first line long enough to hold a banner
    let banner = content
        .lines()
        .take(5)
        .find(|line| line.len() >= 5)
        .ok_or_else(|| InputError::UnknownFormat(path.to_path_buf()))?;

    let locations = if banner.starts_with("DEPAR") {
        debug!("Reading KDVH station list from {}", path.display());
        read_kdvh(&content)?
    } else {
        debug!("Reading comps station list from {}", path.display());
        read_comps(&content)
    };

    let mut unique: FxHashMap<i32, Location> = FxHashMap::default();
    for location in locations {
        unique.insert(location.id, location);
    }

    let mut locations: Vec<Location> = unique.into_values().collect();
    locations.sort_by_key(|l| l.id);

    if locations.is_empty() {
        return Err(InputError::Empty);
    }

    Ok(locations)
}

/// Semicolon separated export with a banner line followed by the header.
fn read_kdvh(content: &str) -> Result<Vec<Location>, InputError> {
    let body = content.splitn(2, '\n').nth(1).unwrap_or("");

    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let header = reader.headers()?.clone();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| InputError::MissingColumn(name.to_string()))
    };

    let i_id = column("STNR")?;
    let i_lat = column("LAT_DEC")?;
    let i_lon = column("LON_DEC")?;
    let i_elev = column("AMSL")?;

    let mut locations = Vec::new();

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!("Skipping unreadable station line: {}", err);
                continue;
            }
        };

        let fields: Option<Vec<&str>> = [i_id, i_lat, i_lon, i_elev]
            .iter()
            .map(|i| record.get(*i).filter(|f| !f.is_empty() && *f != "-"))
            .collect();

        // stations without complete metadata are left out silently
        let fields = match fields {
            Some(fields) => fields,
            None => continue,
        };

        match (
            fields[0].parse::<i32>(),
            fields[1].parse::<Float>(),
            fields[2].parse::<Float>(),
            fields[3].parse::<Float>(),
        ) {
            (Ok(id), Ok(lat), Ok(lon), Ok(altitude)) => locations.push(Location {
                id,
                lat,
                lon,
                altitude,
            }),
            _ => warn!("Skipping station line {:?}", record),
        }
    }

    Ok(locations)
}

/// Whitespace separated `id lat=.. lon=.. elev=..` lines, `#` starts a comment line.
fn read_comps(content: &str) -> Vec<Location> {
    let mut locations = Vec::new();

    for line in content.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();

        let id = match words.next().filter(|w| is_number(w)).and_then(|w| w.parse::<i32>().ok()) {
            Some(id) => id,
            None => {
                warn!("Skipping station line {:?}", line);
                continue;
            }
        };

        let (mut lat, mut lon, mut altitude) = (None, None, Float::NAN);

        for word in words {
            let (key, value) = match word.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };

            let value = value.parse::<Float>().ok();

            match key {
                "lat" => lat = value,
                "lon" => lon = value,
                "elev" => altitude = value.unwrap_or(Float::NAN),
                _ => {}
            }
        }

        match (lat, lon) {
            (Some(lat), Some(lon)) => locations.push(Location {
                id,
                lat,
                lon,
                altitude,
            }),
            _ => warn!("Station {} has no coordinates and is skipped", id),
        }
    }

    locations
}
