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

//! Conversions between calendar dates, CF time units
//! and unix timestamps (seconds since 1970-01-01 00:00 UTC).

use crate::{constants::SECONDS_PER_HOUR, errors::TimeError, Float};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Converts a date written as `yyyymmdd` integer to
/// unix time of its midnight.
pub fn date_to_unixtime(date: i64) -> Result<i64, TimeError> {
    let year = (date / 10_000) as i32;
    let month = ((date / 100) % 100) as u32;
    let day = (date % 100) as u32;

    let midnight = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TimeError::InvalidDate(date.to_string()))?;

    Ok(Utc.from_utc_datetime(&midnight).timestamp())
}

/// Converts value expressed in CF-style units
/// (`<unit> since <reference datetime>`) to unix time.
pub fn convert_time(value: f64, units: &str) -> Result<i64, TimeError> {
    let mut parts = units.trim().splitn(3, ' ');

    let unit = parts
        .next()
        .ok_or_else(|| TimeError::UnsupportedUnits(units.to_string()))?;

    if parts.next() != Some("since") {
        return Err(TimeError::UnsupportedUnits(units.to_string()));
    }

    let reference = parts
        .next()
        .ok_or_else(|| TimeError::UnsupportedUnits(units.to_string()))?;

    let multiplier = match unit.to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86_400.0,
        _ => return Err(TimeError::UnsupportedUnits(units.to_string())),
    };

    let reference = parse_reference(reference.trim())?;

    Ok(reference + (value * multiplier).round() as i64)
}

fn parse_reference(reference: &str) -> Result<i64, TimeError> {
    for format in ["%Y-%m-%d %H:%M:%S %:z", "%Y-%m-%d %H:%M:%S %z", "%Y-%m-%dT%H:%M:%S%:z"] {
        if let Ok(datetime) = DateTime::parse_from_str(reference, format) {
            return Ok(datetime.timestamp());
        }
    }

    let reference = reference.trim_end_matches(" UTC").trim_end_matches('Z');

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(reference, format) {
            return Ok(Utc.from_utc_datetime(&datetime).timestamp());
        }
    }

    NaiveDate::parse_from_str(reference, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Utc.from_utc_datetime(&d).timestamp())
        .ok_or_else(|| TimeError::InvalidDate(reference.to_string()))
}

/// Converts hours (lead times, repeats, hours of day) to whole seconds.
pub fn hours_to_seconds(hours: Float) -> i64 {
    (hours * SECONDS_PER_HOUR as Float).round() as i64
}

/// Human readable form of unix time used in log messages.
pub fn unixtime_to_string(time: i64) -> String {
    Utc.timestamp_opt(time, 0)
        .single()
        .map_or_else(|| time.to_string(), |t| t.format("%Y-%m-%d %H:%MZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::{convert_time, date_to_unixtime, hours_to_seconds, unixtime_to_string};
    use crate::errors::TimeError;

    #[test]
    fn seconds_since_epoch_are_unchanged() {
        assert_eq!(
            convert_time(1_571_835_600.0, "seconds since 1970-01-01 00:00:00 +00:00"),
            Ok(1_571_835_600)
        );
    }

    #[test]
    fn hours_since_date() {
        assert_eq!(convert_time(6.0, "hours since 2019-10-23"), Ok(1_571_788_800 + 6 * 3600));
        assert_eq!(
            convert_time(1.0, "days since 1970-01-01T00:00:00Z"),
            Ok(86_400)
        );
    }

    #[test]
    fn unknown_units_are_rejected() {
        assert!(matches!(
            convert_time(1.0, "fortnights since 1970-01-01"),
            Err(TimeError::UnsupportedUnits(_))
        ));
        assert!(convert_time(1.0, "seconds").is_err());
    }

    #[test]
    fn dates() {
        assert_eq!(date_to_unixtime(19700102), Ok(86_400));
        assert_eq!(date_to_unixtime(20191023), Ok(1_571_788_800));
        assert!(date_to_unixtime(20191323).is_err());
        assert_eq!(unixtime_to_string(1_571_788_800), "2019-10-23 00:00Z");
    }

    #[test]
    fn fractional_hours() {
        assert_eq!(hours_to_seconds(0.5), 1800);
        assert_eq!(hours_to_seconds(-6.0), -21_600);
        assert_eq!(hours_to_seconds(1.0 - 0.999_999_9), 0);
    }
}
