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

//! Parsers of text inputs: station metadata and point observations.
//!
//! Each file dialect is recognised from its first lines. Records that
//! cannot be parsed are reported with a warning and skipped, only
//! unreadable files and unusable headers are errors.

pub mod locations;
pub mod observations;

/// Parses observed value, `.` and `x` mark a missing value.
fn parse_value(raw: &str) -> Option<f32> {
    match raw.trim() {
        "." | "x" | "" => None,
        raw => raw.parse::<f32>().ok().filter(|v| !v.is_nan()),
    }
}

/// Data lines start with a numeric station id.
fn is_number(raw: &str) -> bool {
    raw.trim().parse::<f64>().is_ok()
}
