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

//! Module containing constants used across the crate.

use crate::Float;

///WGS84 ellipsoid semi-major axis
pub const WGS84_A: Float = 6_378_137.0;

///WGS84 ellipsoid semi-minor axis
#[allow(clippy::excessive_precision)]
pub const WGS84_B: Float = 6_356_752.314_245;

///GRS80 ellipsoid inverse flattening
#[allow(clippy::excessive_precision)]
pub const GRS80_RF: Float = 298.257_222_101;

///Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS: Float = 6_371_000.0;

///Default fill value of netCDF `float` variables (`NC_FILL_FLOAT`).
///
///Cells of the archive that were never written hold exactly this value.
#[allow(clippy::excessive_precision)]
pub const NC_FILL_F32: f32 = 9.969_209_968_386_869e36;

///Sentinel used by observation providers to mark a missing observation.
pub const MISSING_OBS_SENTINEL: f32 = -999.0;

pub const SECONDS_PER_HOUR: i64 = 3600;

pub const SECONDS_PER_DAY: i64 = 86_400;

///Value of the `Conventions` attribute of the archive.
pub const ARCHIVE_CONVENTIONS: &str = "verif_1.0.0";
