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

//! Module with methods to do computations of geographical
//! projections found in forecast files (described with proj4 strings).
//! Closely follows algorithms and instructions in:
//! <https://pubs.er.usgs.gov/publication/pp1395>

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use float_cmp::approx_eq;
use rustc_hash::FxHashMap;

use crate::constants::{GRS80_RF, WGS84_A, WGS84_B};
use crate::{errors::ProjectionError, Float};

/// Radius of the sphere used by `+ellps=sphere`.
const PROJ_SPHERE_R: Float = 6_370_997.0;

/// Reference ellipsoid (or sphere when `e == 0`).
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct Ellipsoid {
    a: Float,
    e: Float,
}

impl Ellipsoid {
    pub fn sphere(radius: Float) -> Self {
        Ellipsoid { a: radius, e: 0.0 }
    }

    pub fn from_axes(a: Float, b: Float) -> Self {
        Ellipsoid {
            a,
            e: (1.0 - (b * b) / (a * a)).sqrt(),
        }
    }

    pub fn from_flattening(a: Float, rf: Float) -> Self {
        let f = 1.0 / rf;
        Ellipsoid {
            a,
            e: (2.0 * f - f * f).sqrt(),
        }
    }

    pub fn wgs84() -> Self {
        Ellipsoid::from_axes(WGS84_A, WGS84_B)
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Ellipsoid::wgs84()
    }
}

/// Lambert Conformal Conic projection, secant or tangent.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct LambertConicConformal {
    ellps: Ellipsoid,
    lambda_0: Float,
    n: Float,
    big_f: Float,
    rho_0: Float,
}

impl LambertConicConformal {
    /// LCC projection constructor from reference longitude,
    /// reference latitude and two standard parallels.
    /// Equal parallels give the tangent cone.
    pub fn new(
        ellps: Ellipsoid,
        lon_0: Float,
        lat_0: Float,
        lat_1: Float,
        lat_2: Float,
    ) -> Result<Self, ProjectionError> {
        if !lon_0.is_finite() || !lat_0.is_finite() || !lat_1.is_finite() || !lat_2.is_finite()
        {
            return Err(ProjectionError::IncorrectParams(
                "one of params is not finite",
            ));
        }

        if !(-180.0..=360.0).contains(&lon_0) {
            return Err(ProjectionError::IncorrectParams("longitude out of bounds"));
        }

        if !(-90.0..=90.0).contains(&lat_0)
            || !(-90.0..90.0).contains(&lat_1)
            || !(-90.0..90.0).contains(&lat_2)
        {
            return Err(ProjectionError::IncorrectParams("latitude out of bounds"));
        }

        if approx_eq!(Float, lat_1, -lat_2) {
            return Err(ProjectionError::IncorrectParams(
                "standard parallels cannot be symmetric about the equator",
            ));
        }

        let e = ellps.e;
        let phi_0 = lat_0.to_radians();
        let phi_1 = lat_1.to_radians();
        let phi_2 = lat_2.to_radians();

        let t_0 = t(phi_0, e);
        let t_1 = t(phi_1, e);
        let m_1 = m(phi_1, e);

        let n = if approx_eq!(Float, lat_1, lat_2) {
            phi_1.sin()
        } else {
            n(m_1, m(phi_2, e), t_1, t(phi_2, e))
        };

        let big_f = big_f(m_1, n, t_1);
        let rho_0 = rho(ellps.a, big_f, t_0, n);

        Ok(LambertConicConformal {
            ellps,
            lambda_0: lon_0.to_radians(),
            n,
            big_f,
            rho_0,
        })
    }

    /// Function to project geographic coordinates
    /// to cartographic coordinates with previously specified LCC projection.
    pub fn project(&self, lon: Float, lat: Float) -> (Float, Float) {
        let phi = lat.to_radians();
        let lambda = lon.to_radians();

        let t = t(phi, self.ellps.e);
        let theta = self.n * wrap_pi(lambda - self.lambda_0);
        let rho = rho(self.ellps.a, self.big_f, t, self.n);

        let x = rho * theta.sin();
        let y = self.rho_0 - rho * theta.cos();

        (x, y)
    }
}

/// Polar Stereographic projection (north or south aspect).
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct PolarStereographic {
    ellps: Ellipsoid,
    lambda_0: Float,
    south: bool,
    /// Scale of `t` to obtain `rho`.
    rho_scale: Float,
}

impl PolarStereographic {
    pub fn new(
        ellps: Ellipsoid,
        lon_0: Float,
        lat_0: Float,
        lat_ts: Float,
        k_0: Float,
    ) -> Result<Self, ProjectionError> {
        if !approx_eq!(Float, lat_0.abs(), 90.0) {
            return Err(ProjectionError::Unsupported(
                "oblique stereographic".to_string(),
            ));
        }

        let south = lat_0 < 0.0;
        let e = ellps.e;
        let phi_c = if south { -lat_ts } else { lat_ts }.to_radians();

        let rho_scale = if approx_eq!(Float, phi_c, FRAC_PI_2, epsilon = 1e-10) {
            2.0 * ellps.a * k_0
                / ((1.0 + e).powf(1.0 + e) * (1.0 - e).powf(1.0 - e)).sqrt()
        } else {
            ellps.a * m(phi_c, e) / t(phi_c, e)
        };

        Ok(PolarStereographic {
            ellps,
            lambda_0: lon_0.to_radians(),
            south,
            rho_scale,
        })
    }

    pub fn project(&self, lon: Float, lat: Float) -> (Float, Float) {
        let (phi, dlambda) = if self.south {
            (-lat.to_radians(), -(lon.to_radians() - self.lambda_0))
        } else {
            (lat.to_radians(), lon.to_radians() - self.lambda_0)
        };

        let rho = self.rho_scale * t(phi, self.ellps.e);
        let x = rho * dlambda.sin();
        let y = -rho * dlambda.cos();

        if self.south {
            (-x, -y)
        } else {
            (x, y)
        }
    }
}

/// Normal aspect Mercator projection.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct Mercator {
    ellps: Ellipsoid,
    lambda_0: Float,
    k_0: Float,
}

impl Mercator {
    pub fn new(ellps: Ellipsoid, lon_0: Float, lat_ts: Float, k_0: Float) -> Self {
        let phi_ts = lat_ts.to_radians();
        let k_0 = if lat_ts == 0.0 { k_0 } else { m(phi_ts, ellps.e) };

        Mercator {
            ellps,
            lambda_0: lon_0.to_radians(),
            k_0,
        }
    }

    pub fn project(&self, lon: Float, lat: Float) -> (Float, Float) {
        let e = self.ellps.e;
        let phi = lat.to_radians();
        let lambda = wrap_pi(lon.to_radians() - self.lambda_0);

        let x = self.ellps.a * self.k_0 * lambda;
        let y = self.ellps.a
            * self.k_0
            * ((FRAC_PI_4 + 0.5 * phi).tan()
                * ((1.0 - e * phi.sin()) / (1.0 + e * phi.sin())).powf(e / 2.0))
            .ln();

        (x, y)
    }
}

#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
enum Kind {
    Lcc(LambertConicConformal),
    Stere(PolarStereographic),
    Merc(Mercator),
    LonLat,
}

/// Projection of a forecast grid, built from its proj4 definition.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct Projection {
    kind: Kind,
    false_easting: Float,
    false_northing: Float,
    to_meter: Float,
}

impl Projection {
    /// Parses proj4 definition such as
    /// `+proj=lcc +lat_0=63 +lon_0=15 +lat_1=63 +lat_2=63 +R=6.371e+06`.
    pub fn from_proj4(definition: &str) -> Result<Self, ProjectionError> {
        let params = parse_proj4(definition);

        let name = params
            .get("proj")
            .and_then(|v| v.as_deref())
            .ok_or_else(|| ProjectionError::CantParse("proj".to_string()))?;

        let ellps = parse_ellipsoid(&params)?;
        let lon_0 = number(&params, "lon_0")?.unwrap_or(0.0);
        let lat_0 = number(&params, "lat_0")?.unwrap_or(0.0);
        let k_0 = match number(&params, "k_0")? {
            Some(k) => k,
            None => number(&params, "k")?.unwrap_or(1.0),
        };

        let kind = match name {
            "lcc" => {
                let lat_1 = number(&params, "lat_1")?
                    .ok_or_else(|| ProjectionError::CantParse("lat_1".to_string()))?;
                let lat_2 = number(&params, "lat_2")?.unwrap_or(lat_1);
                Kind::Lcc(LambertConicConformal::new(ellps, lon_0, lat_0, lat_1, lat_2)?)
            }
            "stere" | "ups" => {
                let lat_ts = number(&params, "lat_ts")?.unwrap_or(lat_0);
                Kind::Stere(PolarStereographic::new(ellps, lon_0, lat_0, lat_ts, k_0)?)
            }
            "merc" => {
                let lat_ts = number(&params, "lat_ts")?.unwrap_or(0.0);
                Kind::Merc(Mercator::new(ellps, lon_0, lat_ts, k_0))
            }
            "longlat" | "latlong" | "lonlat" | "latlon" => Kind::LonLat,
            other => return Err(ProjectionError::Unsupported(other.to_string())),
        };

        let to_meter = match params.get("units").and_then(|v| v.as_deref()) {
            Some("km") => 1000.0,
            Some("m") | None => number(&params, "to_meter")?.unwrap_or(1.0),
            Some(other) => return Err(ProjectionError::Unsupported(format!("units={}", other))),
        };

        Ok(Projection {
            kind,
            false_easting: number(&params, "x_0")?.unwrap_or(0.0),
            false_northing: number(&params, "y_0")?.unwrap_or(0.0),
            to_meter,
        })
    }

    /// Projects geographic coordinates (degrees) to the
    /// coordinates of the grid, in the units declared by the definition.
    pub fn project(&self, lon: Float, lat: Float) -> (Float, Float) {
        let (x, y) = match &self.kind {
            Kind::Lcc(p) => p.project(lon, lat),
            Kind::Stere(p) => p.project(lon, lat),
            Kind::Merc(p) => p.project(lon, lat),
            Kind::LonLat => return (lon, lat),
        };

        (
            (x + self.false_easting) / self.to_meter,
            (y + self.false_northing) / self.to_meter,
        )
    }

    /// Length of one projected unit in metres.
    pub fn to_meter(&self) -> Float {
        match self.kind {
            Kind::LonLat => 1.0,
            _ => self.to_meter,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self.kind, Kind::LonLat)
    }
}

fn parse_proj4(definition: &str) -> FxHashMap<String, Option<String>> {
    definition
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('+'))
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (token.to_string(), None),
        })
        .collect()
}

fn number(
    params: &FxHashMap<String, Option<String>>,
    key: &str,
) -> Result<Option<Float>, ProjectionError> {
    match params.get(key) {
        Some(Some(value)) => value
            .parse::<Float>()
            .map(Some)
            .map_err(|_| ProjectionError::CantParse(key.to_string())),
        Some(None) => Err(ProjectionError::CantParse(key.to_string())),
        None => Ok(None),
    }
}

fn parse_ellipsoid(
    params: &FxHashMap<String, Option<String>>,
) -> Result<Ellipsoid, ProjectionError> {
    if let Some(r) = number(params, "R")? {
        return Ok(Ellipsoid::sphere(r));
    }

    if let Some(a) = number(params, "a")? {
        if let Some(b) = number(params, "b")? {
            return Ok(Ellipsoid::from_axes(a, b));
        }
        if let Some(rf) = number(params, "rf")? {
            return Ok(Ellipsoid::from_flattening(a, rf));
        }
        return Ok(Ellipsoid::sphere(a));
    }

    match params.get("ellps").and_then(|v| v.as_deref()) {
        None | Some("WGS84") => Ok(Ellipsoid::wgs84()),
        Some("GRS80") => Ok(Ellipsoid::from_flattening(WGS84_A, GRS80_RF)),
        Some("sphere") => Ok(Ellipsoid::sphere(PROJ_SPHERE_R)),
        Some(other) => Err(ProjectionError::Unsupported(format!("ellps={}", other))),
    }
}

/// Brings longitude difference into `[-pi, pi)`.
fn wrap_pi(lambda: Float) -> Float {
    use std::f64::consts::PI;
    (lambda + PI).rem_euclid(2.0 * PI) - PI
}

fn t(phi: Float, e: Float) -> Float {
    ((FRAC_PI_4 - 0.5 * phi).tan())
        / (((1.0 - e * phi.sin()) / (1.0 + e * phi.sin())).powf(e / 2.0))
}

fn m(phi: Float, e: Float) -> Float {
    phi.cos() / (1.0 - (e.powi(2) * (phi.sin()).powi(2))).sqrt()
}

fn n(m_1: Float, m_2: Float, t_1: Float, t_2: Float) -> Float {
    (m_1.ln() - m_2.ln()) / (t_1.ln() - t_2.ln())
}

fn big_f(m_1: Float, n: Float, t_1: Float) -> Float {
    m_1 / (n * t_1.powf(n))
}

fn rho(a: Float, big_f: Float, t: Float, n: Float) -> Float {
    a * big_f * t.powf(n)
}

#[cfg(test)]
mod tests {
    use super::{Ellipsoid, LambertConicConformal, Projection};
    use crate::errors::ProjectionError;
    use float_cmp::approx_eq;

    #[test]
    fn secant_cone_on_clarke_ellipsoid() {
        // worked example of Snyder's Map Projections (1987), p. 296
        let clarke = Ellipsoid::from_axes(6_378_206.4, 6_356_583.8);
        let proj = LambertConicConformal::new(clarke, -96.0, 23.0, 33.0, 45.0).unwrap();

        let (x, y) = proj.project(-75.0, 35.0);

        assert!(approx_eq!(f64, x, 1_894_410.9, epsilon = 1.0));
        assert!(approx_eq!(f64, y, 1_564_649.5, epsilon = 1.0));
    }

    #[test]
    fn tangent_cone_maps_origin_to_zero() {
        let proj = Projection::from_proj4(
            "+proj=lcc +lat_0=63 +lon_0=15 +lat_1=63 +lat_2=63 +no_defs +R=6.371e+06",
        )
        .unwrap();

        let (x, y) = proj.project(15.0, 63.0);
        assert!(approx_eq!(f64, x, 0.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, y, 0.0, epsilon = 1e-6));

        // moving east along the parallel increases x
        let (x_east, _) = proj.project(16.0, 63.0);
        assert!(x_east > 0.0);

        // on a sphere the distance along the standard parallel is preserved
        let expected = 6.371e6 * 63.0_f64.to_radians().cos() * 1.0_f64.to_radians();
        assert!((x_east - expected).abs() / expected < 1e-3);
    }

    #[test]
    fn polar_stereographic_north() {
        let proj = Projection::from_proj4("+proj=stere +lat_0=90 +lon_0=0 +R=6371000").unwrap();

        let (x, y) = proj.project(0.0, 90.0);
        assert!(approx_eq!(f64, x, 0.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, y, 0.0, epsilon = 1e-6));

        // point on the central meridian lies on the negative y axis
        let (x, y) = proj.project(0.0, 60.0);
        assert!(x.abs() < 1e-6);
        assert!(y < 0.0);
    }

    #[test]
    fn mercator_and_false_easting() {
        let proj = Projection::from_proj4("+proj=merc +R=6371000 +x_0=1000 +units=km").unwrap();
        let (x, y) = proj.project(0.0, 0.0);

        assert!(approx_eq!(f64, x, 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, y, 0.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, proj.to_meter(), 1000.0));
    }

    #[test]
    fn unsupported_projection() {
        assert_eq!(
            Projection::from_proj4("+proj=ob_tran +o_proj=longlat"),
            Err(ProjectionError::Unsupported("ob_tran".to_string()))
        );
        assert!(Projection::from_proj4("+proj=lcc +lat_1=abc").is_err());
    }
}
