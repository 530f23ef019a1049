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

//! Name-based discovery of the meaning of field dimensions.
//!
//! Forecast files store the same field with axes in any order
//! (`time, y, x`, `x, y, time, ensemble_member`, ...). The extractor
//! only ever sees fields in the canonical `(time, y, x, ensemble)` layout
//! produced by [`DimensionRoles::normalize`].

use crate::errors::SourceError;
use log::warn;
use ndarray::{Array4, ArrayD, Axis, Ix4, IxDyn};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Role {
    Time,
    Y,
    X,
    Ensemble,
    /// Degenerate axes such as height or model level, index 0 is used.
    Other,
}

/// Canonical order of axes after normalisation.
const CANONICAL: [Role; 4] = [Role::Time, Role::Y, Role::X, Role::Ensemble];

const ROLE_TABLE: &[(&str, Role)] = &[
    ("time", Role::Time),
    ("t", Role::Time),
    ("y", Role::Y),
    ("yc", Role::Y),
    ("rlat", Role::Y),
    ("lat", Role::Y),
    ("latitude", Role::Y),
    ("x", Role::X),
    ("xc", Role::X),
    ("rlon", Role::X),
    ("lon", Role::X),
    ("longitude", Role::X),
    ("ensemble_member", Role::Ensemble),
    ("member", Role::Ensemble),
    ("realization", Role::Ensemble),
    ("ens", Role::Ensemble),
];

/// Looks up the role of a dimension from its name.
pub fn role_of(name: &str) -> Role {
    ROLE_TABLE
        .iter()
        .find(|(known, _)| *known == name)
        .map_or(Role::Other, |(_, role)| *role)
}

/// Roles of all dimensions of one field, resolved once per source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DimensionRoles {
    roles: Vec<Role>,
    lens: Vec<usize>,
}

impl DimensionRoles {
    pub fn resolve(field: &str, dims: &[(String, usize)]) -> Result<Self, SourceError> {
        let roles: Vec<Role> = dims.iter().map(|(name, _)| role_of(name)).collect();
        let lens: Vec<usize> = dims.iter().map(|(_, len)| *len).collect();

        for role in CANONICAL {
            if roles.iter().filter(|r| **r == role).count() > 1 {
                return Err(SourceError::Dimensionality(
                    field.to_string(),
                    format!("more than one {:?} dimension", role),
                ));
            }
        }

        if !roles.contains(&Role::Time) {
            return Err(SourceError::NoTimeDimension(field.to_string()));
        }

        for ((name, len), role) in dims.iter().zip(&roles) {
            if *role == Role::Other && *len > 1 {
                warn!(
                    "Field {} has {} levels along {}, taking the first one",
                    field, len, name
                );
            }
        }

        Ok(DimensionRoles { roles, lens })
    }

    /// Length of the axis with given role, `1` when it is absent.
    pub fn len(&self, role: Role) -> usize {
        self.roles
            .iter()
            .position(|r| *r == role)
            .map_or(1, |i| self.lens[i])
    }

    pub fn shape(&self) -> &[usize] {
        &self.lens
    }

    /// Reorders field data to canonical `(time, y, x, ensemble)` layout.
    /// Missing axes are inserted with length one.
    pub fn normalize(&self, data: ArrayD<f32>) -> Result<Array4<f32>, SourceError> {
        let mut data = data;
        let mut roles = self.roles.clone();

        for i in (0..roles.len()).rev() {
            if roles[i] == Role::Other {
                data = data.index_axis_move(Axis(i), 0);
                roles.remove(i);
            }
        }

        for role in CANONICAL {
            if !roles.contains(&role) {
                data.insert_axis_inplace(Axis(roles.len()));
                roles.push(role);
            }
        }

        let order: Vec<usize> = CANONICAL
            .iter()
            .filter_map(|role| roles.iter().position(|r| r == role))
            .collect();

        data.permuted_axes(IxDyn(&order))
            .into_dimensionality::<Ix4>()
            .map_err(|err| SourceError::Dimensionality(format!("{:?}", self.roles), err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{role_of, DimensionRoles, Role};
    use crate::errors::SourceError;
    use ndarray::{ArrayD, IxDyn};

    fn dims(names: &[(&str, usize)]) -> Vec<(String, usize)> {
        names.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    #[test]
    fn lookup_table() {
        assert_eq!(role_of("ensemble_member"), Role::Ensemble);
        assert_eq!(role_of("longitude"), Role::X);
        assert_eq!(role_of("height0"), Role::Other);
    }

    #[test]
    fn any_axis_order_is_normalized() {
        // x=2, ensemble=3, time=4, y=5
        let roles = DimensionRoles::resolve(
            "t2m",
            &dims(&[("x", 2), ("ensemble_member", 3), ("time", 4), ("y", 5)]),
        )
        .unwrap();

        let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4, 5]), |ix| {
            (ix[0] * 1000 + ix[1] * 100 + ix[2] * 10 + ix[3]) as f32
        });

        let canonical = roles.normalize(data).unwrap();

        assert_eq!(canonical.shape(), &[4, 5, 2, 3]);
        // time=1, y=4, x=1, member=2
        assert_eq!(canonical[[1, 4, 1, 2]], 1214.0);
    }

    #[test]
    fn degenerate_and_missing_axes() {
        let roles = DimensionRoles::resolve(
            "t2m",
            &dims(&[("time", 2), ("height0", 1), ("y", 3), ("x", 1)]),
        )
        .unwrap();

        let data = ArrayD::from_shape_fn(IxDyn(&[2, 1, 3, 1]), |ix| (ix[0] * 10 + ix[2]) as f32);
        let canonical = roles.normalize(data).unwrap();

        assert_eq!(canonical.shape(), &[2, 3, 1, 1]);
        assert_eq!(canonical[[1, 2, 0, 0]], 12.0);
        assert_eq!(roles.len(Role::Ensemble), 1);
    }

    #[test]
    fn time_is_required() {
        assert!(matches!(
            DimensionRoles::resolve("orography", &dims(&[("y", 3), ("x", 3)])),
            Err(SourceError::NoTimeDimension(_))
        ));
    }
}
