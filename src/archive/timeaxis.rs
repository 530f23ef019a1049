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

//! Time-axis merger.
//!
//! A [`MergePlan`] describes the new initialization-time axis as a mapping
//! from every new row to the existing row it is copied from (or to nothing
//! for added times). Growing and sorting the axis are therefore the same
//! operation, applied identically to every per-time buffer.

use super::store::{Archive, Field};
use crate::{errors::ArchiveError, timeutil};
use log::{debug, info};
use ndarray::{s, Array4};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MergePlan {
    times: Vec<i64>,
    rows: Vec<Option<usize>>,
    existing: usize,
}

impl MergePlan {
    /// Merges proposed times into the existing axis.
    ///
    /// Times not yet in the axis are appended in the order they are first
    /// proposed. With `sort` the whole axis is sorted ascending afterwards.
    pub fn new<I>(existing: &[i64], proposed: I, sort: bool) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut known: FxHashSet<i64> = existing.iter().copied().collect();

        let mut times = existing.to_vec();
        let mut rows: Vec<Option<usize>> = (0..existing.len()).map(Some).collect();

        for time in proposed {
            if known.insert(time) {
                times.push(time);
                rows.push(None);
            }
        }

        if sort {
            let mut order: Vec<usize> = (0..times.len()).collect();
            order.sort_by_key(|i| times[*i]);

            times = order.iter().map(|i| times[*i]).collect();
            rows = order.iter().map(|i| rows[*i]).collect();
        }

        MergePlan {
            times,
            rows,
            existing: existing.len(),
        }
    }

    /// Initialization times after the merge.
    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn added(&self) -> usize {
        self.times.len() - self.existing
    }

    /// Existing rows change position.
    pub fn is_permuted(&self) -> bool {
        self.rows
            .iter()
            .enumerate()
            .any(|(i, row)| matches!(row, Some(r) if *r != i))
    }

    /// Position of every time in the merged axis.
    pub fn index(&self) -> FxHashMap<i64, usize> {
        self.times
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, i))
            .collect()
    }

    /// Builds the buffer of the merged axis: existing rows are copied
    /// to their new positions, added rows are missing.
    pub fn apply(&self, buffer: &Array4<f32>) -> Array4<f32> {
        let (_, leadtimes, locations, depth) = buffer.dim();
        let mut merged = Array4::from_elem((self.times.len(), leadtimes, locations, depth), f32::NAN);

        for (new, old) in self.rows.iter().enumerate() {
            if let Some(old) = old {
                merged
                    .slice_mut(s![new, .., .., ..])
                    .assign(&buffer.slice(s![*old, .., .., ..]));
            }
        }

        merged
    }

    pub fn log_summary(&self) {
        if self.added() == 0 {
            info!("No new initialization times added");
        } else {
            info!("Adding {} new initialization times", self.added());
            for time in self.rows.iter().zip(&self.times).filter(|(r, _)| r.is_none()) {
                debug!("New initialization time {}", timeutil::unixtime_to_string(*time.1));
            }
        }

        if self.is_permuted() {
            info!("Sorting times to be in ascending order");
        }
    }
}

/// Working buffers of per-time fields laid out on the merged time axis.
pub struct TimeBuffers {
    buffers: Vec<(Field, Array4<f32>)>,
}

impl TimeBuffers {
    /// Loads fields of the archive and lays them out according to the plan.
    /// Cleared fields start empty.
    pub fn load(
        archive: &Archive,
        plan: &MergePlan,
        fields: &[Field],
        cleared: &[Field],
    ) -> Result<Self, ArchiveError> {
        let mut buffers = Vec::with_capacity(fields.len());

        for field in fields {
            let mut existing = archive.read_buffer(*field)?;

            if cleared.contains(field) {
                debug!("Clearing {}", field.name());
                existing.fill(f32::NAN);
            }

            buffers.push((*field, plan.apply(&existing)));
        }

        Ok(TimeBuffers { buffers })
    }

    #[cfg(test)]
    pub fn from_parts(buffers: Vec<(Field, Array4<f32>)>) -> Self {
        TimeBuffers { buffers }
    }

    pub fn get(&self, field: Field) -> Option<&Array4<f32>> {
        self.buffers
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, buffer)| buffer)
    }

    pub fn get_mut(&mut self, field: Field) -> Option<&mut Array4<f32>> {
        self.buffers
            .iter_mut()
            .find(|(f, _)| *f == field)
            .map(|(_, buffer)| buffer)
    }

    /// Writes all buffers to the archive.
    pub fn store(&self, archive: &mut Archive) -> Result<(), ArchiveError> {
        for (field, buffer) in &self.buffers {
            archive.write_buffer(*field, buffer)?;
        }

        Ok(())
    }
}
