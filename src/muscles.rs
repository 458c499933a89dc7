use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::types::Vec3;

/// Muscle id → ordered vertex indices in the base mesh topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuscleIndexMap {
    muscles: BTreeMap<u32, Vec<usize>>,
}

impl MuscleIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, muscle_id: u32, indices: Vec<usize>) {
        self.muscles.insert(muscle_id, indices);
    }

    pub fn get(&self, muscle_id: u32) -> Option<&[usize]> {
        self.muscles.get(&muscle_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.muscles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.muscles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[usize])> {
        self.muscles.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    /// Drop every index outside `[0, vertex_count)`, warning for each one.
    ///
    /// Returns the number of indices removed.
    pub fn retain_in_bounds(&mut self, vertex_count: usize) -> usize {
        let mut dropped = 0;
        for (muscle_id, indices) in &mut self.muscles {
            indices.retain(|&index| {
                let keep = index < vertex_count;
                if !keep {
                    dropped += 1;
                    warn!(
                        muscle_id = *muscle_id,
                        "{}",
                        Error::IndexOutOfRange {
                            index,
                            len: vertex_count
                        }
                    );
                }
                keep
            });
        }
        dropped
    }

    /// Positions of each muscle's vertices, in index-list order.
    pub fn gather(&self, vertices: &[Vec3]) -> BTreeMap<u32, Vec<Vec3>> {
        self.muscles
            .iter()
            .map(|(muscle_id, indices)| {
                let points = indices
                    .iter()
                    .filter_map(|&index| match vertices.get(index) {
                        Some(p) => Some(*p),
                        None => {
                            warn!(
                                muscle_id = *muscle_id,
                                "{}",
                                Error::IndexOutOfRange {
                                    index,
                                    len: vertices.len()
                                }
                            );
                            None
                        }
                    })
                    .collect();
                (*muscle_id, points)
            })
            .collect()
    }
}

impl FromIterator<(u32, Vec<usize>)> for MuscleIndexMap {
    fn from_iter<T: IntoIterator<Item = (u32, Vec<usize>)>>(iter: T) -> Self {
        Self {
            muscles: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_indices_are_dropped() {
        let mut map: MuscleIndexMap = [(1, vec![0, 2, 5]), (2, vec![7, 1])].into_iter().collect();
        let dropped = map.retain_in_bounds(3);

        assert_eq!(dropped, 2);
        assert_eq!(map.get(1), Some(&[0, 2][..]));
        assert_eq!(map.get(2), Some(&[1][..]));
    }

    #[test]
    fn gather_groups_vertex_positions() {
        let vertices = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        ];
        let map: MuscleIndexMap = [(4, vec![2, 0, 9])].into_iter().collect();

        let grouped = map.gather(&vertices);
        assert_eq!(grouped[&4], vec![vertices[2], vertices[0]]);
    }
}
