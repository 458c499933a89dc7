use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::side::Side;
use crate::types::Vec3;

/// Points produced per frame by the landmark generator.
pub const FRAME_LANDMARK_COUNT: usize = 478;

/// Points in the reduced subset used for distance features.
pub const SUBSET_LANDMARK_COUNT: usize = 51;

/// Landmarks diagnostic for one AU side variant.
///
/// Indices address the reduced subset and are read in consecutive pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkActionUnitEntry {
    pub au_id: u32,
    pub side: Side,
    pub landmark_indices: Vec<usize>,
}

/// AU id → landmark entries for each of its side variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandmarksActionUnitMap {
    entries: BTreeMap<u32, Vec<LandmarkActionUnitEntry>>,
}

impl LandmarksActionUnitMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: LandmarkActionUnitEntry) {
        self.entries.entry(entry.au_id).or_default().push(entry);
    }

    pub fn get(&self, au_id: u32) -> &[LandmarkActionUnitEntry] {
        self.entries.get(&au_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries in ascending AU id, side variants in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &LandmarkActionUnitEntry> {
        self.entries.values().flatten()
    }

    /// Number of distinct AU ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl FromIterator<LandmarkActionUnitEntry> for LandmarksActionUnitMap {
    fn from_iter<T: IntoIterator<Item = LandmarkActionUnitEntry>>(iter: T) -> Self {
        let mut map = Self::new();
        for entry in iter {
            map.insert(entry);
        }
        map
    }
}

/// Pick `indices` out of `points`, skipping indices past the end.
///
/// Used for the mesh-space landmark vertices of the character, where a
/// shorter list is still a usable diagnostic.
pub fn select_landmarks(points: &[Vec3], indices: &[usize]) -> Vec<Vec3> {
    indices
        .iter()
        .filter_map(|&index| {
            let p = points.get(index).copied();
            if p.is_none() {
                warn!(
                    "{}",
                    Error::IndexOutOfRange {
                        index,
                        len: points.len()
                    }
                );
            }
            p
        })
        .collect()
}

/// Reduced subset of a generated frame, position for position.
///
/// Fails with [`Error::IndexOutOfRange`] if any index is past the end of
/// `points`: dropping it would shift every later point and the AU entries
/// would read the wrong landmarks.
pub fn subset_landmarks(points: &[Vec3], indices: &[usize]) -> Result<Vec<Vec3>> {
    indices
        .iter()
        .map(|&index| {
            points.get(index).copied().ok_or(Error::IndexOutOfRange {
                index,
                len: points.len(),
            })
        })
        .collect()
}

/// Flatten a frame landmark document into one ordered buffer.
///
/// Accepts `{"data": [[{x,y,z}, ...], ...]}` or the bare nested array.
/// A malformed point rejects the whole frame: skipping it would renumber
/// every landmark after it.
pub fn parse_frame_document(doc: &serde_json::Value) -> Result<Vec<Vec3>> {
    let groups = doc.get("data").unwrap_or(doc);
    let groups = groups
        .as_array()
        .ok_or_else(|| Error::MalformedDocument("frame data is not an array".into()))?;

    let mut points = Vec::with_capacity(FRAME_LANDMARK_COUNT);
    for group in groups {
        match group.as_array() {
            Some(members) => {
                for point in members {
                    points.push(parse_point(point, points.len())?);
                }
            }
            None => points.push(parse_point(group, points.len())?),
        }
    }

    if points.len() != FRAME_LANDMARK_COUNT {
        debug!(
            count = points.len(),
            expected = FRAME_LANDMARK_COUNT,
            "frame landmark count differs from generator output"
        );
    }
    Ok(points)
}

fn parse_point(value: &serde_json::Value, position: usize) -> Result<Vec3> {
    Vec3::deserialize(value)
        .map_err(|e| Error::MalformedDocument(format!("landmark {}: {}", position, e)))
}

/// Read and flatten a frame landmark file.
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<Vec<Vec3>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let doc: serde_json::Value = serde_json::from_reader(reader)?;
    parse_frame_document(&doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_orders_by_au_then_insertion() {
        let map: LandmarksActionUnitMap = [
            LandmarkActionUnitEntry {
                au_id: 45,
                side: Side::Right,
                landmark_indices: vec![0, 1],
            },
            LandmarkActionUnitEntry {
                au_id: 1,
                side: Side::Center,
                landmark_indices: vec![2, 3],
            },
            LandmarkActionUnitEntry {
                au_id: 45,
                side: Side::Left,
                landmark_indices: vec![4, 5],
            },
        ]
        .into_iter()
        .collect();

        let order: Vec<_> = map.iter().map(|e| (e.au_id, e.side)).collect();
        assert_eq!(
            order,
            vec![(1, Side::Center), (45, Side::Right), (45, Side::Left)]
        );
        assert_eq!(map.len(), 2);
        assert_eq!(map.entry_count(), 3);
    }

    #[test]
    fn select_skips_out_of_range() {
        let points = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0)];
        let subset = select_landmarks(&points, &[1, 2, 0]);
        assert_eq!(subset, vec![points[1], points[0]]);
    }

    #[test]
    fn subset_keeps_positions_or_fails() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(2.0, 2.0, 2.0),
        ];
        let subset = subset_landmarks(&points, &[2, 0, 1]).unwrap();
        assert_eq!(subset, vec![points[2], points[0], points[1]]);

        let err = subset_landmarks(&points[..2], &[2, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 2, len: 2 }));
    }

    #[test]
    fn frame_document_flattens_groups_in_order() {
        let doc = json!({
            "data": [
                [{"x": 0.0, "y": 0.0, "z": 0.0}, {"x": 1.0, "y": 2.0, "z": 3.0}],
                [{"x": 4, "y": 5, "z": 6}]
            ]
        });
        let points = parse_frame_document(&doc).unwrap();
        assert_eq!(
            points,
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 2.0, 3.0),
                Vec3::new(4.0, 5.0, 6.0)
            ]
        );
    }

    #[test]
    fn malformed_point_rejects_frame() {
        let doc = json!({"data": [[{"x": 0.0, "y": 0.0}]]});
        let err = parse_frame_document(&doc).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));

        let err = parse_frame_document(&json!({"data": 3})).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }
}
