//! Data-file locations and evaluation parameters.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activation::{DistancePolicy, Thresholds};
use crate::error::Result;

/// Everything a [`Retargeter`](crate::Retargeter) needs besides the mesh.
///
/// Missing fields take their defaults, so a config file only has to name
/// what differs from the stock `data/` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetargetConfig {
    pub muscle_index_map: PathBuf,
    pub delta_table: PathBuf,
    pub landmarks_mesh_index: PathBuf,
    pub landmarks_pixel_index: PathBuf,
    pub landmarks_action_units: PathBuf,
    pub thresholds: Thresholds,
    pub distance_policy: DistancePolicy,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            muscle_index_map: PathBuf::from("data/musclePatches.json"),
            delta_table: PathBuf::from("data/deltaTransfer.json"),
            landmarks_mesh_index: PathBuf::from("data/landmarksMeshIndex.json"),
            landmarks_pixel_index: PathBuf::from("data/landmarksPixelIndex.json"),
            landmarks_action_units: PathBuf::from("data/landmarksActionUnits.json"),
            thresholds: Thresholds::default(),
            distance_policy: DistancePolicy::default(),
        }
    }
}

impl RetargetConfig {
    /// Read a JSON config; relative paths resolve against its directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: RetargetConfig = serde_json::from_reader(reader)?;
        config.thresholds.validate()?;
        Ok(config.resolve_paths(path.parent().unwrap_or_else(|| Path::new(""))))
    }

    /// Join every relative path onto `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for path in [
            &mut self.muscle_index_map,
            &mut self.delta_table,
            &mut self.landmarks_mesh_index,
            &mut self.landmarks_pixel_index,
            &mut self.landmarks_action_units,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}
