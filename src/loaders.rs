//! Adapters from configuration documents to the engine's maps and tables.
//!
//! Loaders recover locally: an entry that cannot be read is skipped,
//! logged, and recorded in [`LoadReport::skipped`] while the rest of the
//! document still loads. Only a document whose top-level shape is wrong
//! fails outright, and the muscle map loader does not fail at all.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::delta::BlendshapeJob;
use crate::error::{Error, Result};
use crate::landmarks::{LandmarkActionUnitEntry, LandmarksActionUnitMap};
use crate::muscles::MuscleIndexMap;
use crate::obj;
use crate::side::Side;
use crate::types::Vec3;

/// A loaded value and the diagnostics for whatever was left out of it.
#[derive(Debug)]
pub struct LoadReport<T> {
    pub value: T,
    pub skipped: Vec<Error>,
}

impl<T> LoadReport<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            skipped: Vec::new(),
        }
    }

    fn skip(&mut self, error: Error) {
        warn!("{}", error);
        self.skipped.push(error);
    }

    /// True when nothing was skipped.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// `"AU12_LipCornerPuller"` → `Some(12)`.
///
/// Takes the digits after an `AU`/`au` prefix up to the first non-digit.
pub fn parse_au_id(key: &str) -> Option<u32> {
    let rest = key
        .strip_prefix("AU")
        .or_else(|| key.strip_prefix("au"))
        .unwrap_or(key);
    let digits: &str = &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];
    digits.parse().ok()
}

/// AU id given either as an integer or as a key such as `"AU4_BrowLowerer"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AuRef {
    Id(u32),
    Key(String),
}

impl AuRef {
    fn resolve(&self) -> Option<u32> {
        match self {
            AuRef::Id(id) => Some(*id),
            AuRef::Key(key) => parse_au_id(key),
        }
    }
}

// ---- muscle index map ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuscleRecord {
    #[serde(alias = "id")]
    muscle_id: AuRef,
    #[serde(alias = "indices")]
    vertex_indices: Vec<usize>,
}

fn parse_muscle_id(key: &str) -> Option<u32> {
    key.trim().parse().ok()
}

/// Muscle map from `{"<id>": [idx, ...]}` or
/// `[{"muscleId": id, "vertexIndices": [...]}, ...]`.
///
/// Never fails: a malformed document yields an empty map and a warning.
pub fn parse_muscle_index_map(doc: &Value) -> LoadReport<MuscleIndexMap> {
    let mut report = LoadReport::new(MuscleIndexMap::new());

    match doc {
        Value::Object(muscles) => {
            for (key, indices) in muscles {
                let Some(muscle_id) = parse_muscle_id(key) else {
                    report.skip(Error::MalformedDocument(format!(
                        "muscle key {:?} is not an integer id",
                        key
                    )));
                    continue;
                };
                match Vec::<usize>::deserialize(indices) {
                    Ok(indices) => report.value.insert(muscle_id, indices),
                    Err(e) => report.skip(Error::MalformedDocument(format!(
                        "muscle {}: {}",
                        muscle_id, e
                    ))),
                }
            }
        }
        Value::Array(records) => {
            for (position, record) in records.iter().enumerate() {
                let parsed = MuscleRecord::deserialize(record)
                    .map_err(|e| e.to_string())
                    .and_then(|r| match r.muscle_id.resolve() {
                        Some(id) => Ok((id, r.vertex_indices)),
                        None => Err("muscle id is not an integer".to_string()),
                    });
                match parsed {
                    Ok((id, indices)) => report.value.insert(id, indices),
                    Err(e) => report.skip(Error::MalformedDocument(format!(
                        "muscle record {}: {}",
                        position, e
                    ))),
                }
            }
        }
        _ => report.skip(Error::MalformedDocument(
            "muscle index document is neither an object nor an array".into(),
        )),
    }

    if report.value.is_empty() {
        warn!("muscle index map is empty");
    } else {
        info!(muscles = report.value.len(), "loaded muscle index map");
    }
    report
}

/// Read a muscle map file. Unreadable files give an empty map.
pub fn load_muscle_index_map<P: AsRef<Path>>(path: P) -> LoadReport<MuscleIndexMap> {
    let path = path.as_ref();
    match read_document(path) {
        Ok(doc) => parse_muscle_index_map(&doc),
        Err(e) => {
            let mut report = LoadReport::new(MuscleIndexMap::new());
            report.skip(Error::MalformedDocument(format!(
                "{}: {}",
                path.display(),
                e
            )));
            report
        }
    }
}

// ---- landmark index lists ----

/// Flat integer list (mesh-space or pixel-space landmark indices).
///
/// Position in the list is meaningful, so one bad element rejects the list.
pub fn parse_landmark_indices(doc: &Value) -> Result<Vec<usize>> {
    Vec::<usize>::deserialize(doc)
        .map_err(|e| Error::MalformedDocument(format!("landmark index list: {}", e)))
}

pub fn load_landmark_indices<P: AsRef<Path>>(path: P) -> Result<Vec<usize>> {
    let indices = parse_landmark_indices(&read_document(path.as_ref())?)?;
    info!(
        path = %path.as_ref().display(),
        count = indices.len(),
        "loaded landmark indices"
    );
    Ok(indices)
}

// ---- AU <-> landmark mapping ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingRecord {
    #[serde(alias = "key")]
    au_id: AuRef,
    #[serde(default)]
    side: Side,
    landmark_indices: Vec<usize>,
}

/// `{"mappings": [{"auId", "side", "landmarkIndices"}, ...]}` or the bare list.
///
/// Malformed entries are skipped; the others still load.
pub fn parse_action_unit_mappings(doc: &Value) -> Result<LoadReport<LandmarksActionUnitMap>> {
    let entries = doc
        .get("mappings")
        .unwrap_or(doc)
        .as_array()
        .ok_or_else(|| Error::MalformedDocument("AU mapping document has no entry list".into()))?;

    let mut report = LoadReport::new(LandmarksActionUnitMap::new());
    for (position, entry) in entries.iter().enumerate() {
        let record = match MappingRecord::deserialize(entry) {
            Ok(record) => record,
            Err(e) => {
                report.skip(Error::MalformedDocument(format!(
                    "mapping {}: {}",
                    position, e
                )));
                continue;
            }
        };
        let Some(au_id) = record.au_id.resolve() else {
            report.skip(Error::MalformedDocument(format!(
                "mapping {}: AU id is not an integer",
                position
            )));
            continue;
        };
        report.value.insert(LandmarkActionUnitEntry {
            au_id,
            side: record.side,
            landmark_indices: record.landmark_indices,
        });
    }

    info!(
        action_units = report.value.len(),
        entries = report.value.entry_count(),
        skipped = report.skipped.len(),
        "loaded AU landmark mappings"
    );
    Ok(report)
}

pub fn load_action_unit_mappings<P: AsRef<Path>>(
    path: P,
) -> Result<LoadReport<LandmarksActionUnitMap>> {
    parse_action_unit_mappings(&read_document(path.as_ref())?)
}

// ---- blendshape manifest ----

/// One blendshape of the offline precompute step.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendshapeSpec {
    pub au_id: u32,
    pub side: Side,
    pub blendshape: PathBuf,
    pub active_muscles: Vec<u32>,
    pub passive_muscles: Vec<u32>,
}

/// Neutral mesh and the AU blendshapes to diff against it.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendshapeManifest {
    pub neutral: PathBuf,
    pub action_units: Vec<BlendshapeSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestRecord {
    #[serde(alias = "key")]
    au_id: AuRef,
    #[serde(default)]
    side: Side,
    blendshape: PathBuf,
    #[serde(default)]
    active_muscles: Vec<u32>,
    #[serde(default)]
    passive_muscles: Vec<u32>,
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path
    }
}

impl BlendshapeManifest {
    /// Parse a manifest; relative mesh paths are joined onto `base`.
    pub fn parse(doc: &Value, base: &Path) -> Result<LoadReport<Self>> {
        let neutral = doc
            .get("neutral")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedDocument("manifest has no neutral mesh".into()))?;
        let entries = doc
            .get("actionUnits")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MalformedDocument("manifest has no actionUnits list".into()))?;

        let mut report = LoadReport::new(BlendshapeManifest {
            neutral: resolve(base, PathBuf::from(neutral)),
            action_units: Vec::with_capacity(entries.len()),
        });

        for (position, entry) in entries.iter().enumerate() {
            let parsed = ManifestRecord::deserialize(entry)
                .map_err(|e| e.to_string())
                .and_then(|r| match r.au_id.resolve() {
                    Some(au_id) => Ok(BlendshapeSpec {
                        au_id,
                        side: r.side,
                        blendshape: resolve(base, r.blendshape),
                        active_muscles: r.active_muscles,
                        passive_muscles: r.passive_muscles,
                    }),
                    None => Err("AU id is not an integer".to_string()),
                });
            match parsed {
                Ok(spec) => report.value.action_units.push(spec),
                Err(e) => report.skip(Error::MalformedDocument(format!(
                    "manifest entry {}: {}",
                    position, e
                ))),
            }
        }
        Ok(report)
    }

    /// Read a manifest file, resolving paths against its directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LoadReport<Self>> {
        let path = path.as_ref();
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&read_document(path)?, base)
    }

    pub fn load_neutral(&self) -> Result<Vec<Vec3>> {
        obj::load_vertices(&self.neutral)
    }

    /// Load every blendshape mesh; unreadable meshes are skipped.
    pub fn load_jobs(&self) -> LoadReport<Vec<BlendshapeJob>> {
        let mut report = LoadReport::new(Vec::with_capacity(self.action_units.len()));
        for spec in &self.action_units {
            match obj::load_vertices(&spec.blendshape) {
                Ok(vertices) => report.value.push(BlendshapeJob {
                    au_id: spec.au_id,
                    side: spec.side,
                    vertices,
                    active_muscles: spec.active_muscles.clone(),
                    passive_muscles: spec.passive_muscles.clone(),
                }),
                Err(e) => report.skip(e),
            }
        }
        report
    }
}
