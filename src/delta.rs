//! Muscle-level delta transfer between a neutral mesh and AU blendshapes.
//!
//! A blendshape is the character's face fully expressing one Action Unit.
//! Subtracting the neutral mesh from it, restricted to the vertices of each
//! muscle region, yields the per-vertex displacement the retargeter replays
//! at runtime. The diff runs once per character; the resulting
//! [`AuDeltaTable`] is persisted and reloaded afterwards.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::muscles::MuscleIndexMap;
use crate::side::Side;
use crate::types::Vec3;

/// Displacement of one vertex when its muscle fully activates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexDelta {
    pub vertex_index: usize,
    /// Neutral-mesh position of the vertex.
    pub position: Vec3,
    pub delta: Vec3,
}

/// All vertex deltas of a single muscle region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuscleDelta {
    pub muscle_id: u32,
    pub deltas: Vec<VertexDelta>,
}

/// Deformation data for one side variant of an Action Unit.
///
/// Active muscles produce the expression directly; passive muscles are
/// displaced as a side effect of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionUnitDelta {
    pub au_id: u32,
    pub side: Side,
    pub active_muscles: Vec<MuscleDelta>,
    pub passive_muscles: Vec<MuscleDelta>,
}

impl ActionUnitDelta {
    /// Active then passive muscles.
    pub fn muscles(&self) -> impl Iterator<Item = &MuscleDelta> {
        self.active_muscles.iter().chain(self.passive_muscles.iter())
    }

    /// Total number of vertex deltas across both muscle groups.
    pub fn vertex_delta_count(&self) -> usize {
        self.muscles().map(|m| m.deltas.len()).sum()
    }
}

/// AU id → every side variant of that AU, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "TableDocument", from = "TableDocument")]
pub struct AuDeltaTable {
    entries: BTreeMap<u32, Vec<ActionUnitDelta>>,
}

/// Flat wire form of [`AuDeltaTable`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDocument {
    action_units: Vec<ActionUnitDelta>,
}

impl From<AuDeltaTable> for TableDocument {
    fn from(table: AuDeltaTable) -> Self {
        Self {
            action_units: table.entries.into_values().flatten().collect(),
        }
    }
}

impl From<TableDocument> for AuDeltaTable {
    fn from(doc: TableDocument) -> Self {
        let mut table = AuDeltaTable::new();
        for au in doc.action_units {
            table.insert(au);
        }
        table
    }
}

/// On-disk encoding of a delta table, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Json,
    Binary,
}

impl TableFormat {
    /// Format and bzip2 flag for a path: `.json`, `.bin`, optionally
    /// followed by `.bz2`. Unknown extensions are treated as JSON.
    pub fn from_path(path: &Path) -> (TableFormat, bool) {
        let compressed = path.extension().is_some_and(|ext| ext == "bz2");
        let inner = if compressed {
            path.file_stem().map(Path::new).and_then(Path::extension)
        } else {
            path.extension()
        };
        let format = match inner.and_then(|ext| ext.to_str()) {
            Some("bin") => TableFormat::Binary,
            _ => TableFormat::Json,
        };
        (format, compressed)
    }
}

impl AuDeltaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a side variant under its AU id.
    pub fn insert(&mut self, delta: ActionUnitDelta) {
        self.entries.entry(delta.au_id).or_default().push(delta);
    }

    /// Side variants for an AU, empty when the AU is unknown.
    pub fn get(&self, au_id: u32) -> &[ActionUnitDelta] {
        self.entries.get(&au_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn au_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionUnitDelta> {
        self.entries.values().flatten()
    }

    /// Number of distinct AU ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of side variants across all AUs.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn to_document(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(doc: &serde_json::Value) -> Result<Self> {
        Ok(AuDeltaTable::deserialize(doc)?)
    }

    /// Load a table, decoding by extension (see [`TableFormat::from_path`]).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (format, compressed) = TableFormat::from_path(path);
        let reader = BufReader::new(File::open(path)?);

        let table = if compressed {
            Self::read_from(BzDecoder::new(reader), format)?
        } else {
            Self::read_from(reader, format)?
        };
        info!(
            path = %path.display(),
            action_units = table.len(),
            entries = table.entry_count(),
            "loaded AU delta table"
        );
        Ok(table)
    }

    /// Save the table, encoding by extension (see [`TableFormat::from_path`]).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (format, compressed) = TableFormat::from_path(path);
        let mut writer = BufWriter::new(File::create(path)?);

        if compressed {
            let mut encoder = BzEncoder::new(writer, Compression::best());
            self.write_to(&mut encoder, format)?;
            encoder.finish()?.flush()?;
        } else {
            self.write_to(&mut writer, format)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R, format: TableFormat) -> Result<Self> {
        Ok(match format {
            TableFormat::Json => serde_json::from_reader(reader)?,
            TableFormat::Binary => bincode::deserialize_from(reader)?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: W, format: TableFormat) -> Result<()> {
        match format {
            TableFormat::Json => serde_json::to_writer_pretty(writer, self)?,
            TableFormat::Binary => bincode::serialize_into(writer, self)?,
        }
        Ok(())
    }
}

fn check_topology(neutral: &[Vec3], blendshape: &[Vec3]) -> Result<()> {
    if neutral.len() != blendshape.len() {
        return Err(Error::TopologyMismatch {
            neutral: neutral.len(),
            blendshape: blendshape.len(),
        });
    }
    Ok(())
}

/// Per-vertex `blendshape - neutral` for every vertex bound to `muscle_id`.
///
/// Both meshes must share vertex count and ordering. Indices past the end
/// of the meshes are skipped with a warning; a muscle missing from the map
/// yields an empty delta list.
pub fn compute_muscle_deltas(
    neutral: &[Vec3],
    blendshape: &[Vec3],
    muscle_id: u32,
    muscle_map: &MuscleIndexMap,
) -> Result<MuscleDelta> {
    check_topology(neutral, blendshape)?;

    let Some(indices) = muscle_map.get(muscle_id) else {
        warn!(muscle_id, "muscle not present in index map");
        return Ok(MuscleDelta {
            muscle_id,
            deltas: Vec::new(),
        });
    };

    let mut deltas = Vec::with_capacity(indices.len());
    for &vertex_index in indices {
        let (Some(&position), Some(&target)) =
            (neutral.get(vertex_index), blendshape.get(vertex_index))
        else {
            warn!(
                muscle_id,
                "{}",
                Error::IndexOutOfRange {
                    index: vertex_index,
                    len: neutral.len()
                }
            );
            continue;
        };
        deltas.push(VertexDelta {
            vertex_index,
            position,
            delta: target - position,
        });
    }

    Ok(MuscleDelta { muscle_id, deltas })
}

/// Delta data for one AU side variant from its muscle lists.
pub fn build_action_unit_delta(
    au_id: u32,
    side: Side,
    active_muscle_ids: &[u32],
    passive_muscle_ids: &[u32],
    neutral: &[Vec3],
    blendshape: &[Vec3],
    muscle_map: &MuscleIndexMap,
) -> Result<ActionUnitDelta> {
    check_topology(neutral, blendshape)?;

    let collect = |ids: &[u32]| -> Result<Vec<MuscleDelta>> {
        ids.iter()
            .map(|&id| compute_muscle_deltas(neutral, blendshape, id, muscle_map))
            .collect()
    };

    Ok(ActionUnitDelta {
        au_id,
        side,
        active_muscles: collect(active_muscle_ids)?,
        passive_muscles: collect(passive_muscle_ids)?,
    })
}

/// One blendshape to diff against the neutral mesh.
#[derive(Debug, Clone)]
pub struct BlendshapeJob {
    pub au_id: u32,
    pub side: Side,
    pub vertices: Vec<Vec3>,
    pub active_muscles: Vec<u32>,
    pub passive_muscles: Vec<u32>,
}

/// Build the full table. Jobs are diffed in parallel; a job whose mesh
/// does not match the neutral topology is dropped with a warning and the
/// rest of the table is still produced.
pub fn precompute_table(
    neutral: &[Vec3],
    jobs: &[BlendshapeJob],
    muscle_map: &MuscleIndexMap,
) -> AuDeltaTable {
    let results: Vec<_> = jobs
        .par_iter()
        .map(|job| {
            build_action_unit_delta(
                job.au_id,
                job.side,
                &job.active_muscles,
                &job.passive_muscles,
                neutral,
                &job.vertices,
                muscle_map,
            )
        })
        .collect();

    let mut table = AuDeltaTable::new();
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(delta) => table.insert(delta),
            Err(e) => warn!(au_id = job.au_id, side = %job.side, "skipping AU: {}", e),
        }
    }

    info!(
        action_units = table.len(),
        entries = table.entry_count(),
        skipped = jobs.len() - table.entry_count(),
        "precomputed AU delta table"
    );
    table
}
