//! Frame-to-frame mesh deformation driven by the winning AU.
//!
//! Each frame sums the winning AU's vertex deltas into a fresh accumulation
//! buffer and moves the mesh only by the difference from the previous
//! frame's buffer, scaled by intensity. A held activation therefore stops
//! moving the mesh after its first frame instead of compounding.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activation::ActivationResult;
use crate::delta::AuDeltaTable;
use crate::error::{Error, Result};
use crate::types::Vec3;

/// Meshes above this vertex count are deformed on the rayon pool.
const PARALLEL_VERTEX_THRESHOLD: usize = 1000;

/// Per-vertex running displacement with one offset per mesh vertex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulation {
    offsets: Vec<Vec3>,
}

impl Accumulation {
    pub fn zeros(vertex_count: usize) -> Self {
        Self {
            offsets: vec![Vec3::zero(); vertex_count],
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[Vec3] {
        &self.offsets
    }

    /// Reset to zeros when sized for a different mesh. Returns true if reset.
    pub fn fit(&mut self, vertex_count: usize) -> bool {
        if self.offsets.len() == vertex_count {
            return false;
        }
        warn!(
            stale = self.offsets.len(),
            vertex_count, "accumulation buffer sized for another mesh, reinitializing"
        );
        *self = Self::zeros(vertex_count);
        true
    }
}

/// Read/write access to the vertex positions of a deformable mesh.
pub trait MeshAccess {
    fn vertex_count(&self) -> usize;

    fn read_vertices(&self) -> Result<Vec<Vec3>>;

    /// Replace every vertex position. Implementations must either commit
    /// the full buffer or leave the mesh unchanged and return an error.
    fn write_vertices(&mut self, vertices: &[Vec3]) -> Result<()>;
}

/// In-memory mesh: a plain vertex buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexBuffer {
    vertices: Vec<Vec3>,
}

impl VertexBuffer {
    pub fn new(vertices: Vec<Vec3>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn into_vertices(self) -> Vec<Vec3> {
        self.vertices
    }
}

impl MeshAccess for VertexBuffer {
    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn read_vertices(&self) -> Result<Vec<Vec3>> {
        Ok(self.vertices.clone())
    }

    fn write_vertices(&mut self, vertices: &[Vec3]) -> Result<()> {
        if vertices.len() != self.vertices.len() {
            return Err(Error::WriteBackFailed(format!(
                "buffer has {} vertices, got {}",
                self.vertices.len(),
                vertices.len()
            )));
        }
        self.vertices.copy_from_slice(vertices);
        Ok(())
    }
}

/// Sum of every delta (active and passive, all sides) of `au_id`.
pub fn accumulate_action_unit(table: &AuDeltaTable, au_id: u32, vertex_count: usize) -> Accumulation {
    let mut accumulation = Accumulation::zeros(vertex_count);
    for au in table.get(au_id) {
        for muscle in au.muscles() {
            for vd in &muscle.deltas {
                match accumulation.offsets.get_mut(vd.vertex_index) {
                    Some(offset) => *offset += vd.delta,
                    None => warn!(
                        au_id,
                        muscle_id = muscle.muscle_id,
                        "{}",
                        Error::IndexOutOfRange {
                            index: vd.vertex_index,
                            len: vertex_count
                        }
                    ),
                }
            }
        }
    }
    accumulation
}

/// New vertex positions and the accumulation they correspond to.
#[derive(Debug, Clone, PartialEq)]
pub struct Deformation {
    pub vertices: Vec<Vec3>,
    pub accumulation: Accumulation,
}

/// Pure frame step: `vertices[i] + (current[i] - previous[i]) * intensity`.
///
/// Without an activation the vertices and `previous` are returned
/// unchanged. A `previous` buffer of the wrong length is treated as zeros.
pub fn deform(
    vertices: &[Vec3],
    table: &AuDeltaTable,
    previous: &Accumulation,
    activation: Option<&ActivationResult>,
) -> Deformation {
    let Some(activation) = activation else {
        return Deformation {
            vertices: vertices.to_vec(),
            accumulation: previous.clone(),
        };
    };

    let vertex_count = vertices.len();
    let mut previous = previous.clone();
    previous.fit(vertex_count);

    let current = accumulate_action_unit(table, activation.au_id, vertex_count);
    let intensity = activation.intensity;
    let step = |((v, c), p): ((&Vec3, &Vec3), &Vec3)| *v + (*c - *p) * intensity;

    let deformed: Vec<Vec3> = if vertex_count > PARALLEL_VERTEX_THRESHOLD {
        vertices
            .par_iter()
            .zip(current.offsets.par_iter())
            .zip(previous.offsets.par_iter())
            .map(step)
            .collect()
    } else {
        vertices
            .iter()
            .zip(current.offsets.iter())
            .zip(previous.offsets.iter())
            .map(step)
            .collect()
    };

    Deformation {
        vertices: deformed,
        accumulation: current,
    }
}

/// Owner of the accumulation state carried between frames.
///
/// The state advances only when the mesh accepted the new positions, so the
/// stored accumulation always describes what the mesh actually shows.
#[derive(Debug, Clone, Default)]
pub struct TemporalAccumulator {
    previous: Accumulation,
}

impl TemporalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously saved state.
    pub fn from_state(previous: Accumulation) -> Self {
        Self { previous }
    }

    pub fn state(&self) -> &Accumulation {
        &self.previous
    }

    pub fn into_state(self) -> Accumulation {
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = Accumulation::default();
    }

    /// Deform `mesh` for one frame.
    ///
    /// Returns `Ok(false)` without touching the mesh when there is no
    /// activation. A rejected write fails with [`Error::WriteBackFailed`]
    /// and keeps the previous state.
    pub fn apply<M: MeshAccess + ?Sized>(
        &mut self,
        mesh: &mut M,
        table: &AuDeltaTable,
        activation: Option<&ActivationResult>,
    ) -> Result<bool> {
        let Some(activation) = activation else {
            debug!("no activation, mesh unchanged");
            return Ok(false);
        };

        let vertices = mesh.read_vertices()?;
        let Deformation {
            vertices,
            accumulation,
        } = deform(&vertices, table, &self.previous, Some(activation));

        mesh.write_vertices(&vertices).map_err(|e| match e {
            Error::WriteBackFailed(_) => e,
            other => Error::WriteBackFailed(other.to_string()),
        })?;

        self.previous = accumulation;
        debug!(
            au_id = activation.au_id,
            intensity = activation.intensity,
            "mesh deformed"
        );
        Ok(true)
    }
}
