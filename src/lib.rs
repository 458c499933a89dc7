//! # facial-retarget
//!
//! Facial performance retargeting from tracked landmarks onto a character's
//! muscle mesh.
//!
//! This crate provides:
//! - **Delta transfer**: per-muscle vertex deltas between a neutral mesh and
//!   each Action Unit (AU) blendshape, persisted as an [`AuDeltaTable`]
//! - **Activation**: landmark-pair distance features compared against a
//!   neutral baseline to pick the single active AU and its intensity
//! - **Temporal deformation**: incremental mesh updates that do not compound
//!   while an expression is held
//!
//! ## Pipeline
//!
//! 1. Offline, once per character: diff every blendshape against the neutral
//!    mesh, muscle by muscle ([`precompute_table`]), and save the table
//! 2. Record the neutral landmark frame of the performer
//! 3. Per captured frame:
//!    - reduce the 478 generated landmarks to the 51-point subset
//!    - measure the distance of each AU's landmark pairs
//!    - select the AU whose distance grew the most past the threshold
//!    - move the mesh by the change in that AU's accumulated deltas
//!
//! ## Quick Start
//!
//! ```rust
//! use facial_retarget::{
//!     ActionUnitDelta, AuDeltaTable, LandmarkActionUnitEntry, MuscleDelta, Retargeter, Side,
//!     Thresholds, Vec3, VertexBuffer, VertexDelta,
//! };
//!
//! // AU 12 lifts vertex 0 by one unit.
//! let mut table = AuDeltaTable::new();
//! table.insert(ActionUnitDelta {
//!     au_id: 12,
//!     side: Side::Center,
//!     active_muscles: vec![MuscleDelta {
//!         muscle_id: 1,
//!         deltas: vec![VertexDelta {
//!             vertex_index: 0,
//!             position: Vec3::zero(),
//!             delta: Vec3::new(0.0, 1.0, 0.0),
//!         }],
//!     }],
//!     passive_muscles: vec![],
//! });
//!
//! // Its diagnostic pair is landmarks 0 and 1 of the subset.
//! let landmarks = [LandmarkActionUnitEntry {
//!     au_id: 12,
//!     side: Side::Center,
//!     landmark_indices: vec![0, 1],
//! }]
//! .into_iter()
//! .collect();
//!
//! let mut retargeter = Retargeter::builder()
//!     .mesh(VertexBuffer::new(vec![Vec3::zero(); 4]))
//!     .delta_table(table)
//!     .landmark_map(landmarks)
//!     .thresholds(Thresholds::new(0.1, 0.5).unwrap())
//!     .build()
//!     .unwrap();
//!
//! retargeter
//!     .set_neutral_frame(&[Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)])
//!     .unwrap();
//! let active = retargeter
//!     .process_frame(&[Vec3::zero(), Vec3::new(1.5, 0.0, 0.0)])
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(active.au_id, 12);
//! assert!(retargeter.mesh().vertices()[0].y > 0.0);
//! ```
//!
//! ## Custom Meshes
//!
//! Implement the [`MeshAccess`] trait to deform meshes owned elsewhere:
//!
//! ```rust
//! use facial_retarget::{MeshAccess, Result, Vec3};
//!
//! struct HostMesh { /* ... */ }
//!
//! impl MeshAccess for HostMesh {
//!     fn vertex_count(&self) -> usize { 0 }
//!     fn read_vertices(&self) -> Result<Vec<Vec3>> {
//!         // Copy positions out of the host
//!         Ok(Vec::new())
//!     }
//!     fn write_vertices(&mut self, vertices: &[Vec3]) -> Result<()> {
//!         // Commit all positions or none
//!         Ok(())
//!     }
//! }
//! ```

pub mod accumulator;
pub mod activation;
mod config;
pub mod delta;
mod error;
pub mod landmarks;
pub mod loaders;
mod muscles;
pub mod obj;
mod retarget;
mod side;
mod types;

pub use accumulator::{Accumulation, Deformation, MeshAccess, TemporalAccumulator, VertexBuffer};
pub use activation::{
    compute_distance_features, evaluate_activation, intensity, ActivationResult, DistanceFeature,
    DistancePolicy, Thresholds,
};
pub use config::RetargetConfig;
pub use delta::{
    build_action_unit_delta, compute_muscle_deltas, precompute_table, ActionUnitDelta,
    AuDeltaTable, BlendshapeJob, MuscleDelta, TableFormat, VertexDelta,
};
pub use error::{Error, Result};
pub use landmarks::{
    select_landmarks, subset_landmarks, LandmarkActionUnitEntry, LandmarksActionUnitMap,
};
pub use loaders::{parse_au_id, BlendshapeManifest, LoadReport};
pub use muscles::MuscleIndexMap;
pub use obj::ObjMesh;
pub use retarget::{Retargeter, RetargeterBuilder};
pub use side::Side;
pub use types::{bounds, Vec3};
