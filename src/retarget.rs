//! Per-frame retargeting: landmarks in, deformed mesh out.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::accumulator::{Accumulation, MeshAccess, TemporalAccumulator};
use crate::activation::{
    compute_distance_features, evaluate_activation, ActivationResult, DistanceFeature,
    DistancePolicy, Thresholds,
};
use crate::config::RetargetConfig;
use crate::delta::AuDeltaTable;
use crate::error::{Error, Result};
use crate::landmarks::{
    select_landmarks, subset_landmarks, LandmarksActionUnitMap, SUBSET_LANDMARK_COUNT,
};
use crate::loaders;
use crate::muscles::MuscleIndexMap;
use crate::types::Vec3;

/// Drives one character mesh from a stream of landmark frames.
///
/// Holds the tables and maps loaded once per character, the neutral
/// baseline features, and the accumulation state of the mesh. Frames must
/// be fed in order; each call completes its write-back before returning.
pub struct Retargeter<M: MeshAccess> {
    mesh: M,
    table: AuDeltaTable,
    muscles: MuscleIndexMap,
    landmark_map: LandmarksActionUnitMap,
    mesh_index: Vec<usize>,
    pixel_index: Vec<usize>,
    thresholds: Thresholds,
    policy: DistancePolicy,
    neutral: Option<Vec<DistanceFeature>>,
    accumulator: TemporalAccumulator,
}

impl<M: MeshAccess> Retargeter<M> {
    pub fn builder() -> RetargeterBuilder<M> {
        RetargeterBuilder::new()
    }

    /// Reduced landmark subset of a full frame.
    ///
    /// Without a pixel index the frame is taken to be the subset already.
    /// A frame too short for the pixel index is rejected with
    /// [`Error::IndexOutOfRange`].
    pub fn subset(&self, frame: &[Vec3]) -> Result<Vec<Vec3>> {
        if self.pixel_index.is_empty() {
            Ok(frame.to_vec())
        } else {
            subset_landmarks(frame, &self.pixel_index)
        }
    }

    pub fn features(&self, frame: &[Vec3]) -> Result<Vec<DistanceFeature>> {
        let subset = self.subset(frame)?;
        Ok(compute_distance_features(
            &subset,
            &self.landmark_map,
            self.policy,
        ))
    }

    /// Record the neutral baseline all later frames are compared against.
    ///
    /// On error the previous baseline is kept.
    pub fn set_neutral_frame(&mut self, frame: &[Vec3]) -> Result<()> {
        let features = self.features(frame)?;
        info!(features = features.len(), "neutral baseline set");
        self.neutral = Some(features);
        Ok(())
    }

    pub fn neutral_features(&self) -> Option<&[DistanceFeature]> {
        self.neutral.as_deref()
    }

    /// Winning AU of `frame` against the neutral baseline.
    pub fn evaluate_frame(&self, frame: &[Vec3]) -> Result<Option<ActivationResult>> {
        let neutral = self
            .neutral
            .as_deref()
            .ok_or(Error::MissingInput("neutral frame"))?;
        evaluate_activation(neutral, &self.features(frame)?, &self.thresholds)
    }

    /// Deform the mesh for `activation`. See [`TemporalAccumulator::apply`].
    pub fn apply(&mut self, activation: Option<&ActivationResult>) -> Result<bool> {
        self.accumulator.apply(&mut self.mesh, &self.table, activation)
    }

    /// Like [`Retargeter::evaluate_frame`], but a frame that is too short
    /// for the landmark subset, or whose features do not line up with the
    /// baseline, counts as no activation.
    pub fn detect(&self, frame: &[Vec3]) -> Result<Option<ActivationResult>> {
        match self.evaluate_frame(frame) {
            Ok(activation) => Ok(activation),
            Err(e) if e.is_unusable_frame() => {
                warn!("skipping frame: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Detect and apply one frame.
    ///
    /// Unusable frames leave the mesh alone. Write-back failures are
    /// returned; the accumulation state is unchanged in that case.
    pub fn process_frame(&mut self, frame: &[Vec3]) -> Result<Option<ActivationResult>> {
        let activation = self.detect(frame)?;
        if activation.is_none() {
            debug!("no AU active in frame");
        }
        self.apply(activation.as_ref())?;
        Ok(activation)
    }

    /// Mesh-space landmark vertices, selected by the mesh landmark index.
    pub fn mesh_landmarks(&self) -> Result<Vec<Vec3>> {
        Ok(select_landmarks(&self.mesh.read_vertices()?, &self.mesh_index))
    }

    /// Current positions of each muscle's vertices.
    pub fn muscle_vertices(&self) -> Result<BTreeMap<u32, Vec<Vec3>>> {
        Ok(self.muscles.gather(&self.mesh.read_vertices()?))
    }

    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn policy(&self) -> DistancePolicy {
        self.policy
    }

    pub fn table(&self) -> &AuDeltaTable {
        &self.table
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn into_mesh(self) -> M {
        self.mesh
    }

    pub fn accumulation(&self) -> &Accumulation {
        self.accumulator.state()
    }

    /// Forget the accumulated displacement (the mesh itself is untouched).
    pub fn reset(&mut self) {
        self.accumulator.reset();
    }
}

/// Builder for a [`Retargeter`].
pub struct RetargeterBuilder<M> {
    mesh: Option<M>,
    table: Option<AuDeltaTable>,
    muscles: MuscleIndexMap,
    landmark_map: Option<LandmarksActionUnitMap>,
    mesh_index: Vec<usize>,
    pixel_index: Vec<usize>,
    thresholds: Thresholds,
    policy: DistancePolicy,
    state: Option<Accumulation>,
}

impl<M: MeshAccess> RetargeterBuilder<M> {
    pub fn new() -> Self {
        Self {
            mesh: None,
            table: None,
            muscles: MuscleIndexMap::new(),
            landmark_map: None,
            mesh_index: Vec::new(),
            pixel_index: Vec::new(),
            thresholds: Thresholds::default(),
            policy: DistancePolicy::default(),
            state: None,
        }
    }

    /// Load every table and index named by `config`.
    pub fn from_config(config: &RetargetConfig) -> Result<Self> {
        let table = AuDeltaTable::load(&config.delta_table)?;
        let muscles = loaders::load_muscle_index_map(&config.muscle_index_map).into_value();
        let landmark_map = loaders::load_action_unit_mappings(&config.landmarks_action_units)?;
        let mesh_index = loaders::load_landmark_indices(&config.landmarks_mesh_index)?;
        let pixel_index = loaders::load_landmark_indices(&config.landmarks_pixel_index)?;

        Ok(Self::new()
            .delta_table(table)
            .muscle_index_map(muscles)
            .landmark_map(landmark_map.into_value())
            .mesh_landmark_indices(mesh_index)
            .pixel_landmark_indices(pixel_index)
            .thresholds(config.thresholds)
            .distance_policy(config.distance_policy))
    }

    /// The mesh to deform.
    pub fn mesh(mut self, mesh: M) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn delta_table(mut self, table: AuDeltaTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn muscle_index_map(mut self, muscles: MuscleIndexMap) -> Self {
        self.muscles = muscles;
        self
    }

    pub fn landmark_map(mut self, map: LandmarksActionUnitMap) -> Self {
        self.landmark_map = Some(map);
        self
    }

    pub fn mesh_landmark_indices(mut self, indices: Vec<usize>) -> Self {
        self.mesh_index = indices;
        self
    }

    /// Indices of the reduced subset within a full landmark frame.
    pub fn pixel_landmark_indices(mut self, indices: Vec<usize>) -> Self {
        self.pixel_index = indices;
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn distance_policy(mut self, policy: DistancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resume from a saved accumulation.
    pub fn state(mut self, state: Accumulation) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Retargeter<M>> {
        let mesh = self.mesh.ok_or(Error::MissingInput("mesh"))?;
        let table = self.table.ok_or(Error::MissingInput("AU delta table"))?;
        let landmark_map = self
            .landmark_map
            .ok_or(Error::MissingInput("AU landmark mappings"))?;
        self.thresholds.validate()?;

        if !self.pixel_index.is_empty() && self.pixel_index.len() != SUBSET_LANDMARK_COUNT {
            debug!(
                count = self.pixel_index.len(),
                expected = SUBSET_LANDMARK_COUNT,
                "pixel landmark index differs from the standard subset"
            );
        }

        let mut muscles = self.muscles;
        muscles.retain_in_bounds(mesh.vertex_count());

        Ok(Retargeter {
            mesh,
            table,
            muscles,
            landmark_map,
            mesh_index: self.mesh_index,
            pixel_index: self.pixel_index,
            thresholds: self.thresholds,
            policy: self.policy,
            neutral: None,
            accumulator: self
                .state
                .map(TemporalAccumulator::from_state)
                .unwrap_or_default(),
        })
    }
}

impl<M: MeshAccess> Default for RetargeterBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::VertexBuffer;
    use crate::delta::{ActionUnitDelta, MuscleDelta, VertexDelta};
    use crate::landmarks::LandmarkActionUnitEntry;
    use crate::side::Side;

    /// AU 12 moves vertex 1 up by one unit.
    fn table() -> AuDeltaTable {
        let mut table = AuDeltaTable::new();
        table.insert(ActionUnitDelta {
            au_id: 12,
            side: Side::Center,
            active_muscles: vec![MuscleDelta {
                muscle_id: 1,
                deltas: vec![VertexDelta {
                    vertex_index: 1,
                    position: Vec3::zero(),
                    delta: Vec3::new(0.0, 1.0, 0.0),
                }],
            }],
            passive_muscles: vec![],
        });
        table
    }

    fn landmark_map() -> LandmarksActionUnitMap {
        [LandmarkActionUnitEntry {
            au_id: 12,
            side: Side::Center,
            landmark_indices: vec![0, 1],
        }]
        .into_iter()
        .collect()
    }

    /// Full frame whose subset (indices 3, 1) spans `width` along x.
    fn frame(width: f32) -> Vec<Vec3> {
        vec![
            Vec3::zero(),
            Vec3::new(width, 0.0, 0.0),
            Vec3::new(9.0, 9.0, 9.0),
            Vec3::zero(),
        ]
    }

    fn retargeter() -> Retargeter<VertexBuffer> {
        Retargeter::builder()
            .mesh(VertexBuffer::new(vec![Vec3::zero(); 3]))
            .delta_table(table())
            .muscle_index_map([(1, vec![1, 2, 40])].into_iter().collect())
            .landmark_map(landmark_map())
            .mesh_landmark_indices(vec![2, 0, 99])
            .pixel_landmark_indices(vec![3, 1])
            .thresholds(Thresholds::new(0.1, 0.5).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_inputs() {
        let err = RetargeterBuilder::<VertexBuffer>::new()
            .delta_table(table())
            .landmark_map(landmark_map())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingInput("mesh")));

        let err = Retargeter::builder()
            .mesh(VertexBuffer::new(vec![]))
            .landmark_map(landmark_map())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingInput(_)));
    }

    #[test]
    fn evaluate_needs_neutral() {
        let r = retargeter();
        let err = r.evaluate_frame(&frame(1.0)).unwrap_err();
        assert!(matches!(err, Error::MissingInput("neutral frame")));
    }

    #[test]
    fn frames_drive_the_mesh() {
        let mut r = retargeter();
        r.set_neutral_frame(&frame(1.0)).unwrap();

        let activation = r.process_frame(&frame(1.3)).unwrap().unwrap();
        assert_eq!(activation.au_id, 12);
        assert!((activation.intensity - 0.5).abs() < 1e-5);
        assert!((r.mesh().vertices()[1].y - 0.5).abs() < 1e-5);

        // Held expression: no further movement.
        r.process_frame(&frame(1.3)).unwrap();
        assert!((r.mesh().vertices()[1].y - 0.5).abs() < 1e-5);

        // Back to neutral: nothing active, mesh stays.
        assert_eq!(r.process_frame(&frame(1.0)).unwrap(), None);
        assert!((r.mesh().vertices()[1].y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn short_frame_is_no_activation() {
        let mut r = retargeter();
        r.set_neutral_frame(&frame(1.0)).unwrap();
        // Subset index 3 is missing from the frame.
        let short = &frame(2.0)[..2];
        assert!(matches!(
            r.subset(short),
            Err(Error::IndexOutOfRange { index: 3, len: 2 })
        ));
        assert_eq!(r.process_frame(short).unwrap(), None);
        assert_eq!(r.mesh().vertices(), &[Vec3::zero(); 3]);
    }

    #[test]
    fn truncated_frame_does_not_shift_landmarks() {
        // Subset [4, 0, 1, 2]; AU 12 reads subset points 1 and 2, which are
        // frame points 0 and 1.
        let points = |width: f32| {
            vec![
                Vec3::zero(),
                Vec3::new(width, 0.0, 0.0),
                Vec3::new(4.0, 0.0, 0.0),
                Vec3::new(5.0, 0.0, 0.0),
                Vec3::new(9.0, 0.0, 0.0),
            ]
        };
        let mut r = Retargeter::builder()
            .mesh(VertexBuffer::new(vec![Vec3::zero(); 3]))
            .delta_table(table())
            .landmark_map(
                [LandmarkActionUnitEntry {
                    au_id: 12,
                    side: Side::Center,
                    landmark_indices: vec![1, 2],
                }]
                .into_iter()
                .collect(),
            )
            .pixel_landmark_indices(vec![4, 0, 1, 2])
            .thresholds(Thresholds::new(0.1, 0.5).unwrap())
            .build()
            .unwrap();
        r.set_neutral_frame(&points(1.0)).unwrap();

        // Same face with the last point dropped: AU 12 landmarks unchanged.
        let truncated = &points(1.0)[..4];
        assert_eq!(r.process_frame(truncated).unwrap(), None);
        assert_eq!(r.mesh().vertices(), &[Vec3::zero(); 3]);
        assert!(r.accumulation().is_empty());

        // A truncated neutral frame leaves the baseline in place.
        assert!(r.set_neutral_frame(truncated).is_err());
        assert_eq!(r.neutral_features().unwrap()[0].distance, 1.0);
    }

    #[test]
    fn mismatched_features_detect_nothing() {
        let mut r = Retargeter::builder()
            .mesh(VertexBuffer::new(vec![Vec3::zero(); 3]))
            .delta_table(table())
            .landmark_map(landmark_map())
            .build()
            .unwrap();
        r.set_neutral_frame(&[Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)])
            .unwrap();

        // One point: the AU 12 pair is out of range and its feature drops out.
        let lone = [Vec3::new(3.0, 0.0, 0.0)];
        assert!(r.evaluate_frame(&lone).unwrap_err().is_feature_set_mismatch());
        assert_eq!(r.detect(&lone).unwrap(), None);

        let wide = [Vec3::zero(), Vec3::new(2.0, 0.0, 0.0)];
        assert_eq!(r.detect(&wide).unwrap().unwrap().au_id, 12);
    }

    #[test]
    fn mesh_landmarks_and_muscles() {
        let r = retargeter();
        assert_eq!(r.mesh_landmarks().unwrap().len(), 2);

        let muscles = r.muscle_vertices().unwrap();
        assert_eq!(muscles[&1].len(), 2);
    }

    #[test]
    fn thresholds_are_validated() {
        let mut r = retargeter();
        assert!(r.set_thresholds(Thresholds { min: 0.5, max: 0.5 }).is_err());
        assert_eq!(r.thresholds(), Thresholds { min: 0.1, max: 0.5 });
    }
}
