//! Landmark distance features and single-winner AU activation.
//!
//! Every AU side variant names one or more landmark pairs on the reduced
//! subset. The distance between a pair grows or shrinks as the muscle
//! fires, so comparing the current frame against a neutral baseline tells
//! which AU is expressing and how strongly.
//!
//! ## Distance policy
//!
//! An entry may list several pairs. [`DistancePolicy::LastPair`] keeps the
//! distance of the last valid pair in iteration order; [`DistancePolicy::Mean`]
//! averages all valid pairs. The same policy must be used for the neutral
//! and the current pass, otherwise the deltas are meaningless.
//!
//! ## Winner selection
//!
//! A feature is a candidate when `current - neutral > thresholds.min`. The
//! candidate with the largest delta wins; equal deltas go to the lowest AU
//! id, then to the earliest position. This ordering is total, so the result
//! does not depend on evaluation order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::landmarks::{LandmarkActionUnitEntry, LandmarksActionUnitMap};
use crate::side::Side;
use crate::types::Vec3;

/// How an entry with several landmark pairs reduces to one distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistancePolicy {
    #[default]
    LastPair,
    Mean,
}

/// Distance feature for one AU side variant, before any activation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceFeature {
    pub au_id: u32,
    pub side: Side,
    pub landmark_indices: Vec<usize>,
    pub distance: f32,
}

/// Activation band. Deltas at or below `min` never activate; `max` is the
/// delta, measured from `min`, mapped to full intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min: f32,
    pub max: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { min: 0.4, max: 0.6 }
    }
}

impl Thresholds {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        let thresholds = Self { min, max };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Requires `max > min` (NaN bounds fail).
    pub fn validate(&self) -> Result<()> {
        if self.max > self.min {
            Ok(())
        } else {
            Err(Error::InvalidThresholdRange {
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Outcome of one activation evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub au_id: u32,
    pub side: Side,
    pub landmark_indices: Vec<usize>,
    pub base_distance: f32,
    pub current_distance: f32,
    pub activation_threshold: f32,
    pub is_active: bool,
    /// Normalized strength in `[0, 1]`.
    pub intensity: f32,
}

impl ActivationResult {
    pub fn delta(&self) -> f32 {
        self.current_distance - self.base_distance
    }
}

/// Distance for one entry, or `None` when the entry yields no feature.
///
/// Entries with fewer than two indices, an odd index count, or no in-range
/// pair produce nothing.
pub fn entry_distance(
    subset: &[Vec3],
    entry: &LandmarkActionUnitEntry,
    policy: DistancePolicy,
) -> Option<f32> {
    let indices = &entry.landmark_indices;
    if indices.len() < 2 {
        return None;
    }
    if indices.len() % 2 != 0 {
        warn!(
            au_id = entry.au_id,
            side = %entry.side,
            count = indices.len(),
            "landmark entry has an odd number of indices, skipping"
        );
        return None;
    }

    let mut last = None;
    let mut sum = 0.0f32;
    let mut valid = 0usize;

    for pair in indices.chunks_exact(2) {
        let (a, b) = (pair[0], pair[1]);
        let (Some(pa), Some(pb)) = (subset.get(a), subset.get(b)) else {
            warn!(
                au_id = entry.au_id,
                side = %entry.side,
                "{}",
                Error::IndexOutOfRange {
                    index: a.max(b),
                    len: subset.len()
                }
            );
            continue;
        };

        let distance = pa.distance(pb);
        debug!(au_id = entry.au_id, a, b, distance, "landmark pair distance");
        last = Some(distance);
        sum += distance;
        valid += 1;
    }

    let distance = match policy {
        DistancePolicy::LastPair => last,
        DistancePolicy::Mean => (valid > 0).then(|| sum / valid as f32),
    };
    if distance.is_none() {
        warn!(
            au_id = entry.au_id,
            side = %entry.side,
            "landmark entry has no in-range pair, skipping"
        );
    }
    distance
}

/// Distance features for every entry of `map`, in map order.
///
/// Entries are independent and evaluated on the rayon pool; output order
/// matches [`LandmarksActionUnitMap::iter`].
pub fn compute_distance_features(
    subset: &[Vec3],
    map: &LandmarksActionUnitMap,
    policy: DistancePolicy,
) -> Vec<DistanceFeature> {
    let entries: Vec<_> = map.iter().collect();
    entries
        .par_iter()
        .filter_map(|entry| {
            entry_distance(subset, entry, policy).map(|distance| DistanceFeature {
                au_id: entry.au_id,
                side: entry.side,
                landmark_indices: entry.landmark_indices.clone(),
                distance,
            })
        })
        .collect()
}

/// `clamp((current - base - min) / (max - min), 0, 1)`.
pub fn intensity(base_distance: f32, current_distance: f32, thresholds: &Thresholds) -> f32 {
    let delta = current_distance - base_distance;
    ((delta - thresholds.min) / (thresholds.max - thresholds.min)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: usize,
    au_id: u32,
    delta: f32,
}

impl Candidate {
    fn outranks(&self, other: &Candidate) -> bool {
        self.delta > other.delta
            || (self.delta == other.delta
                && (self.au_id, self.position) < (other.au_id, other.position))
    }
}

/// Select the single active AU, if any.
///
/// `neutral` and `current` must come from the same map and policy: equal
/// length and the same AU/side at every position.
pub fn evaluate_activation(
    neutral: &[DistanceFeature],
    current: &[DistanceFeature],
    thresholds: &Thresholds,
) -> Result<Option<ActivationResult>> {
    thresholds.validate()?;

    if neutral.len() != current.len() {
        return Err(Error::FeatureSetMismatch {
            neutral: neutral.len(),
            current: current.len(),
        });
    }
    if let Some(position) = neutral
        .iter()
        .zip(current)
        .position(|(n, c)| n.au_id != c.au_id || n.side != c.side)
    {
        return Err(Error::FeatureOrderMismatch { position });
    }

    let winner = neutral
        .iter()
        .zip(current)
        .enumerate()
        .filter_map(|(position, (n, c))| {
            let delta = c.distance - n.distance;
            (delta > thresholds.min).then(|| {
                debug!(
                    au_id = c.au_id,
                    side = %c.side,
                    delta,
                    min = thresholds.min,
                    "AU exceeds activation threshold"
                );
                Candidate {
                    position,
                    au_id: c.au_id,
                    delta,
                }
            })
        })
        .reduce(|best, candidate| {
            if candidate.outranks(&best) {
                candidate
            } else {
                best
            }
        });

    let Some(winner) = winner else {
        return Ok(None);
    };

    let n = &neutral[winner.position];
    let c = &current[winner.position];
    let result = ActivationResult {
        au_id: c.au_id,
        side: c.side,
        landmark_indices: c.landmark_indices.clone(),
        base_distance: n.distance,
        current_distance: c.distance,
        activation_threshold: thresholds.min,
        is_active: true,
        intensity: intensity(n.distance, c.distance, thresholds),
    };
    info!(
        au_id = result.au_id,
        side = %result.side,
        delta = winner.delta,
        intensity = result.intensity,
        "activated AU"
    );
    Ok(Some(result))
}
