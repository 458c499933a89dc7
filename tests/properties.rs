//! Property-based tests for delta transfer, activation and accumulation.
//!
//! Run with: cargo test --test properties

use facial_retarget::accumulator::{accumulate_action_unit, deform};
use facial_retarget::{
    compute_distance_features, compute_muscle_deltas, evaluate_activation, intensity,
    select_landmarks, subset_landmarks, Accumulation, ActionUnitDelta, ActivationResult, AuDeltaTable,
    DistanceFeature, DistancePolicy, LandmarkActionUnitEntry, LandmarksActionUnitMap,
    MuscleDelta, MuscleIndexMap, Side, TableFormat, Thresholds, Vec3, VertexDelta,
};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_vec3() -> impl Strategy<Value = Vec3> {
    prop::array::uniform3(-10.0f32..10.0).prop_map(Vec3::from)
}

fn arb_side() -> impl Strategy<Value = Side> {
    (0..Side::ALL.len()).prop_map(|i| Side::ALL[i])
}

/// Equal-length neutral and blendshape buffers.
fn arb_mesh_pair() -> impl Strategy<Value = (Vec<Vec3>, Vec<Vec3>)> {
    (1usize..40).prop_flat_map(|n| {
        (
            prop::collection::vec(arb_vec3(), n),
            prop::collection::vec(arb_vec3(), n),
        )
    })
}

fn arb_muscle_delta() -> impl Strategy<Value = MuscleDelta> {
    (
        0u32..64,
        prop::collection::vec((0usize..500, arb_vec3(), arb_vec3()), 0..8),
    )
        .prop_map(|(muscle_id, deltas)| MuscleDelta {
            muscle_id,
            deltas: deltas
                .into_iter()
                .map(|(vertex_index, position, delta)| VertexDelta {
                    vertex_index,
                    position,
                    delta,
                })
                .collect(),
        })
}

fn arb_table() -> impl Strategy<Value = AuDeltaTable> {
    let au = (
        0u32..50,
        arb_side(),
        prop::collection::vec(arb_muscle_delta(), 0..4),
        prop::collection::vec(arb_muscle_delta(), 0..3),
    )
        .prop_map(|(au_id, side, active_muscles, passive_muscles)| ActionUnitDelta {
            au_id,
            side,
            active_muscles,
            passive_muscles,
        });
    prop::collection::vec(au, 1..12).prop_map(|aus| {
        let mut table = AuDeltaTable::new();
        for au in aus {
            table.insert(au);
        }
        table
    })
}

fn arb_features() -> impl Strategy<Value = (Vec<DistanceFeature>, Vec<DistanceFeature>)> {
    prop::collection::vec((0u32..30, arb_side(), 0.0f32..5.0, 0.0f32..5.0), 0..20).prop_map(
        |rows| {
            let make = |au_id, side, distance| DistanceFeature {
                au_id,
                side,
                landmark_indices: vec![0, 1],
                distance,
            };
            let (neutral, current): (Vec<_>, Vec<_>) = rows
                .iter()
                .map(|&(au, side, n, c)| (make(au, side, n), make(au, side, c)))
                .unzip();
            (neutral, current)
        },
    )
}

fn arb_thresholds() -> impl Strategy<Value = Thresholds> {
    (0.0f32..1.0, 0.01f32..1.0).prop_map(|(min, width)| Thresholds {
        min,
        max: min + width,
    })
}

fn activation(au_id: u32, intensity: f32) -> ActivationResult {
    ActivationResult {
        au_id,
        side: Side::Center,
        landmark_indices: vec![],
        base_distance: 0.0,
        current_distance: 0.0,
        activation_threshold: 0.0,
        is_active: true,
        intensity,
    }
}

// =============================================================================
// Delta transfer
// =============================================================================

proptest! {
    #[test]
    fn muscle_deltas_are_exact(
        (neutral, blendshape) in arb_mesh_pair(),
        indices in prop::collection::vec(0usize..60, 0..30),
    ) {
        let map: MuscleIndexMap = [(7, indices.clone())].into_iter().collect();
        let muscle = compute_muscle_deltas(&neutral, &blendshape, 7, &map).unwrap();

        let in_range: Vec<usize> = indices.iter().copied().filter(|&i| i < neutral.len()).collect();
        prop_assert_eq!(muscle.deltas.len(), in_range.len());
        for (vd, &i) in muscle.deltas.iter().zip(&in_range) {
            prop_assert_eq!(vd.vertex_index, i);
            prop_assert_eq!(vd.position, neutral[i]);
            prop_assert_eq!(vd.delta, blendshape[i] - neutral[i]);
        }
    }

    #[test]
    fn table_document_round_trip(table in arb_table()) {
        let doc = table.to_document().unwrap();
        prop_assert_eq!(AuDeltaTable::from_document(&doc).unwrap(), table);
    }

    #[test]
    fn table_binary_round_trip(table in arb_table()) {
        let mut bytes = Vec::new();
        table.write_to(&mut bytes, TableFormat::Binary).unwrap();
        let back = AuDeltaTable::read_from(bytes.as_slice(), TableFormat::Binary).unwrap();
        prop_assert_eq!(back, table);
    }
}

// =============================================================================
// Activation
// =============================================================================

proptest! {
    #[test]
    fn winner_has_the_largest_delta((neutral, current) in arb_features(), t in arb_thresholds()) {
        let deltas: Vec<f32> = neutral
            .iter()
            .zip(&current)
            .map(|(n, c)| c.distance - n.distance)
            .collect();

        match evaluate_activation(&neutral, &current, &t).unwrap() {
            None => prop_assert!(deltas.iter().all(|&d| d <= t.min)),
            Some(result) => {
                let best = deltas.iter().copied().fold(f32::MIN, f32::max);
                prop_assert!(result.is_active);
                prop_assert!(result.delta() > t.min);
                prop_assert_eq!(result.delta(), best);
                prop_assert!((0.0..=1.0).contains(&result.intensity));
            }
        }
    }

    #[test]
    fn intensity_is_monotonic_and_clamped(
        base in 0.0f32..5.0,
        a in 0.0f32..10.0,
        b in 0.0f32..10.0,
        t in arb_thresholds(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let i_lo = intensity(base, lo, &t);
        let i_hi = intensity(base, hi, &t);
        prop_assert!(i_lo <= i_hi);
        prop_assert!((0.0..=1.0).contains(&i_lo));
        prop_assert!((0.0..=1.0).contains(&i_hi));
    }

    #[test]
    fn out_of_range_landmarks_never_panic(
        points in prop::collection::vec(arb_vec3(), 0..20),
        indices in prop::collection::vec(0usize..40, 0..12),
        policy in prop_oneof![Just(DistancePolicy::LastPair), Just(DistancePolicy::Mean)],
    ) {
        let subset = select_landmarks(&points, &indices);
        prop_assert_eq!(subset.len(), indices.iter().filter(|&&i| i < points.len()).count());

        match subset_landmarks(&points, &indices) {
            Ok(aligned) => {
                prop_assert!(indices.iter().all(|&i| i < points.len()));
                for (p, &i) in aligned.iter().zip(&indices) {
                    prop_assert_eq!(*p, points[i]);
                }
            }
            Err(_) => prop_assert!(indices.iter().any(|&i| i >= points.len())),
        }

        let map: LandmarksActionUnitMap = [LandmarkActionUnitEntry {
            au_id: 1,
            side: Side::Center,
            landmark_indices: indices.clone(),
        }]
        .into_iter()
        .collect();
        let features = compute_distance_features(&points, &map, policy);
        prop_assert!(features.len() <= 1);
        if indices.len() % 2 == 1 {
            prop_assert!(features.is_empty());
        }
    }
}

// =============================================================================
// Accumulation
// =============================================================================

proptest! {
    #[test]
    fn held_activation_applies_nothing_the_second_time(
        table in arb_table(),
        vertices in prop::collection::vec(arb_vec3(), 1..300),
        level in 0.0f32..=1.0,
    ) {
        let au_id = table.au_ids().next().unwrap();
        let held = activation(au_id, level);

        let first = deform(&vertices, &table, &Accumulation::zeros(vertices.len()), Some(&held));
        let second = deform(&first.vertices, &table, &first.accumulation, Some(&held));

        prop_assert_eq!(&second.vertices, &first.vertices);
        prop_assert_eq!(&second.accumulation, &first.accumulation);
        prop_assert_eq!(
            first.accumulation,
            accumulate_action_unit(&table, au_id, vertices.len())
        );
    }

    #[test]
    fn untouched_vertices_stay_put(
        table in arb_table(),
        vertices in prop::collection::vec(arb_vec3(), 1..50),
    ) {
        // Ids 50.. never appear in generated tables.
        let out = deform(&vertices, &table, &Accumulation::zeros(vertices.len()), Some(&activation(99, 1.0)));
        prop_assert_eq!(out.vertices, vertices);
    }
}
