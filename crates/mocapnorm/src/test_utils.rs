//! Shared synthetic trajectories for unit tests.
//!
//! The humanoid rest pose matches the marker names of
//! [`SkeletonSpec::humanoid`](crate::skeleton::SkeletonSpec::humanoid): z up,
//! feet on the ground, subject facing +y.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::store::{MemoryStore, Point3};

#[rustfmt::skip]
pub(crate) const HUMANOID_REST_POSE: &[(&str, Point3)] = &[
    ("hips_center",       [ 0.00, 0.00, 0.95]),
    ("trunk_center",      [ 0.00, 0.00, 1.20]),
    ("neck_center",       [ 0.00, 0.00, 1.45]),
    ("head_center",       [ 0.00, 0.02, 1.63]),
    ("left_shoulder",     [ 0.18, 0.00, 1.42]),
    ("left_elbow",        [ 0.21, 0.00, 1.12]),
    ("left_wrist",        [ 0.23, 0.02, 0.87]),
    ("left_index",        [ 0.24, 0.04, 0.78]),
    ("right_shoulder",    [-0.18, 0.00, 1.42]),
    ("right_elbow",       [-0.21, 0.00, 1.12]),
    ("right_wrist",       [-0.23, 0.02, 0.87]),
    ("right_index",       [-0.24, 0.04, 0.78]),
    ("left_hip",          [ 0.10, 0.00, 0.92]),
    ("left_knee",         [ 0.10, 0.03, 0.50]),
    ("left_ankle",        [ 0.10, 0.00, 0.09]),
    ("left_heel",         [ 0.10, -0.05, 0.02]),
    ("left_foot_index",   [ 0.11, 0.15, 0.02]),
    ("right_hip",         [-0.10, 0.00, 0.92]),
    ("right_knee",        [-0.10, 0.03, 0.50]),
    ("right_ankle",       [-0.10, 0.00, 0.09]),
    ("right_heel",        [-0.10, -0.05, 0.02]),
    ("right_foot_index",  [-0.11, 0.15, 0.02]),
];

pub(crate) fn rest_position(marker: &str) -> Point3 {
    HUMANOID_REST_POSE
        .iter()
        .find(|(name, _)| *name == marker)
        .map(|&(_, p)| p)
        .unwrap_or_else(|| panic!("no rest position for '{}'", marker))
}

/// Static humanoid pose repeated over `n_frames`.
pub(crate) fn humanoid_store(n_frames: usize) -> MemoryStore {
    let mut store = MemoryStore::new(1, n_frames);
    for &(name, p) in HUMANOID_REST_POSE {
        store = store
            .with_trajectory(name, vec![p; n_frames])
            .expect("rest pose track");
    }
    store
}

/// Humanoid pose with uniform per-axis noise in `[-amplitude, amplitude]`.
pub(crate) fn noisy_humanoid_store(n_frames: usize, amplitude: f64, seed: u64) -> MemoryStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = MemoryStore::new(1, n_frames);
    for &(name, p) in HUMANOID_REST_POSE {
        let track = (0..n_frames)
            .map(|_| {
                [
                    p[0] + rng.gen_range(-amplitude..=amplitude),
                    p[1] + rng.gen_range(-amplitude..=amplitude),
                    p[2] + rng.gen_range(-amplitude..=amplitude),
                ]
            })
            .collect();
        store = store
            .with_trajectory(name, track)
            .expect("noisy pose track");
    }
    store
}
