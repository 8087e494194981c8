//! mocapnorm: batch normalisation of marker-based motion-capture
//! trajectories into a geometrically consistent skeleton.
//!
//! The passes are:
//!
//! 1. **Bone statistics** – per-frame lengths, median and spread of virtual
//!    bones (`head`, `tail` marker pairs).
//! 2. **Dispersion reduction** – out-of-interval bone lengths are pulled onto
//!    the interval by translating the tail marker and its hierarchy subtree.
//! 3. **Contact locking** – low foot-marker windows are blended and locked to
//!    the ground, then the ankle height is re-solved from two foot lengths.
//! 4. **Pole targets** – auxiliary points that orient two-segment chains,
//!    stable through the straight-chain singularity.
//!
//! # Public API
//! - [`TrajectoryStore`] and the in-memory [`MemoryStore`]
//! - [`Skeleton`] / [`SkeletonSpec`] (hierarchy, bones, feet, pole chains)
//! - pass entry points [`compute_bone_stats`], [`reduce_dispersion`],
//!   [`lock_contacts`], [`apply_pole_targets`] and [`normalize`]
//! - their configs and reports
//!
//! All passes are single-threaded and mutate the store in place.

mod attenuation;
mod bones;
mod contact_lock;
mod dispersion;
mod error;
mod hierarchy;
mod math;
mod pipeline;
mod pole;
mod skeleton;
mod store;

#[cfg(test)]
mod test_utils;

pub use attenuation::{attenuation_profile, three_quarter_blend, QuadraticCurve};
pub use bones::{
    bone_lengths, bone_statistic, compute_bone_stats, BoneDef, BoneStatistic, StatsRow, StatsTable,
};
pub use contact_lock::{
    find_windows, lock_contacts, AnkleHeightProblem, BaseLockSummary, ContactLockConfig,
    ContactLockReport, CorrectionWindow, GaussNewton, GoldenSection, HeightMinimizer,
    HeightSolver, LevenbergMarquardt, LimbLockReport, TargetBaseMarkers, TargetFoot,
    WindowTreatment,
};
pub use dispersion::{
    length_interval, reduce_dispersion, shared_tail_markers, BoneCorrectionStatus,
    BoneCorrectionSummary, DispersionConfig, DispersionReport, IntervalUnavailable,
    IntervalVariable, LengthInterval,
};
pub use error::PassError;
pub use hierarchy::{translate_subtree, Hierarchy, HierarchyError, HierarchyNode};
pub use pipeline::{normalize, NormalizeConfig, NormalizeReport};
pub use pole::{
    apply_pole_targets, compute_pole_trajectory, pole_position, transition_weight, PoleBranch,
    PoleChainSummary, PoleReport, PoleTargetSpec,
};
pub use skeleton::{FootMarkers, Side, Skeleton, SkeletonError, SkeletonSpec, UpperBodyMarkers};
pub use store::{is_defined, MemoryStore, Point3, StoreError, TrajectoryStore, UNDEFINED};
