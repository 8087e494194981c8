//! Foot contact locking.
//!
//! Per foot and base marker (heel, foot index) the height track is scanned
//! for contact windows. Short windows are only clamped up to the ground;
//! long ones get a quadratic blend at both edges and a hard lock to the
//! ground in between. The ankle height is then re-solved on every touched
//! frame so the ankle→heel and ankle→foot-index lengths match their medians
//! from before the pass, and the height change is passed on to the
//! compensation markers of the leg. Optionally the torso root is re-centred
//! between the hips and moved together with its subtree.

mod config;
mod solver;
mod window;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use config::{ContactLockConfig, HeightSolver, TargetBaseMarkers, TargetFoot};
pub use solver::{
    AnkleHeightProblem, GaussNewton, GoldenSection, HeightMinimizer, LevenbergMarquardt,
};
pub use window::{find_windows, CorrectionWindow, WindowTreatment};

use crate::bones::bone_lengths;
use crate::error::PassError;
use crate::hierarchy::translate_subtree_cached;
use crate::math::finite_median;
use crate::skeleton::{FootMarkers, Side, Skeleton, UpperBodyMarkers};
use crate::store::{is_defined, MarkerCache, TrajectoryStore};

use window::{apply_window, LockProfile};

/// Per base marker outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseLockSummary {
    pub marker: String,
    pub n_windows: usize,
    pub n_locked_windows: usize,
    pub n_floor_windows: usize,
    pub n_frames_touched: usize,
}

/// Per foot outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimbLockReport {
    pub side: Side,
    pub bases: Vec<BaseLockSummary>,
    /// Frames where any base marker moved.
    pub n_frames_touched: usize,
    pub n_ankle_solved: usize,
    /// Solver did not converge; the previous height was kept.
    pub n_ankle_failed: usize,
    /// Ankle or a base marker undefined on a touched frame.
    pub n_ankle_undefined: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LimbLockReport {
    fn new(side: Side) -> Self {
        Self {
            side,
            bases: Vec::new(),
            n_frames_touched: 0,
            n_ankle_solved: 0,
            n_ankle_failed: 0,
            n_ankle_undefined: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactLockReport {
    pub limbs: Vec<LimbLockReport>,
    /// Frames on which the torso root was re-centred.
    pub n_upper_body_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_body_error: Option<String>,
}

impl ContactLockReport {
    pub fn limb(&self, side: Side) -> Option<&LimbLockReport> {
        self.limbs.iter().find(|l| l.side == side)
    }
}

/// Lock the selected feet of `skeleton` to the ground.
///
/// A foot with missing markers is reported and skipped. The pass fails only
/// on an invalid config or a store write error.
pub fn lock_contacts(
    store: &mut dyn TrajectoryStore,
    skeleton: &Skeleton,
    config: &ContactLockConfig,
) -> Result<ContactLockReport, PassError> {
    config.validate().map_err(PassError::InvalidConfig)?;

    let profile = LockProfile {
        z_threshold: config.z_threshold,
        ground_level: config.ground_level,
        min_window: config.frame_window_min_size,
        initial_count: config.initial_attenuation_count,
        final_count: config.final_attenuation_count,
        lock_xy: config.lock_xy_at_ground_level,
    };
    let minimizer = config.solver.minimizer(config.max_iters);

    let mut cache = MarkerCache::default();
    let mut report = ContactLockReport::default();
    let mut touched_any = BTreeSet::new();

    for foot in skeleton
        .feet
        .iter()
        .filter(|f| config.target_foot.includes(f.side))
    {
        let mut limb = LimbLockReport::new(foot.side);
        match lock_foot(
            &mut cache,
            store,
            foot,
            config,
            &profile,
            minimizer.as_ref(),
            &mut limb,
        ) {
            Ok(touched) => touched_any.extend(touched),
            Err(e) => {
                tracing::warn!("{} foot skipped: {}", foot.side, e);
                limb.error = Some(e.to_string());
            }
        }
        report.limbs.push(limb);
    }

    if config.compensate_upper_body && !touched_any.is_empty() {
        if let Some(upper) = &skeleton.upper_body {
            match recentre_upper_body(&mut cache, store, skeleton, upper, &touched_any) {
                Ok(n) => report.n_upper_body_frames = n,
                Err(e) => {
                    tracing::warn!("upper body compensation skipped: {}", e);
                    report.upper_body_error = Some(e.to_string());
                }
            }
        }
    }

    let n_written = cache.flush(store)?;
    tracing::info!(
        n_limbs = report.limbs.len(),
        n_frames_touched = touched_any.len(),
        n_upper_body_frames = report.n_upper_body_frames,
        n_trajectories_written = n_written,
        "contact lock done"
    );
    Ok(report)
}

fn require(
    cache: &mut MarkerCache,
    store: &dyn TrajectoryStore,
    name: &str,
) -> Result<(), PassError> {
    if cache.ensure(store, name) {
        Ok(())
    } else {
        Err(PassError::MissingTrajectory(name.to_string()))
    }
}

fn lock_foot(
    cache: &mut MarkerCache,
    store: &dyn TrajectoryStore,
    foot: &FootMarkers,
    config: &ContactLockConfig,
    profile: &LockProfile,
    minimizer: &dyn HeightMinimizer,
    limb: &mut LimbLockReport,
) -> Result<BTreeSet<usize>, PassError> {
    for name in [&foot.ankle, &foot.heel, &foot.foot_index] {
        require(cache, store, name)?;
    }
    let compensation: Vec<&str> = foot
        .compensation
        .iter()
        .map(String::as_str)
        .filter(|name| {
            let found = cache.ensure(store, name);
            if !found {
                tracing::warn!("{} foot: compensation marker '{}' missing", foot.side, name);
            }
            found
        })
        .collect();

    // Foot lengths before any base marker moves.
    let median_length = |tail: &str| -> f64 {
        match (cache.track(&foot.ankle), cache.track(tail)) {
            (Some(a), Some(t)) => finite_median(&bone_lengths(a, t)),
            _ => f64::NAN,
        }
    };
    let d_heel = median_length(&foot.heel);
    let d_toe = median_length(&foot.foot_index);

    let mut touched = BTreeSet::new();
    for base in config.target_base_markers.markers(foot) {
        let Some(track) = cache.track_mut(base) else {
            return Err(PassError::MissingTrajectory(base.to_string()));
        };
        let heights: Vec<f64> = track
            .iter()
            .map(|p| if is_defined(p) { p[2] } else { f64::NAN })
            .collect();

        let mut summary = BaseLockSummary {
            marker: base.to_string(),
            ..Default::default()
        };
        let mut base_touched = BTreeSet::new();
        for w in find_windows(&heights, config.z_threshold) {
            let (treatment, frames) = apply_window(track, w, profile);
            summary.n_windows += 1;
            match treatment {
                WindowTreatment::Floor => summary.n_floor_windows += 1,
                WindowTreatment::Lock { .. } => summary.n_locked_windows += 1,
            }
            tracing::debug!(
                marker = base,
                start = w.start,
                end = w.end,
                treatment = ?treatment,
                n_touched = frames.len(),
                "contact window"
            );
            base_touched.extend(frames);
        }
        summary.n_frames_touched = base_touched.len();
        touched.extend(base_touched);
        limb.bases.push(summary);
    }
    limb.n_frames_touched = touched.len();

    if !(d_heel.is_finite() && d_heel > 0.0 && d_toe.is_finite() && d_toe > 0.0) {
        tracing::warn!(
            "{} foot: no usable ankle→heel / ankle→foot_index length, ankle kept",
            foot.side
        );
        limb.n_ankle_undefined += touched.len();
        return Ok(touched);
    }

    for &frame in &touched {
        let points = (
            cache.point(&foot.ankle, frame),
            cache.point(&foot.heel, frame),
            cache.point(&foot.foot_index, frame),
        );
        let (Some(ankle), Some(heel), Some(toe)) = points else {
            limb.n_ankle_undefined += 1;
            continue;
        };
        if !(is_defined(&ankle) && is_defined(&heel) && is_defined(&toe)) {
            limb.n_ankle_undefined += 1;
            continue;
        }

        let problem = AnkleHeightProblem {
            xy: [ankle[0], ankle[1]],
            bases: [heel, toe],
            distances: [d_heel, d_toe],
        };
        let z0 = problem.initial_guess(ankle[2], config.ankle_initial_margin);
        let Some(z) = minimizer.minimize(&problem, z0) else {
            tracing::warn!(
                side = %foot.side,
                frame,
                "ankle height solver did not converge, keeping previous height"
            );
            limb.n_ankle_failed += 1;
            continue;
        };

        let delta = z - ankle[2];
        cache.set_point(&foot.ankle, frame, [ankle[0], ankle[1], z]);
        let shift = config.knee_hip_compensation_coefficient * delta;
        for name in &compensation {
            if let Some(p) = cache.point(name, frame).filter(is_defined) {
                cache.set_point(name, frame, [p[0], p[1], p[2] + shift]);
            }
        }
        limb.n_ankle_solved += 1;
    }

    tracing::debug!(
        side = %foot.side,
        n_frames_touched = limb.n_frames_touched,
        n_ankle_solved = limb.n_ankle_solved,
        n_ankle_failed = limb.n_ankle_failed,
        "foot locked"
    );
    Ok(touched)
}

fn recentre_upper_body(
    cache: &mut MarkerCache,
    store: &dyn TrajectoryStore,
    skeleton: &Skeleton,
    upper: &UpperBodyMarkers,
    frames: &BTreeSet<usize>,
) -> Result<usize, PassError> {
    for name in [&upper.root, &upper.left_hip, &upper.right_hip] {
        require(cache, store, name)?;
    }
    for name in skeleton.hierarchy.subtree_names(&upper.root) {
        cache.ensure(store, name);
    }

    let mut n = 0;
    for &frame in frames {
        let points = (
            cache.point(&upper.root, frame),
            cache.point(&upper.left_hip, frame),
            cache.point(&upper.right_hip, frame),
        );
        let (Some(root), Some(lh), Some(rh)) = points else {
            continue;
        };
        if !(is_defined(&root) && is_defined(&lh) && is_defined(&rh)) {
            continue;
        }
        let dz = 0.5 * (lh[2] + rh[2]) - root[2];
        translate_subtree_cached(cache, &skeleton.hierarchy, &upper.root, frame, [0.0, 0.0, dz]);
        n += 1;
    }
    Ok(n)
}
