//! Contact window detection and base-marker height correction.

use serde::{Deserialize, Serialize};

use crate::attenuation::{attenuation_profile, three_quarter_blend};
use crate::store::{is_defined, Point3};

/// Half-open `[start, end)` frame range with the base below threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionWindow {
    pub start: usize,
    pub end: usize,
}

impl CorrectionWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Scanning,
    InWindow { start: usize },
}

/// Scan `heights` left to right for runs strictly below `z_threshold`.
///
/// Undefined heights close an open window.
pub fn find_windows(heights: &[f64], z_threshold: f64) -> Vec<CorrectionWindow> {
    let mut windows = Vec::new();
    let mut state = ScanState::Scanning;
    for (frame, &z) in heights.iter().enumerate() {
        let below = z.is_finite() && z < z_threshold;
        state = match (state, below) {
            (ScanState::Scanning, true) => ScanState::InWindow { start: frame },
            (ScanState::InWindow { start }, false) => {
                windows.push(CorrectionWindow { start, end: frame });
                ScanState::Scanning
            }
            (s, _) => s,
        };
    }
    if let ScanState::InWindow { start } = state {
        windows.push(CorrectionWindow {
            start,
            end: heights.len(),
        });
    }
    windows
}

/// Height parameters of one locking pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockProfile {
    pub z_threshold: f64,
    pub ground_level: f64,
    pub min_window: usize,
    pub initial_count: usize,
    pub final_count: usize,
    pub lock_xy: bool,
}

/// How a window was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTreatment {
    /// Shorter than the minimum; only clamped up to the ground.
    Floor,
    /// Attenuated at the edges and hard-locked in between.
    Lock {
        initial: usize,
        locked: usize,
        final_count: usize,
    },
}

/// Split a long window into initial / locked / final frame counts.
pub(crate) fn lock_split(
    window: CorrectionWindow,
    frame_count: usize,
    initial_count: usize,
    final_count: usize,
) -> (usize, usize, usize) {
    let len = window.len();
    let initial = initial_count.min(len);
    let final_count = if window.end >= frame_count {
        0
    } else {
        final_count.min(len - initial)
    };
    (initial, len - initial - final_count, final_count)
}

/// Correct the base track over `window`. Returns the treatment and the
/// frames whose position changed.
pub(crate) fn apply_window(
    track: &mut [Point3],
    window: CorrectionWindow,
    profile: &LockProfile,
) -> (WindowTreatment, Vec<usize>) {
    let before: Vec<Point3> = track[window.start..window.end].to_vec();

    let treatment = if window.len() < profile.min_window {
        for p in &mut track[window.start..window.end] {
            if is_defined(p) && p[2] < profile.ground_level {
                p[2] = profile.ground_level;
            }
        }
        WindowTreatment::Floor
    } else {
        let (initial, locked, final_count) = lock_split(
            window,
            track.len(),
            profile.initial_count,
            profile.final_count,
        );
        let th = profile.z_threshold;
        let ground = profile.ground_level;
        let mid = three_quarter_blend(th, ground);

        let head = attenuation_profile(initial, th, mid, ground);
        for (i, z) in head.into_iter().enumerate() {
            track[window.start + i][2] = z;
        }

        let lock_start = window.start + initial;
        let lock_end = lock_start + locked;
        if locked > 0 {
            let anchor = track[lock_start];
            for p in &mut track[lock_start..lock_end] {
                p[2] = ground;
                if profile.lock_xy {
                    p[0] = anchor[0];
                    p[1] = anchor[1];
                }
            }
        }

        let tail = attenuation_profile(final_count, ground, mid, th);
        for (i, z) in tail.into_iter().enumerate() {
            track[lock_end + i][2] = z;
        }

        WindowTreatment::Lock {
            initial,
            locked,
            final_count,
        }
    };

    let touched = before
        .iter()
        .zip(&track[window.start..window.end])
        .enumerate()
        .filter(|(_, (old, new))| old != new)
        .map(|(i, _)| window.start + i)
        .collect();
    (treatment, touched)
}
