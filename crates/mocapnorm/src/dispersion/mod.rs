//! Bone-length dispersion reduction.
//!
//! For every bone and frame whose length leaves the bone's tolerance
//! interval, the tail marker is moved along the bone direction onto the
//! violated bound, and the same translation is applied to every descendant
//! of the tail in the hierarchy at that frame.
//!
//! Bones are processed in declaration order. Bone vectors and lengths come
//! from the positions captured before the pass; the corrected tail is placed
//! relative to the head's current position, so a correction that already
//! moved the head carries over. When two bones share a tail marker the later
//! bone wins; [`DispersionReport::shared_tails`] lists such markers.

mod bounds;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use bounds::{length_interval, IntervalUnavailable, IntervalVariable, LengthInterval};

use crate::bones::{compute_bone_stats, BoneDef, BoneStatistic, StatsTable};
use crate::error::PassError;
use crate::hierarchy::{translate_subtree_cached, Hierarchy};
use crate::math::{point3, vec3, EPS_NORM};
use crate::store::{is_defined, MarkerCache, TrajectoryStore};

/// Dispersion reducer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispersionConfig {
    pub interval_variable: IntervalVariable,
    /// Tolerance factor; clamped per mode.
    pub interval_factor: f64,
    /// Subject height in scene units, for `standard_length`.
    pub body_height: f64,
    /// Scene → display unit multiplier of the statistics tables.
    pub display_scale: f64,
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            interval_variable: IntervalVariable::CaptureMedian,
            interval_factor: 0.2,
            body_height: 1.75,
            display_scale: 100.0,
        }
    }
}

impl DispersionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.interval_factor.is_finite() || self.interval_factor < 0.0 {
            return Err(format!(
                "interval_factor must be finite and >= 0, got {}",
                self.interval_factor
            ));
        }
        if !self.body_height.is_finite() || self.body_height <= 0.0 {
            return Err(format!(
                "body_height must be finite and > 0, got {}",
                self.body_height
            ));
        }
        if !self.display_scale.is_finite() || self.display_scale <= 0.0 {
            return Err(format!(
                "display_scale must be finite and > 0, got {}",
                self.display_scale
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoneCorrectionStatus {
    /// Interval available; every out-of-bounds frame was handled.
    Ok,
    /// No interval could be derived; the bone was left untouched.
    Skipped,
    /// A marker of the bone is missing from the store.
    Failed,
}

/// Per-bone outcome of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneCorrectionSummary {
    pub bone: String,
    pub status: BoneCorrectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<LengthInterval>,
    pub n_corrected: usize,
    /// Frames skipped because head or tail was undefined.
    pub n_undefined: usize,
    /// Out-of-bounds frames skipped because head and tail coincide.
    pub n_degenerate: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BoneCorrectionSummary {
    fn new(bone: &str, status: BoneCorrectionStatus) -> Self {
        Self {
            bone: bone.to_string(),
            status,
            interval: None,
            n_corrected: 0,
            n_undefined: 0,
            n_degenerate: 0,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionReport {
    pub mode: IntervalVariable,
    pub before: StatsTable,
    pub after: StatsTable,
    pub bones: Vec<BoneCorrectionSummary>,
    /// Markers that are the tail of more than one bone.
    pub shared_tails: Vec<String>,
}

impl DispersionReport {
    pub fn total_corrected(&self) -> usize {
        self.bones.iter().map(|b| b.n_corrected).sum()
    }

    pub fn bone(&self, name: &str) -> Option<&BoneCorrectionSummary> {
        self.bones.iter().find(|b| b.bone == name)
    }
}

/// Markers used as tail by two or more bones, sorted by name.
pub fn shared_tail_markers(bones: &[BoneDef]) -> Vec<String> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for b in bones {
        *counts.entry(b.tail.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|&(_, n)| n > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Run one dispersion reduction pass over `bones`.
///
/// A bone whose markers are missing is reported as failed and skipped; the
/// pass itself only fails on an invalid config or a store write error.
pub fn reduce_dispersion(
    store: &mut dyn TrajectoryStore,
    hierarchy: &Hierarchy,
    bones: &[BoneDef],
    config: &DispersionConfig,
) -> Result<DispersionReport, PassError> {
    config.validate().map_err(PassError::InvalidConfig)?;

    let stats = compute_bone_stats(store, bones);
    let before = StatsTable::from_results(&stats, config.display_scale);
    tracing::debug!("bone statistics before dispersion reduction:\n{}", before);

    let shared_tails = shared_tail_markers(bones);
    if !shared_tails.is_empty() {
        tracing::warn!(
            markers = ?shared_tails,
            "markers are the tail of several bones; later bones win"
        );
    }

    let mut names: Vec<&str> = Vec::new();
    for b in bones {
        names.push(&b.head);
        names.extend(hierarchy.subtree_names(&b.tail));
    }
    let mut cache = MarkerCache::load(store, names);
    let snapshot = cache.clone();

    let mut summaries = Vec::with_capacity(bones.len());
    for (bone, stat) in bones.iter().zip(&stats) {
        let summary = match stat {
            Ok(stat) => correct_bone(&mut cache, &snapshot, hierarchy, bone, stat, config),
            Err(e) => {
                tracing::warn!("bone '{}' skipped: {}", bone.name, e);
                let mut s = BoneCorrectionSummary::new(&bone.name, BoneCorrectionStatus::Failed);
                s.reason = Some(e.to_string());
                s
            }
        };
        summaries.push(summary);
    }

    let n_written = cache.flush(store)?;

    let after = StatsTable::from_results(&compute_bone_stats(store, bones), config.display_scale);
    tracing::debug!("bone statistics after dispersion reduction:\n{}", after);

    let report = DispersionReport {
        mode: config.interval_variable,
        before,
        after,
        bones: summaries,
        shared_tails,
    };
    tracing::info!(
        mode = %config.interval_variable,
        n_bones = bones.len(),
        n_corrected = report.total_corrected(),
        n_trajectories_written = n_written,
        "dispersion reduction done"
    );
    Ok(report)
}

fn correct_bone(
    cache: &mut MarkerCache,
    snapshot: &MarkerCache,
    hierarchy: &Hierarchy,
    bone: &BoneDef,
    stat: &BoneStatistic,
    config: &DispersionConfig,
) -> BoneCorrectionSummary {
    let interval = match length_interval(
        config.interval_variable,
        config.interval_factor,
        config.body_height,
        bone,
        stat,
    ) {
        Ok(i) => i,
        Err(reason) => {
            tracing::warn!("bone '{}' skipped: {}", bone.name, reason);
            let mut s = BoneCorrectionSummary::new(&bone.name, BoneCorrectionStatus::Skipped);
            s.reason = Some(reason.to_string());
            return s;
        }
    };

    let mut summary = BoneCorrectionSummary::new(&bone.name, BoneCorrectionStatus::Ok);
    summary.interval = Some(interval);

    for (frame, &len) in stat.lengths.iter().enumerate() {
        if !len.is_finite() {
            summary.n_undefined += 1;
            continue;
        }
        let Some(target) = interval.violated_bound(len) else {
            continue;
        };
        let (Some(head0), Some(tail0)) = (
            snapshot.point(&bone.head, frame),
            snapshot.point(&bone.tail, frame),
        ) else {
            summary.n_undefined += 1;
            continue;
        };
        if len <= EPS_NORM {
            summary.n_degenerate += 1;
            continue;
        }
        let (Some(head), Some(tail)) = (
            cache.point(&bone.head, frame),
            cache.point(&bone.tail, frame),
        ) else {
            summary.n_undefined += 1;
            continue;
        };
        if !is_defined(&head) || !is_defined(&tail) {
            summary.n_undefined += 1;
            continue;
        }

        let dir = (vec3(&tail0) - vec3(&head0)) / len;
        let corrected = vec3(&head) + dir * target;
        let delta = corrected - vec3(&tail);
        translate_subtree_cached(cache, hierarchy, &bone.tail, frame, point3(&delta));
        summary.n_corrected += 1;
    }

    if summary.n_degenerate > 0 {
        tracing::warn!(
            bone = %bone.name,
            n_degenerate = summary.n_degenerate,
            "zero-length frames left uncorrected"
        );
    }
    tracing::debug!(
        bone = %bone.name,
        inferior = interval.inferior,
        superior = interval.superior,
        n_corrected = summary.n_corrected,
        n_undefined = summary.n_undefined,
        "bone corrected"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bones::bone_statistic;
    use crate::hierarchy::HierarchyNode;
    use crate::math::distance;
    use crate::skeleton::Skeleton;
    use crate::store::{MemoryStore, Point3, UNDEFINED};
    use crate::test_utils::noisy_humanoid_store;
    use approx::assert_abs_diff_eq;

    fn median_config(factor: f64) -> DispersionConfig {
        DispersionConfig {
            interval_variable: IntervalVariable::CaptureMedian,
            interval_factor: factor,
            ..DispersionConfig::default()
        }
    }

    fn single_bone_store() -> MemoryStore {
        let mut tail = vec![[0.0, 0.0, 1.0]; 10];
        tail[5] = [0.0, 0.0, 1.5];
        MemoryStore::new(0, 10)
            .with_trajectory("head", vec![[0.0; 3]; 10])
            .and_then(|s| s.with_trajectory("tail", tail))
            .and_then(|s| s.with_trajectory("child", vec![[0.0, 0.1, 1.2]; 10]))
            .expect("valid")
    }

    fn single_bone_hierarchy() -> Hierarchy {
        Hierarchy::from_nodes(&[
            HierarchyNode::new("head", &["tail"]),
            HierarchyNode::new("tail", &["child"]),
        ])
        .expect("valid")
    }

    #[test]
    fn out_of_bounds_frame_is_pulled_to_superior_bound() {
        let mut store = single_bone_store();
        let h = single_bone_hierarchy();
        let bones = [BoneDef::new("b", "head", "tail")];

        let report = reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        let summary = report.bone("b").expect("summary");
        assert_eq!(summary.status, BoneCorrectionStatus::Ok);
        assert_eq!(summary.n_corrected, 1);
        let interval = summary.interval.expect("interval");
        assert_abs_diff_eq!(interval.inferior, 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(interval.superior, 1.1, epsilon = 1e-12);

        let tail = store.get("tail").expect("tail");
        assert_abs_diff_eq!(tail[5][2], 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(tail[4][2], 1.0);

        // The child moved with the tail.
        let child = store.get("child").expect("child");
        assert_abs_diff_eq!(child[5][2], 1.2 - 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(child[5][1], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(child[4][2], 1.2);
    }

    #[test]
    fn zero_length_frame_is_counted_and_left_in_place() {
        let mut tail = vec![[0.0, 0.0, 1.0]; 10];
        tail[3] = [0.0; 3];
        let mut store = MemoryStore::new(0, 10)
            .with_trajectory("head", vec![[0.0; 3]; 10])
            .and_then(|s| s.with_trajectory("tail", tail))
            .and_then(|s| s.with_trajectory("child", vec![[0.0, 0.1, 1.2]; 10]))
            .expect("valid");
        let h = single_bone_hierarchy();
        let bones = [BoneDef::new("b", "head", "tail")];

        let report = reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        let summary = report.bone("b").expect("summary");
        assert_eq!(summary.status, BoneCorrectionStatus::Ok);
        assert_eq!(summary.n_degenerate, 1);
        assert_eq!(summary.n_corrected, 0);
        assert_eq!(store.get("tail").expect("tail")[3], [0.0; 3]);
        assert_eq!(store.get("child").expect("child")[3], [0.0, 0.1, 1.2]);
    }

    #[test]
    fn undefined_frames_are_counted_not_touched() {
        let mut store = single_bone_store();
        store.set_position("head", 2, UNDEFINED).expect("valid");
        let h = single_bone_hierarchy();
        let bones = [BoneDef::new("b", "head", "tail")];

        let report = reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        assert_eq!(report.bone("b").expect("summary").n_undefined, 1);
        assert!(!is_defined(&store.get("head").expect("head")[2]));
        assert_eq!(store.get("tail").expect("tail")[2], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_marker_fails_only_that_bone() {
        let mut store = single_bone_store();
        let h = single_bone_hierarchy();
        let bones = [
            BoneDef::new("ghost", "head", "nowhere"),
            BoneDef::new("b", "head", "tail"),
        ];
        let report = reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        assert_eq!(report.bones[0].status, BoneCorrectionStatus::Failed);
        assert_eq!(report.bones[1].n_corrected, 1);
        assert_eq!(report.before.rows.len(), 1);
    }

    #[test]
    fn standard_length_without_reference_is_skipped() {
        let mut store = single_bone_store();
        let h = single_bone_hierarchy();
        let bones = [BoneDef::new("b", "head", "tail")];
        let config = DispersionConfig {
            interval_variable: IntervalVariable::StandardLength,
            ..DispersionConfig::default()
        };
        let report = reduce_dispersion(&mut store, &h, &bones, &config).expect("pass");
        assert_eq!(report.bones[0].status, BoneCorrectionStatus::Skipped);
        assert_eq!(store.get("tail").expect("tail")[5], [0.0, 0.0, 1.5]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut store = single_bone_store();
        let h = single_bone_hierarchy();
        let config = DispersionConfig {
            body_height: 0.0,
            ..DispersionConfig::default()
        };
        assert!(matches!(
            reduce_dispersion(&mut store, &h, &[], &config),
            Err(PassError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lengths_are_within_bounds_after_one_pass() {
        let skeleton = Skeleton::default();
        let mut store = noisy_humanoid_store(60, 0.03, 7);
        let config = median_config(0.05);

        let report =
            reduce_dispersion(&mut store, &skeleton.hierarchy, &skeleton.bones, &config).expect("pass");
        assert!(report.total_corrected() > 0);
        assert!(report.shared_tails.is_empty());

        for summary in &report.bones {
            let bone = skeleton.bone(&summary.bone).expect("bone");
            let interval = summary.interval.expect("interval");
            let stat = bone_statistic(&store, bone).expect("stat");
            for &len in stat.lengths.iter().filter(|l| l.is_finite()) {
                assert!(
                    len >= interval.inferior - 1e-6 && len <= interval.superior + 1e-6,
                    "{}: {} outside [{}, {}]",
                    bone.name,
                    len,
                    interval.inferior,
                    interval.superior
                );
            }
        }
    }

    #[test]
    fn second_pass_without_shared_markers_corrects_nothing() {
        let skeleton = Skeleton::default();
        let mut store = noisy_humanoid_store(40, 0.03, 11);
        let config = median_config(0.05);

        let first =
            reduce_dispersion(&mut store, &skeleton.hierarchy, &skeleton.bones, &config).expect("pass");
        assert!(first.total_corrected() > 0);
        let second =
            reduce_dispersion(&mut store, &skeleton.hierarchy, &skeleton.bones, &config).expect("pass");
        assert_eq!(second.total_corrected(), 0);
    }

    #[test]
    fn shared_tail_is_reported_and_last_bone_wins() {
        // Two bones ending at "t"; neither interval contains the other's target.
        let n = 5;
        let mut t = vec![[0.0, 0.0, 1.0]; n];
        t[2] = [0.0, 0.0, 3.0];
        let mut store = MemoryStore::new(0, n)
            .with_trajectory("a", vec![[0.0; 3]; n])
            .and_then(|s| s.with_trajectory("b", vec![[0.0, 0.0, -1.0]; n]))
            .and_then(|s| s.with_trajectory("t", t))
            .expect("valid");
        let h = Hierarchy::from_nodes(&[]).expect("empty");
        let bones = [BoneDef::new("first", "a", "t"), BoneDef::new("second", "b", "t")];

        let report = reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        assert_eq!(report.shared_tails, vec!["t".to_string()]);
        assert_eq!(report.bone("first").expect("first").n_corrected, 1);
        assert_eq!(report.bone("second").expect("second").n_corrected, 1);

        // Second bone: median 2.0, superior 2.2 from b at z = -1.
        let t2: Point3 = store.get("t").expect("t")[2];
        assert_abs_diff_eq!(t2[2], 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(distance(&[0.0; 3], &t2), 1.2, epsilon = 1e-12);
    }

    #[test]
    fn head_correction_carries_over_to_child_bone() {
        // a → b → c chain, frame 1 has both bones stretched.
        let n = 5;
        let mut b = vec![[0.0, 0.0, 1.0]; n];
        let mut c = vec![[0.0, 0.0, 2.0]; n];
        b[1] = [0.0, 0.0, 2.0];
        c[1] = [0.0, 0.0, 4.0];
        let mut store = MemoryStore::new(0, n)
            .with_trajectory("a", vec![[0.0; 3]; n])
            .and_then(|s| s.with_trajectory("b", b))
            .and_then(|s| s.with_trajectory("c", c))
            .expect("valid");
        let h = Hierarchy::from_nodes(&[
            HierarchyNode::new("a", &["b"]),
            HierarchyNode::new("b", &["c"]),
        ])
        .expect("valid");
        let bones = [BoneDef::new("ab", "a", "b"), BoneDef::new("bc", "b", "c")];

        reduce_dispersion(&mut store, &h, &bones, &median_config(0.1)).expect("pass");
        let b1 = store.get("b").expect("b")[1];
        let c1 = store.get("c").expect("c")[1];
        assert_abs_diff_eq!(b1[2], 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(c1[2] - b1[2], 1.1, epsilon = 1e-12);
    }
}
