//! Virtual-bone length statistics.
//!
//! A virtual bone is a named `(head, tail)` marker pair. Its statistic is a
//! pure function of the current trajectories: per-frame Euclidean lengths
//! plus the median and population standard deviation of the defined ones.
//! Statistics are never cached; recompute them after every mutating pass.

use crate::error::PassError;
use crate::math::{distance, finite_median, finite_stdev};
use crate::store::{is_defined, Point3, TrajectoryStore};

/// Named `(head, tail)` marker pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoneDef {
    pub name: String,
    pub head: String,
    pub tail: String,
    /// Anthropometric length as a fraction of subject height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_length: Option<f64>,
}

impl BoneDef {
    pub fn new(name: &str, head: &str, tail: &str) -> Self {
        Self {
            name: name.to_string(),
            head: head.to_string(),
            tail: tail.to_string(),
            reference_length: None,
        }
    }

    pub fn with_reference_length(mut self, fraction_of_height: f64) -> Self {
        self.reference_length = Some(fraction_of_height);
        self
    }
}

/// Per-bone length statistic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoneStatistic {
    pub name: String,
    /// One entry per frame; NaN where head or tail is undefined.
    pub lengths: Vec<f64>,
    /// NaN when no frame is defined.
    pub median: f64,
    /// Population standard deviation; NaN when no frame is defined.
    pub stdev: f64,
    pub n_valid: usize,
}

impl BoneStatistic {
    pub fn from_lengths(name: &str, lengths: Vec<f64>) -> Self {
        let n_valid = lengths.iter().filter(|l| l.is_finite()).count();
        Self {
            name: name.to_string(),
            median: finite_median(&lengths),
            stdev: finite_stdev(&lengths),
            lengths,
            n_valid,
        }
    }

    /// Coefficient of variation (`stdev / median`); NaN if undefined.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.median.is_finite() && self.median.abs() > 0.0 {
            self.stdev / self.median
        } else {
            f64::NAN
        }
    }
}

/// Per-frame head-to-tail distances; NaN where either sample is undefined.
pub fn bone_lengths(head: &[Point3], tail: &[Point3]) -> Vec<f64> {
    head.iter()
        .zip(tail)
        .map(|(h, t)| {
            if is_defined(h) && is_defined(t) {
                distance(h, t)
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Statistic for one bone from the current store state.
pub fn bone_statistic(
    store: &dyn TrajectoryStore,
    bone: &BoneDef,
) -> Result<BoneStatistic, PassError> {
    let head = store
        .trajectory(&bone.head)
        .ok_or_else(|| PassError::MissingTrajectory(bone.head.clone()))?;
    let tail = store
        .trajectory(&bone.tail)
        .ok_or_else(|| PassError::MissingTrajectory(bone.tail.clone()))?;
    Ok(BoneStatistic::from_lengths(
        &bone.name,
        bone_lengths(&head, &tail),
    ))
}

/// Statistics for every bone, in declaration order. A missing trajectory
/// fails only the bone that references it.
pub fn compute_bone_stats(
    store: &dyn TrajectoryStore,
    bones: &[BoneDef],
) -> Vec<Result<BoneStatistic, PassError>> {
    bones.iter().map(|b| bone_statistic(store, b)).collect()
}

/// One diagnostic row, in display units.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatsRow {
    pub bone: String,
    pub median: f64,
    pub stdev: f64,
    pub cv_percent: f64,
}

/// Side-effect-free projection of bone statistics for reporting.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatsTable {
    /// Multiplier from scene units to display units (100 for m → cm).
    pub display_scale: f64,
    pub rows: Vec<StatsRow>,
}

impl StatsTable {
    pub fn from_stats<'a>(
        stats: impl IntoIterator<Item = &'a BoneStatistic>,
        display_scale: f64,
    ) -> Self {
        let rows = stats
            .into_iter()
            .map(|s| StatsRow {
                bone: s.name.clone(),
                median: s.median * display_scale,
                stdev: s.stdev * display_scale,
                cv_percent: s.coefficient_of_variation() * 100.0,
            })
            .collect();
        Self {
            display_scale,
            rows,
        }
    }

    /// Table over the bones whose statistics could be computed.
    pub fn from_results(
        results: &[Result<BoneStatistic, PassError>],
        display_scale: f64,
    ) -> Self {
        Self::from_stats(results.iter().filter_map(|r| r.as_ref().ok()), display_scale)
    }

    pub fn row(&self, bone: &str) -> Option<&StatsRow> {
        self.rows.iter().find(|r| r.bone == bone)
    }
}

impl std::fmt::Display for StatsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|r| r.bone.len())
            .max()
            .unwrap_or(0)
            .max(4);
        writeln!(
            f,
            "{:<width$}  {:>10}  {:>10}  {:>8}",
            "bone",
            "median",
            "stdev",
            "cv %",
            width = width
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:<width$}  {:>10.3}  {:>10.3}  {:>8.2}",
                r.bone,
                r.median,
                r.stdev,
                r.cv_percent,
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UNDEFINED};
    use approx::assert_abs_diff_eq;

    fn store_with(head: Vec<Point3>, tail: Vec<Point3>) -> MemoryStore {
        let n = head.len();
        MemoryStore::new(0, n)
            .with_trajectory("h", head)
            .and_then(|s| s.with_trajectory("t", tail))
            .expect("valid")
    }

    #[test]
    fn undefined_frames_are_excluded() {
        let store = store_with(
            vec![[0.0; 3], [0.0; 3], UNDEFINED, [0.0; 3]],
            vec![[0.0, 0.0, 1.0], [0.0, 0.0, 3.0], [0.0, 0.0, 1.0], [0.0, 0.0, 2.0]],
        );
        let stat = bone_statistic(&store, &BoneDef::new("b", "h", "t")).expect("stat");
        assert_eq!(stat.n_valid, 3);
        assert!(stat.lengths[2].is_nan());
        assert_abs_diff_eq!(stat.median, 2.0);
        assert_abs_diff_eq!(stat.stdev, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn all_undefined_yields_nan_not_error() {
        let store = store_with(vec![UNDEFINED; 3], vec![[0.0; 3]; 3]);
        let stat = bone_statistic(&store, &BoneDef::new("b", "h", "t")).expect("stat");
        assert_eq!(stat.n_valid, 0);
        assert!(stat.median.is_nan());
        assert!(stat.stdev.is_nan());
        assert!(stat.coefficient_of_variation().is_nan());
    }

    #[test]
    fn missing_trajectory_fails_only_that_bone() {
        let store = store_with(vec![[0.0; 3]; 2], vec![[1.0, 0.0, 0.0]; 2]);
        let results = compute_bone_stats(
            &store,
            &[BoneDef::new("ok", "h", "t"), BoneDef::new("bad", "h", "nope")],
        );
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().expect_err("missing"),
            &PassError::MissingTrajectory("nope".to_string())
        );

        let table = StatsTable::from_results(&results, 100.0);
        assert_eq!(table.rows.len(), 1);
        let row = table.row("ok").expect("row");
        assert_abs_diff_eq!(row.median, 100.0);
        assert_abs_diff_eq!(row.cv_percent, 0.0);
        assert!(table.to_string().contains("ok"));
    }
}
