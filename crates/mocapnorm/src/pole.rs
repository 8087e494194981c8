//! Pole-target positions for two-segment chains.
//!
//! For a chain `base → pole → target` (hip → knee → ankle) the pole target is
//! placed along the bisector of the two segment directions at the pole, at a
//! distance equal to the chain length. When the chain is nearly straight the
//! bisector degenerates; inside that band the direction is blended toward an
//! auxiliary direction taken from two extra markers and made perpendicular
//! to the upper segment.

use nalgebra::Vector3;

use crate::attenuation::QuadraticCurve;
use crate::error::PassError;
use crate::math::{point3, unit_or_zero, vec3, EPS_NORM};
use crate::store::{is_defined, Point3, TrajectoryStore, UNDEFINED};

/// One pole chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoleTargetSpec {
    pub name: String,
    pub base: String,
    pub pole: String,
    pub target: String,
    /// `aux[0] - aux[1]` gives the fallback direction near the singularity.
    pub aux: [String; 2],
    /// Blending starts once `u·w < -threshold`; must lie in `(0, 1)`.
    pub threshold: f64,
    /// Output trajectory name; defaults to `<pole>_pole_target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PoleTargetSpec {
    pub fn output_name(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| format!("{}_pole_target", self.pole))
    }

    fn marker_names(&self) -> [&str; 5] {
        [&self.base, &self.pole, &self.target, &self.aux[0], &self.aux[1]]
    }
}

/// Which direction formula produced a pole position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoleBranch {
    /// Plain bisector (`dot >= -threshold`).
    Primary,
    /// Bisector blended with the auxiliary direction.
    Blended,
    /// Auxiliary direction unusable; bisector kept.
    PrimaryFallback,
}

/// Singularity blend weight as a function of `|u·w|`.
///
/// Quadratic through `(τ, 0)`, `((τ+1)/2, 0.25)` and `(1, 1)`, clamped to
/// `[0, 1]`; zero for `|dot| <= τ`.
pub fn transition_weight(abs_dot: f64, threshold: f64) -> f64 {
    if abs_dot <= threshold {
        return 0.0;
    }
    let curve = QuadraticCurve::through([
        [threshold, 0.0],
        [0.5 * (threshold + 1.0), 0.25],
        [1.0, 1.0],
    ]);
    match curve {
        Some(q) => q.eval(abs_dot).clamp(0.0, 1.0),
        None => 1.0,
    }
}

/// Pole target for one frame.
///
/// Returns `None` if any input is undefined or no usable direction exists.
pub fn pole_position(
    base: &Point3,
    pole: &Point3,
    target: &Point3,
    aux: [&Point3; 2],
    threshold: f64,
) -> Option<(Point3, PoleBranch)> {
    if ![base, pole, target, aux[0], aux[1]]
        .iter()
        .all(|p| is_defined(p))
    {
        return None;
    }
    let (b, p, t) = (vec3(base), vec3(pole), vec3(target));
    let to_base = p - b;
    let to_target = p - t;
    let reach = to_base.norm() + to_target.norm();

    let u = unit_or_zero(&to_base);
    let w = unit_or_zero(&to_target);
    let primary = unit_or_zero(&(u + w));
    let dot = u.dot(&w);

    let (direction, branch) = if dot >= -threshold {
        (primary, PoleBranch::Primary)
    } else {
        match perpendicular_aux(&vec3(aux[0]), &vec3(aux[1]), &u) {
            Some(aux_dir) => {
                let weight = transition_weight(dot.abs(), threshold);
                let blended = unit_or_zero(&(primary * (1.0 - weight) + aux_dir * weight));
                (blended, PoleBranch::Blended)
            }
            None => (primary, PoleBranch::PrimaryFallback),
        }
    };

    if direction.norm() <= EPS_NORM {
        return None;
    }
    let out = p + direction * reach;
    out.iter().all(|c| c.is_finite()).then(|| (point3(&out), branch))
}

/// Unit `aux0 - aux1` with its component along `u` removed.
fn perpendicular_aux(
    aux0: &Vector3<f64>,
    aux1: &Vector3<f64>,
    u: &Vector3<f64>,
) -> Option<Vector3<f64>> {
    let a = unit_or_zero(&(aux0 - aux1));
    let perp = unit_or_zero(&(a - u * a.dot(u)));
    (perp.norm() > EPS_NORM).then_some(perp)
}

/// Per-chain outcome counts.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoleChainSummary {
    pub name: String,
    pub output: String,
    pub n_primary: usize,
    pub n_blended: usize,
    pub n_fallback: usize,
    pub n_undefined: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoleReport {
    pub chains: Vec<PoleChainSummary>,
}

/// Pole trajectory for one chain without writing it.
pub fn compute_pole_trajectory(
    store: &dyn TrajectoryStore,
    spec: &PoleTargetSpec,
) -> Result<(Vec<Point3>, PoleChainSummary), PassError> {
    let mut tracks = Vec::with_capacity(5);
    for name in spec.marker_names() {
        let t = store
            .trajectory(name)
            .ok_or_else(|| PassError::MissingTrajectory(name.to_string()))?;
        tracks.push(t);
    }

    let mut summary = PoleChainSummary {
        name: spec.name.clone(),
        output: spec.output_name(),
        ..Default::default()
    };
    let out = (0..store.frame_count())
        .map(|f| {
            let res = pole_position(
                &tracks[0][f],
                &tracks[1][f],
                &tracks[2][f],
                [&tracks[3][f], &tracks[4][f]],
                spec.threshold,
            );
            match res {
                Some((p, branch)) => {
                    match branch {
                        PoleBranch::Primary => summary.n_primary += 1,
                        PoleBranch::Blended => summary.n_blended += 1,
                        PoleBranch::PrimaryFallback => summary.n_fallback += 1,
                    }
                    p
                }
                None => {
                    summary.n_undefined += 1;
                    UNDEFINED
                }
            }
        })
        .collect();
    Ok((out, summary))
}

/// Compute and store the pole trajectory of every chain.
///
/// A chain with missing markers is reported and skipped; the others still run.
pub fn apply_pole_targets(
    store: &mut dyn TrajectoryStore,
    specs: &[PoleTargetSpec],
) -> Result<PoleReport, PassError> {
    let mut report = PoleReport::default();
    for spec in specs {
        match compute_pole_trajectory(store, spec) {
            Ok((points, summary)) => {
                store.set_trajectory(&summary.output, points)?;
                if summary.n_undefined > 0 {
                    tracing::warn!(
                        chain = %spec.name,
                        n_undefined = summary.n_undefined,
                        "pole target undefined on some frames"
                    );
                }
                tracing::debug!(
                    chain = %spec.name,
                    n_primary = summary.n_primary,
                    n_blended = summary.n_blended,
                    n_fallback = summary.n_fallback,
                    "pole chain done"
                );
                report.chains.push(summary);
            }
            Err(e) => {
                tracing::warn!("pole chain '{}' skipped: {}", spec.name, e);
                report.chains.push(PoleChainSummary {
                    name: spec.name.clone(),
                    output: spec.output_name(),
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        }
    }
    tracing::info!("{} pole chains processed", report.chains.len());
    Ok(report)
}
