//! Ankle height re-solve.
//!
//! With x and y of the ankle fixed, find the height `z` that best restores
//! the two foot bone lengths:
//!
//! ```text
//! min_z  (|a(z) - b0|² - d0²)² + (|a(z) - b1|² - d1²)²
//! ```
//!
//! The control logic only sees [`HeightMinimizer`], so any scalar minimiser
//! can be plugged in.

use std::collections::HashMap;

use crate::store::Point3;

use super::HeightSolver;

/// Two-distance height problem for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnkleHeightProblem {
    /// Fixed horizontal ankle position.
    pub xy: [f64; 2],
    /// Base markers (heel, foot index).
    pub bases: [Point3; 2],
    /// Target distances ankle→base.
    pub distances: [f64; 2],
}

impl AnkleHeightProblem {
    /// `|a(z) - b_i|² - d_i²` for both bases.
    pub fn residuals(&self, z: f64) -> [f64; 2] {
        let r = |i: usize| {
            let b = &self.bases[i];
            let dx = self.xy[0] - b[0];
            let dy = self.xy[1] - b[1];
            let dz = z - b[2];
            dx * dx + dy * dy + dz * dz - self.distances[i] * self.distances[i]
        };
        [r(0), r(1)]
    }

    /// Scalar objective (sum of squared residuals).
    pub fn objective(&self, z: f64) -> f64 {
        let [r0, r1] = self.residuals(z);
        r0 * r0 + r1 * r1
    }

    /// Height of the higher base marker.
    pub fn base_top(&self) -> f64 {
        self.bases[0][2].max(self.bases[1][2])
    }

    /// Current height, raised to `base_top + margin` if it is not above it.
    pub fn initial_guess(&self, current_z: f64, margin: f64) -> f64 {
        let floor = self.base_top() + margin;
        if current_z.is_finite() && current_z > floor {
            current_z
        } else {
            floor
        }
    }

    fn is_well_posed(&self) -> bool {
        self.xy.iter().all(|v| v.is_finite())
            && self.bases.iter().flatten().all(|v| v.is_finite())
            && self.distances.iter().all(|d| d.is_finite() && *d > 0.0)
    }
}

/// Scalar minimiser used for the ankle height.
///
/// `None` means the minimiser did not converge; callers keep the old height.
pub trait HeightMinimizer {
    fn minimize(&self, problem: &AnkleHeightProblem, z0: f64) -> Option<f64>;
}

impl HeightSolver {
    pub fn minimizer(self, max_iters: usize) -> Box<dyn HeightMinimizer> {
        match self {
            Self::GaussNewton => Box::new(GaussNewton { max_iters }),
            Self::Lm => Box::new(LevenbergMarquardt { max_iters }),
            Self::GoldenSection => Box::new(GoldenSection {
                max_evals: max_iters.max(8),
            }),
        }
    }
}

/// Damped Gauss–Newton on the two residuals with step halving.
#[derive(Debug, Clone, Copy)]
pub struct GaussNewton {
    pub max_iters: usize,
}

impl HeightMinimizer for GaussNewton {
    fn minimize(&self, problem: &AnkleHeightProblem, z0: f64) -> Option<f64> {
        if !problem.is_well_posed() || !z0.is_finite() {
            return None;
        }
        let mut z = z0;
        let mut f = problem.objective(z);

        for _ in 0..self.max_iters.clamp(1, 500) {
            let r = problem.residuals(z);
            // d r_i / dz = 2 (z - b_i.z)
            let j = [
                2.0 * (z - problem.bases[0][2]),
                2.0 * (z - problem.bases[1][2]),
            ];
            let jtj = j[0] * j[0] + j[1] * j[1];
            let jtr = j[0] * r[0] + j[1] * r[1];
            if jtj <= 1e-18 {
                return None;
            }
            let step = -jtr / (jtj + 1e-12);

            let mut alpha = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let z_try = z + alpha * step;
                let f_try = problem.objective(z_try);
                if f_try.is_finite() && f_try <= f {
                    z = z_try;
                    f = f_try;
                    accepted = true;
                    break;
                }
                alpha *= 0.5;
            }

            if !accepted || (alpha * step).abs() < 1e-12 {
                return z.is_finite().then_some(z);
            }
        }
        None
    }
}

/// Levenberg–Marquardt via `tiny_solver`, confirmed by a Gauss–Newton
/// polish from its result.
#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardt {
    pub max_iters: usize,
}

impl HeightMinimizer for LevenbergMarquardt {
    fn minimize(&self, problem: &AnkleHeightProblem, z0: f64) -> Option<f64> {
        if !problem.is_well_posed() || !z0.is_finite() {
            return None;
        }

        use tiny_solver::factors::na as ts_na;
        use tiny_solver::Optimizer;

        #[derive(Debug, Clone)]
        struct DistanceFactor {
            horizontal_sq: f64,
            base_z: f64,
            distance: f64,
        }

        impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for DistanceFactor {
            fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
                let z = params[0][0].clone();
                let dz = z - T::from_f64(self.base_z).unwrap();
                let r = T::from_f64(self.horizontal_sq).unwrap() + dz.clone() * dz
                    - T::from_f64(self.distance * self.distance).unwrap();
                ts_na::DVector::<T>::from_vec(vec![r])
            }
        }

        let mut lm_problem = tiny_solver::Problem::new();
        for (base, &distance) in problem.bases.iter().zip(&problem.distances) {
            let dx = problem.xy[0] - base[0];
            let dy = problem.xy[1] - base[1];
            lm_problem.add_residual_block(
                1,
                &["z"],
                Box::new(DistanceFactor {
                    horizontal_sq: dx * dx + dy * dy,
                    base_z: base[2],
                    distance,
                }),
                None,
            );
        }

        let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
        initial_values.insert("z".to_string(), ts_na::DVector::<f64>::from_vec(vec![z0]));

        // Residuals are in m², so stop thresholds are scaled down to match.
        let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
        let options = tiny_solver::OptimizerOptions {
            max_iteration: self.max_iters.clamp(1, 500),
            verbosity_level: 0,
            min_abs_error_decrease_threshold: 1e-24,
            min_rel_error_decrease_threshold: 1e-12,
            min_error_threshold: 1e-28,
            ..Default::default()
        };
        let result = optimizer.optimize(&lm_problem, &initial_values, Some(options))?;
        let z = result.get("z")?;
        if z.len() != 1 || !z[0].is_finite() {
            return None;
        }

        // Only a stationary point counts as converged.
        GaussNewton {
            max_iters: self.max_iters,
        }
        .minimize(problem, z[0])
    }
}

/// Gradient-free golden-section search above the base markers.
///
/// The bracket is `[base_top, z0 + 2·max(d0, d1)]`, which excludes the
/// mirrored solution below the feet.
#[derive(Debug, Clone, Copy)]
pub struct GoldenSection {
    pub max_evals: usize,
}

impl HeightMinimizer for GoldenSection {
    fn minimize(&self, problem: &AnkleHeightProblem, z0: f64) -> Option<f64> {
        if !problem.is_well_posed() || !z0.is_finite() {
            return None;
        }
        let lo = problem.base_top();
        let reach = problem.distances[0].max(problem.distances[1]);
        let hi = z0.max(lo) + 2.0 * reach;
        if !(hi > lo) {
            return None;
        }
        let (z, _) = golden_section_minimize(|z| problem.objective(z), lo, hi, self.max_evals);
        z.is_finite().then_some(z)
    }
}

/// Golden-section search for the minimum of `f` on `[a, b]`.
///
/// Returns `(x_min, f_min)`.
fn golden_section_minimize(
    f: impl Fn(f64) -> f64,
    mut a: f64,
    mut b: f64,
    max_evals: usize,
) -> (f64, f64) {
    const PHI: f64 = 1.618_033_988_749_895;
    const RESP: f64 = 2.0 - PHI;

    let mut x1 = a + RESP * (b - a);
    let mut x2 = b - RESP * (b - a);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    let mut evals = 2;

    while evals < max_evals && (b - a).abs() > 1e-12 {
        if f1 < f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = a + RESP * (b - a);
            f1 = f(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = b - RESP * (b - a);
            f2 = f(x2);
        }
        evals += 1;
    }

    if f1 < f2 {
        (x1, f1)
    } else {
        (x2, f2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::distance;
    use approx::assert_abs_diff_eq;

    fn synthetic(ankle: Point3) -> AnkleHeightProblem {
        let heel = [-0.05, 0.01, 0.0];
        let toe = [0.15, -0.02, 0.01];
        AnkleHeightProblem {
            xy: [ankle[0], ankle[1]],
            bases: [heel, toe],
            distances: [distance(&ankle, &heel), distance(&ankle, &toe)],
        }
    }

    #[test]
    fn objective_vanishes_at_ground_truth() {
        let p = synthetic([0.0, 0.0, 0.08]);
        assert_abs_diff_eq!(p.objective(0.08), 0.0, epsilon = 1e-18);
        assert!(p.objective(0.12) > 0.0);
    }

    #[test]
    fn initial_guess_is_raised_above_bases() {
        let p = synthetic([0.0, 0.0, 0.08]);
        assert_abs_diff_eq!(p.initial_guess(0.0, 0.01), 0.02);
        assert_abs_diff_eq!(p.initial_guess(0.3, 0.01), 0.3);
        assert_abs_diff_eq!(p.initial_guess(f64::NAN, 0.01), 0.02);
    }

    #[test]
    fn gauss_newton_recovers_height() {
        let p = synthetic([0.0, 0.0, 0.08]);
        for z0 in [0.02, 0.2, 0.5] {
            let z = GaussNewton { max_iters: 100 }
                .minimize(&p, z0)
                .expect("converged");
            assert_abs_diff_eq!(z, 0.08, epsilon = 1e-4);
        }
    }

    #[test]
    fn golden_section_recovers_height() {
        let p = synthetic([0.02, 0.01, 0.095]);
        let z = GoldenSection { max_evals: 200 }
            .minimize(&p, 0.2)
            .expect("converged");
        assert_abs_diff_eq!(z, 0.095, epsilon = 1e-4);
    }

    #[test]
    fn levenberg_marquardt_recovers_height() {
        let p = synthetic([0.0, 0.0, 0.08]);
        for z0 in [0.02, 0.2, 0.5] {
            let z = LevenbergMarquardt { max_iters: 100 }
                .minimize(&p, z0)
                .expect("converged");
            assert_abs_diff_eq!(z, 0.08, epsilon = 1e-4);
        }
    }

    #[test]
    fn levenberg_marquardt_budget_exhaustion_is_non_convergence() {
        let p = synthetic([0.0, 0.0, 0.08]);
        assert!(LevenbergMarquardt { max_iters: 1 }.minimize(&p, 5.0).is_none());
    }

    #[test]
    fn ill_posed_problem_is_rejected() {
        let mut p = synthetic([0.0, 0.0, 0.08]);
        p.distances[0] = f64::NAN;
        assert!(GaussNewton { max_iters: 10 }.minimize(&p, 0.1).is_none());
        assert!(GoldenSection { max_evals: 10 }.minimize(&p, 0.1).is_none());
    }

    #[test]
    fn iteration_budget_exhaustion_is_non_convergence() {
        let p = synthetic([0.0, 0.0, 0.08]);
        assert!(GaussNewton { max_iters: 1 }.minimize(&p, 5.0).is_none());
    }
}
