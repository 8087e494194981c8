//! Quadratic curves through three control points.
//!
//! Used for the smooth height blend at the edges of a contact-lock window
//! and for the singularity blend weight of the pole calculator.

use nalgebra::{Matrix3, Vector3};

/// `y = a·x² + b·x + c`
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuadraticCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl QuadraticCurve {
    /// The unique parabola passing exactly through three `[x, y]` points.
    ///
    /// Returns `None` if two control points share an x value.
    pub fn through(points: [[f64; 2]; 3]) -> Option<Self> {
        let [p0, p1, p2] = points;
        let xs = [p0[0], p1[0], p2[0]];
        let min_gap = (xs[0] - xs[1])
            .abs()
            .min((xs[0] - xs[2]).abs())
            .min((xs[1] - xs[2]).abs());
        let scale = xs.iter().fold(1.0f64, |m, x| m.max(x.abs()));
        if !min_gap.is_finite() || min_gap <= 1e-12 * scale {
            return None;
        }

        #[rustfmt::skip]
        let m = Matrix3::new(
            xs[0] * xs[0], xs[0], 1.0,
            xs[1] * xs[1], xs[1], 1.0,
            xs[2] * xs[2], xs[2], 1.0,
        );
        let rhs = Vector3::new(p0[1], p1[1], p2[1]);
        let coef = m.lu().solve(&rhs)?;
        if !coef.iter().all(|c| c.is_finite()) {
            return None;
        }
        Some(Self {
            a: coef[0],
            b: coef[1],
            c: coef[2],
        })
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }
}

/// Heights for `count` consecutive frames blending from `from` to `to`.
///
/// With three or more frames the curve passes through `(0, from)`,
/// `(count/2, mid)` and `(count-1, to)`. Shorter runs fall back to a linear
/// ramp ending at `to`.
pub fn attenuation_profile(count: usize, from: f64, mid: f64, to: f64) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![to],
        2 => vec![from, to],
        _ => {
            let last = (count - 1) as f64;
            let curve = QuadraticCurve::through([[0.0, from], [count as f64 / 2.0, mid], [last, to]]);
            match curve {
                Some(q) => (0..count).map(|i| q.eval(i as f64)).collect(),
                None => (0..count)
                    .map(|i| from + (to - from) * i as f64 / last)
                    .collect(),
            }
        }
    }
}

/// Blend value three quarters of the way from `from` to `to`.
#[inline]
pub fn three_quarter_blend(from: f64, to: f64) -> f64 {
    from + 0.75 * (to - from)
}
