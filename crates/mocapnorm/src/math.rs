use nalgebra::Vector3;

use crate::store::Point3;

/// Norms below this are treated as zero when normalizing.
pub(crate) const EPS_NORM: f64 = 1e-12;

#[inline]
pub(crate) fn vec3(p: &Point3) -> Vector3<f64> {
    Vector3::new(p[0], p[1], p[2])
}

#[inline]
pub(crate) fn point3(v: &Vector3<f64>) -> Point3 {
    [v[0], v[1], v[2]]
}

/// Unit vector along `v`, or the zero vector when `v` is (near) zero.
#[inline]
pub(crate) fn unit_or_zero(v: &Vector3<f64>) -> Vector3<f64> {
    let n = v.norm();
    if n.is_finite() && n > EPS_NORM {
        v / n
    } else {
        Vector3::zeros()
    }
}

#[inline]
pub(crate) fn distance(a: &Point3, b: &Point3) -> f64 {
    (vec3(b) - vec3(a)).norm()
}

/// Median of the finite entries of `values`; NaN when there are none.
///
/// Even counts use the midpoint of the two central values.
pub(crate) fn finite_median(values: &[f64]) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        v[mid]
    } else {
        0.5 * (v[mid - 1] + v[mid])
    }
}

/// Population standard deviation of the finite entries; NaN when there are none.
pub(crate) fn finite_stdev(values: &[f64]) -> f64 {
    let mut n = 0usize;
    let mut sum = 0.0;
    for &x in values.iter().filter(|x| x.is_finite()) {
        n += 1;
        sum += x;
    }
    if n == 0 {
        return f64::NAN;
    }
    let mean = sum / n as f64;
    let var = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| (x - mean) * (x - mean))
        .sum::<f64>()
        / n as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn median_ignores_nan_and_averages_even_counts() {
        assert_abs_diff_eq!(finite_median(&[3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_abs_diff_eq!(finite_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(finite_median(&[f64::NAN, f64::NAN]).is_nan());
        assert!(finite_median(&[]).is_nan());
    }

    #[test]
    fn stdev_is_population_stdev() {
        assert_abs_diff_eq!(
            finite_stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]),
            2.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(finite_stdev(&[1.0, f64::NAN, 1.0]), 0.0);
        assert!(finite_stdev(&[f64::NAN]).is_nan());
    }

    #[test]
    fn unit_or_zero_handles_zero_vector() {
        assert_eq!(unit_or_zero(&Vector3::zeros()), Vector3::zeros());
        let u = unit_or_zero(&Vector3::new(0.0, 3.0, 4.0));
        assert_abs_diff_eq!(u.norm(), 1.0, epsilon = 1e-12);
    }
}
