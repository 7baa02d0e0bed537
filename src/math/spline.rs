//! Natural cubic spline coefficients.
//!
//! For knots `x_0 < .. < x_{n-1}` the second derivatives `M_i` satisfy, for
//! every interior knot:
//!
//! ```text
//! h_{i-1} M_{i-1} + 2 (h_{i-1} + h_i) M_i + h_i M_{i+1}
//!     = 6 ((y_{i+1} - y_i) / h_i - (y_i - y_{i-1}) / h_{i-1})
//! ```
//!
//! with `M_0 = M_{n-1} = 0`. The system is tiny (one row per knot), so we
//! solve it densely.

use nalgebra::{DMatrix, DVector};

/// Second derivatives at each knot, or `None` if the knots are not strictly
/// increasing or the system cannot be solved.
pub fn natural_second_derivatives(xs: &[f64], ys: &[f64]) -> Option<Vec<f64>> {
    let n = xs.len();
    if n != ys.len() || n < 2 {
        return None;
    }
    if xs.windows(2).any(|w| !(w[1] > w[0])) {
        return None;
    }
    if n == 2 {
        return Some(vec![0.0, 0.0]);
    }

    let inner = n - 2;
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let mut a = DMatrix::<f64>::zeros(inner, inner);
    let mut rhs = DVector::<f64>::zeros(inner);

    for row in 0..inner {
        let i = row + 1;
        a[(row, row)] = 2.0 * (h[i - 1] + h[i]);
        if row > 0 {
            a[(row, row - 1)] = h[i - 1];
        }
        if row + 1 < inner {
            a[(row, row + 1)] = h[i];
        }
        rhs[row] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
    }

    let solved = a.lu().solve(&rhs)?;
    if !solved.iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut m = Vec::with_capacity(n);
    m.push(0.0);
    m.extend(solved.iter().copied());
    m.push(0.0);
    Some(m)
}

/// Evaluate the spline on segment `i` (`x_i <= x <= x_{i+1}`).
pub fn eval_segment(xs: &[f64], ys: &[f64], m: &[f64], i: usize, x: f64) -> f64 {
    let h = xs[i + 1] - xs[i];
    let a = xs[i + 1] - x;
    let b = x - xs[i];
    m[i] * a.powi(3) / (6.0 * h)
        + m[i + 1] * b.powi(3) / (6.0 * h)
        + (ys[i] / h - m[i] * h / 6.0) * a
        + (ys[i + 1] / h - m[i + 1] * h / 6.0) * b
}

/// First derivative of segment `i` at its left (`at_end = false`) or right end.
pub fn segment_slope(xs: &[f64], ys: &[f64], m: &[f64], i: usize, at_end: bool) -> f64 {
    let h = xs[i + 1] - xs[i];
    let dy = (ys[i + 1] - ys[i]) / h;
    if at_end {
        dy + h * (m[i] / 6.0 + m[i + 1] / 3.0)
    } else {
        dy - h * (m[i] / 3.0 + m[i + 1] / 6.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_data_has_zero_curvature() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 5.0, 7.0];
        let m = natural_second_derivatives(&xs, &ys).unwrap();
        assert!(m.iter().all(|v| v.abs() < 1e-12));
        assert!((eval_segment(&xs, &ys, &m, 1, 1.5) - 4.0).abs() < 1e-12);
        assert!((segment_slope(&xs, &ys, &m, 2, true) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn spline_interpolates_knots() {
        let xs = [0.0, 0.5, 1.5, 2.0];
        let ys = [1.0, 0.2, 0.9, 1.4];
        let m = natural_second_derivatives(&xs, &ys).unwrap();
        for i in 0..xs.len() - 1 {
            assert!((eval_segment(&xs, &ys, &m, i, xs[i]) - ys[i]).abs() < 1e-12);
            assert!((eval_segment(&xs, &ys, &m, i, xs[i + 1]) - ys[i + 1]).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_unsorted_knots() {
        assert!(natural_second_derivatives(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(natural_second_derivatives(&[0.0], &[1.0]).is_none());
    }
}
