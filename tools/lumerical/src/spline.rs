//! Cubic spline interpolation with not-a-knot end conditions.

use crate::error::{Error, Result};

/// An interpolating cubic spline through `(x, y)` samples.
///
/// With four or more samples the third derivative is continuous across the
/// second and second-to-last knots. Three samples give the interpolating
/// parabola and two give a straight line.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivative at each knot.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn not_a_knot(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(Error::Design(format!(
                "spline needs as many x as y values, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(Error::Design("spline needs at least two points".to_string()));
        }
        if xs.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::Design("spline x values must be strictly increasing".to_string()));
        }

        let n = xs.len();
        let m = match n {
            2 => vec![0.; 2],
            3 => {
                let d01 = (ys[1] - ys[0]) / (xs[1] - xs[0]);
                let d12 = (ys[2] - ys[1]) / (xs[2] - xs[1]);
                vec![2. * (d12 - d01) / (xs[2] - xs[0]); 3]
            }
            _ => second_derivatives(xs, ys)?,
        };
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    /// Evaluates the spline. Points outside the knots extrapolate the end
    /// pieces.
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let i = match self.xs.partition_point(|&k| k <= x) {
            0 => 0,
            p => (p - 1).min(n - 2),
        };
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let (m0, m1) = (self.m[i], self.m[i + 1]);
        let h = x1 - x0;
        let (a, b) = (x1 - x, x - x0);
        m0 * a.powi(3) / (6. * h)
            + m1 * b.powi(3) / (6. * h)
            + (y0 / h - m0 * h / 6.) * a
            + (y1 / h - m1 * h / 6.) * b
    }

    pub fn eval_all(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }
}

fn second_derivatives(xs: &[f64], ys: &[f64]) -> Result<Vec<f64>> {
    let n = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let mut a = vec![vec![0.; n]; n];
    let mut rhs = vec![0.; n];

    a[0][0] = h[1];
    a[0][1] = -(h[0] + h[1]);
    a[0][2] = h[0];
    for i in 1..n - 1 {
        a[i][i - 1] = h[i - 1];
        a[i][i] = 2. * (h[i - 1] + h[i]);
        a[i][i + 1] = h[i];
        rhs[i] = 6. * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
    }
    a[n - 1][n - 3] = h[n - 2];
    a[n - 1][n - 2] = -(h[n - 3] + h[n - 2]);
    a[n - 1][n - 1] = h[n - 3];

    solve(a, rhs)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col] == 0. {
            return Err(Error::Design("spline system is singular".to_string()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            if f == 0. {
                continue;
            }
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.; n];
    for row in (0..n).rev() {
        let s: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - s) / a[row][row];
    }
    Ok(x)
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + i as f64 * step })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn reproduces_cubics() -> anyhow::Result<()> {
        let f = |x: f64| x.powi(3) - 2. * x + 1.;
        let xs = [0., 0.5, 1.5, 2., 3.5, 5.];
        let ys: Vec<f64> = xs.iter().map(|&x| f(x)).collect();
        let spline = CubicSpline::not_a_knot(&xs, &ys)?;
        for x in linspace(0., 5., 41) {
            assert_abs_diff_eq!(spline.eval(x), f(x), epsilon = 1e-9);
        }
        assert_abs_diff_eq!(spline.eval(6.), f(6.), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn three_points_give_a_parabola() -> anyhow::Result<()> {
        let spline = CubicSpline::not_a_knot(&[0., 1., 3.], &[1., 2., 10.])?;
        // y = x^2 + 1
        assert_abs_diff_eq!(spline.eval(2.), 5., epsilon = 1e-12);
        assert_abs_diff_eq!(spline.eval(0.5), 1.25, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn two_points_give_a_line() -> anyhow::Result<()> {
        let spline = CubicSpline::not_a_knot(&[1., 3.], &[2., 6.])?;
        assert_abs_diff_eq!(spline.eval(2.), 4., epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn rejects_bad_samples() {
        assert!(CubicSpline::not_a_knot(&[0.], &[1.]).is_err());
        assert!(CubicSpline::not_a_knot(&[0., 1.], &[1.]).is_err());
        assert!(CubicSpline::not_a_knot(&[0., 0., 1.], &[1., 2., 3.]).is_err());
    }

    #[test]
    fn linspace_hits_both_ends() {
        let values = linspace(0.1, 0.6, 6);
        assert_eq!(values.len(), 6);
        assert_eq!(values[0], 0.1);
        assert_eq!(values[5], 0.6);
        assert!(linspace(0., 1., 0).is_empty());
    }
}
