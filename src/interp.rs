//! Natural cubic spline interpolation.
//!
//! Used wherever a spectrum sampled on one axis has to be evaluated on another
//! (warping a bar spectrum onto the atlas wavelength grid, sub-pixel peak location,
//! dense resampling of the dispersion search curves).

use ndarray::{Array1, ArrayView1};

/// A natural cubic spline interpolator for real-valued data.
///
/// Given `n` data points, constructs piecewise cubic polynomials with continuous
/// first and second derivatives. Evaluation outside the data range extrapolates
/// with the boundary polynomial.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    /// Sorted x values (knots).
    xs: Vec<f64>,
    /// Corresponding y values.
    ys: Vec<f64>,
    /// Second derivatives at each knot (computed during construction).
    y2s: Vec<f64>,
}

impl CubicSpline {
    /// Construct a natural cubic spline from data points.
    ///
    /// The points are sorted by x internally, so descending axes (e.g. wavelengths
    /// under a negative dispersion) are accepted.
    ///
    /// # Panics
    /// Panics if `xs` and `ys` have different lengths or fewer than 2 points are given.
    pub fn new(xs: ArrayView1<f64>, ys: ArrayView1<f64>) -> Self {
        assert_eq!(xs.len(), ys.len(), "xs and ys must have equal length");
        assert!(xs.len() >= 2, "need at least 2 data points");

        let mut pairs: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("found nan"));
        let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();

        let n = xs.len();
        let mut y2s = vec![0.0; n];
        let mut u = vec![0.0; n - 1];

        // Forward sweep (tridiagonal system for natural spline)
        for i in 1..n - 1 {
            let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
            let p = sig * y2s[i - 1] + 2.0;
            y2s[i] = (sig - 1.0) / p;
            u[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
                - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
            u[i] = (6.0 * u[i] / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
        }

        // Back substitution
        for k in (0..n - 2).rev() {
            y2s[k + 1] = y2s[k + 1] * y2s[k + 2] + u[k + 1];
        }

        Self { xs, ys, y2s }
    }

    /// Evaluate the spline at a given x value.
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();

        // Binary search for the enclosing interval
        let mut lo = 0;
        let mut hi = n - 1;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.xs[mid] > x {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        let h = self.xs[hi] - self.xs[lo];
        let a = (self.xs[hi] - x) / h;
        let b = (x - self.xs[lo]) / h;

        a * self.ys[lo]
            + b * self.ys[hi]
            + ((a * a * a - a) * self.y2s[lo] + (b * b * b - b) * self.y2s[hi]) * h * h / 6.0
    }

    /// Evaluate the spline on a whole axis.
    pub fn evaluate_on(&self, xs: ArrayView1<f64>) -> Array1<f64> {
        xs.mapv(|x| self.evaluate(x))
    }
}
