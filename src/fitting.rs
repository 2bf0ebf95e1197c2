//! Polynomial evaluation and least-squares fitting, the Pascal's-triangle coefficient
//! shift, and a small Gauss-Newton Gaussian profile fit.
//!
//! Polynomial coefficient vectors are ordered highest degree first throughout,
//! matching the evaluation convention of [`polyval`].

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1};

use crate::Float;

/// Evaluate a polynomial with coefficients ordered highest degree first (Horner).
pub fn polyval<F: Float>(coeffs: &[F], x: F) -> F {
    coeffs.iter().fold(F::zero(), |acc, &c| acc * x + c)
}

/// Evaluate a polynomial on a whole axis.
pub fn polyval_on<F: Float>(coeffs: &[F], xs: ArrayView1<F>) -> Array1<F> {
    xs.mapv(|x| polyval(coeffs, x))
}

/// Least-squares polynomial fit of degree `deg`, coefficients highest degree first.
///
/// Solved via SVD of the Vandermonde matrix. Fails if the system is underdetermined
/// or numerically singular.
pub fn polyfit(
    x: &[f64],
    y: &[f64],
    deg: usize,
) -> Result<Vec<f64>, &'static str> {
    let n = x.len();
    if n < deg + 1 {
        return Err("underdetermined polynomial fit");
    }
    let vand = DMatrix::from_fn(n, deg + 1, |i, j| x[i].powi((deg - j) as i32));
    let rhs = DVector::from_row_slice(y);
    let svd = nalgebra::SVD::new(vand, true, true);
    let sol = svd.solve(&rhs, 1e-12)?;
    Ok(sol.iter().copied().collect())
}

/// Re-express polynomial coefficients about a new reference point `x0`, using
/// Pascal's-triangle binomial identities. The returned polynomial `q` satisfies
/// `q(x) = p(x - x0)`; the function is unchanged, only the expansion point moves.
///
/// Handles up to 7 coefficients (degree 6); input and output are ordered highest
/// degree first.
pub fn pascal_shift(coef: &[f64], x0: f64) -> Vec<f64> {
    let ncoef = coef.len().min(7);
    // work in lowest-first order, zero-padded to degree 6
    let mut use_coeff = [0.0; 7];
    for (i, &c) in coef[..ncoef].iter().enumerate() {
        use_coeff[ncoef - 1 - i] = c;
    }
    let x01 = x0;
    let x02 = x0.powi(2);
    let x03 = x0.powi(3);
    let x04 = x0.powi(4);
    let x05 = x0.powi(5);
    let x06 = x0.powi(6);
    let mut fin = [0.0; 7];
    fin[0] = use_coeff[0] - use_coeff[1] * x01 + use_coeff[2] * x02 - use_coeff[3] * x03
        + use_coeff[4] * x04
        - use_coeff[5] * x05
        + use_coeff[6] * x06;
    fin[1] = use_coeff[1] - 2.0 * use_coeff[2] * x01 + 3.0 * use_coeff[3] * x02
        - 4.0 * use_coeff[4] * x03
        + 5.0 * use_coeff[5] * x04
        - 6.0 * use_coeff[6] * x05;
    fin[2] = use_coeff[2] - 3.0 * use_coeff[3] * x01 + 6.0 * use_coeff[4] * x02
        - 10.0 * use_coeff[5] * x03
        + 15.0 * use_coeff[6] * x04;
    fin[3] = use_coeff[3] - 4.0 * use_coeff[4] * x01 + 10.0 * use_coeff[5] * x02
        - 20.0 * use_coeff[6] * x03;
    fin[4] = use_coeff[4] - 5.0 * use_coeff[5] * x01 + 15.0 * use_coeff[6] * x02;
    fin[5] = use_coeff[5] - 6.0 * use_coeff[6] * x01;
    fin[6] = use_coeff[6];
    // back to highest-first, trimmed to the input length
    (0..ncoef).rev().map(|i| fin[i]).collect()
}

/// A fitted Gaussian profile `a * exp(-(x - mu)^2 / (2 sigma^2))`.
#[derive(Clone, Copy, Debug)]
pub struct GaussianFit {
    /// Amplitude.
    pub amplitude: f64,
    /// Center.
    pub center: f64,
    /// Width (standard deviation, always positive).
    pub sigma: f64,
}

/// Fit a Gaussian profile to `(x, y)` samples by Gauss-Newton iteration.
///
/// `guess` seeds `(amplitude, center, sigma)`. Fails on singular steps,
/// non-finite parameters, or missing convergence within the iteration cap.
pub fn fit_gaussian(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    guess: (f64, f64, f64),
) -> Result<GaussianFit, &'static str> {
    let n = x.len();
    if n < 3 {
        return Err("too few samples for a Gaussian fit");
    }
    let (mut a, mut mu, mut sigma) = guess;
    if sigma == 0.0 {
        sigma = 1.0;
    }

    for _ in 0..50 {
        let mut jac = DMatrix::zeros(n, 3);
        let mut res = DVector::zeros(n);
        for i in 0..n {
            let d = x[i] - mu;
            let e = (-d * d / (2.0 * sigma * sigma)).exp();
            let model = a * e;
            res[i] = y[i] - model;
            jac[(i, 0)] = e;
            jac[(i, 1)] = model * d / (sigma * sigma);
            jac[(i, 2)] = model * d * d / (sigma * sigma * sigma);
        }
        let svd = nalgebra::SVD::new(jac, true, true);
        let step = svd.solve(&res, 1e-12)?;
        a += step[0];
        mu += step[1];
        sigma += step[2];
        if !(a.is_finite() && mu.is_finite() && sigma.is_finite()) {
            return Err("Gaussian fit diverged");
        }
        if step.amax() < 1e-8 * (1.0 + sigma.abs()) {
            return Ok(GaussianFit {
                amplitude: a,
                center: mu,
                sigma: sigma.abs(),
            });
        }
    }
    Err("Gaussian fit did not converge")
}

/// Standard deviation (population) of a slice.
pub fn std<F: Float>(values: &[F]) -> F {
    if values.is_empty() {
        return F::zero();
    }
    let n = F::from_usize(values.len()).unwrap();
    let mean = values.iter().copied().fold(F::zero(), |a, b| a + b) / n;
    let var = values
        .iter()
        .map(|&v| (v - mean) * (v - mean))
        .fold(F::zero(), |a, b| a + b)
        / n;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    use super::*;
    use crate::signal::linspace;

    #[test]
    fn polyval_matches_horner_expansion() {
        // 2x^2 - 3x + 1 at x = 2
        assert_abs_diff_eq!(polyval(&[2., -3., 1.], 2.), 3., epsilon = 1e-12);
    }

    #[test]
    fn polyfit_recovers_coefficients() {
        let coeffs = [0.5, -1.0, 2.0, 10.0];
        let x: Vec<f64> = (0..20).map(|i| i as f64 - 10.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| polyval(&coeffs, xi)).collect();
        let fit = polyfit(&x, &y, 3).unwrap();
        for (got, want) in fit.iter().zip(coeffs.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-8);
        }
    }

    #[test]
    fn polyfit_underdetermined_errors() {
        assert!(polyfit(&[1.0, 2.0], &[1.0, 2.0], 4).is_err());
    }

    #[test]
    fn pascal_shift_moves_expansion_point() {
        // p(x) = x^2; q(x) = p(x - 3) = x^2 - 6x + 9
        let q = pascal_shift(&[1., 0., 0.], 3.0);
        assert_abs_diff_eq!(q.as_slice(), [1., -6., 9.].as_slice(), epsilon = 1e-12);
    }

    #[test]
    fn pascal_shift_round_trip() {
        let coeffs = [3.2e-8, -1.1e-5, 4.3e-3, 0.25, 4500.0];
        let there = pascal_shift(&coeffs, 1024.0);
        let back = pascal_shift(&there, -1024.0);
        for (got, want) in back.iter().zip(coeffs.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-6 * want.abs().max(1e-9));
        }
    }

    #[test]
    fn gaussian_fit_recovers_profile() {
        let x = linspace(-5.0_f64, 5.0, 41);
        let y: Array1<f64> = x.mapv(|xi| 7.0 * (-(xi - 0.4_f64).powi(2) / (2.0 * 1.3 * 1.3)).exp());
        let fit = fit_gaussian(x.view(), y.view(), (5.0, 0.0, 1.0)).unwrap();
        assert_abs_diff_eq!(fit.amplitude, 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.center, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.sigma, 1.3, epsilon = 1e-6);
    }

    #[test]
    fn std_of_constant_is_zero() {
        assert_abs_diff_eq!(std(&[2.0_f64, 2.0, 2.0]), 0.0, epsilon = 1e-12);
    }
}
