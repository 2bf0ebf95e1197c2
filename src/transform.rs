//! Polynomial spatial transform between nominal and measured bar coordinates.
//!
//! The tracer's control points define a smooth geometric distortion across the
//! detector. An order-3 bivariate polynomial is fit to them by SVD least squares and
//! then used as an inverse map: each output pixel of the rectified image samples the
//! input frame at the transformed position, so that all bars run parallel to image
//! columns afterwards.

use log::debug;
use nalgebra::{DMatrix, SVD};
use ndarray::Array2;

use crate::error::WavecalError;

/// An order-`n` bivariate polynomial mapping `(x, y) -> (x', y')`.
///
/// Term order is `x^(j-i) * y^i` for `j = 0..=order`, `i = 0..=j`, one coefficient
/// row per output axis.
#[derive(Clone, Debug)]
pub struct PolyTransform2D {
    order: usize,
    xcoef: Vec<f64>,
    ycoef: Vec<f64>,
}

fn n_terms(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

fn term_row(order: usize, x: f64, y: f64, row: &mut [f64]) {
    let mut t = 0;
    for j in 0..=order {
        for i in 0..=j {
            row[t] = x.powi((j - i) as i32) * y.powi(i as i32);
            t += 1;
        }
    }
}

impl PolyTransform2D {
    /// Fit the transform mapping `src` points onto `dst` points.
    ///
    /// Fails with [`WavecalError::Geometry`] if there are too few control points or
    /// the system is numerically singular (e.g. all points collinear).
    pub fn estimate(
        src: &[[f64; 2]],
        dst: &[[f64; 2]],
        order: usize,
    ) -> Result<Self, WavecalError> {
        debug_assert_eq!(src.len(), dst.len());
        let m = n_terms(order);
        let n = src.len();
        if n < m {
            return Err(WavecalError::Geometry(format!(
                "need at least {m} control points for an order-{order} transform, got {n}"
            )));
        }
        let mut flat = vec![0.0; n * m];
        for (i, p) in src.iter().enumerate() {
            term_row(order, p[0], p[1], &mut flat[i * m..(i + 1) * m]);
        }
        let design = DMatrix::from_row_slice(n, m, &flat);
        let rhs = DMatrix::from_fn(n, 2, |i, j| dst[i][j]);
        let svd = SVD::new(design, true, true);
        if svd.rank(1e-10) < m {
            return Err(WavecalError::Geometry(
                "degenerate control points: rank-deficient transform".into(),
            ));
        }
        let sol = svd
            .solve(&rhs, 1e-12)
            .map_err(|e| WavecalError::Geometry(format!("degenerate control points: {e}")))?;
        debug!("fit order-{} spatial transform to {} control points", order, n);
        Ok(Self {
            order,
            xcoef: sol.column(0).iter().copied().collect(),
            ycoef: sol.column(1).iter().copied().collect(),
        })
    }

    /// Map a single point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let mut row = vec![0.0; n_terms(self.order)];
        term_row(self.order, x, y, &mut row);
        let xp = row.iter().zip(&self.xcoef).map(|(t, c)| t * c).sum();
        let yp = row.iter().zip(&self.ycoef).map(|(t, c)| t * c).sum();
        (xp, yp)
    }

    /// Warp an image, using this transform as the map from output to input
    /// coordinates. Samples bilinearly; positions outside the input are zero.
    pub fn warp(&self, image: &Array2<f64>) -> Array2<f64> {
        let (ny, nx) = (image.shape()[0], image.shape()[1]);
        let mut out = Array2::zeros((ny, nx));
        for r in 0..ny {
            for c in 0..nx {
                let (sx, sy) = self.apply(c as f64, r as f64);
                out[[r, c]] = bilinear(image, sx, sy);
            }
        }
        out
    }
}

fn bilinear(image: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (ny, nx) = (image.shape()[0] as isize, image.shape()[1] as isize);
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let sample = |yy: isize, xx: isize| -> f64 {
        if yy < 0 || yy >= ny || xx < 0 || xx >= nx {
            0.0
        } else {
            image[[yy as usize, xx as usize]]
        }
    };
    sample(y0, x0) * (1.0 - fx) * (1.0 - fy)
        + sample(y0, x0 + 1) * fx * (1.0 - fy)
        + sample(y0 + 1, x0) * (1.0 - fx) * fy
        + sample(y0 + 1, x0 + 1) * fx * fy
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;

    fn grid_points() -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        for y in (0..100).step_by(10) {
            for x in (0..100).step_by(10) {
                pts.push([x as f64, y as f64]);
            }
        }
        pts
    }

    #[test]
    fn identity_recovered_from_identical_points() {
        let pts = grid_points();
        let tform = PolyTransform2D::estimate(&pts, &pts, 3).unwrap();
        let (x, y) = tform.apply(42.5, 17.25);
        assert_abs_diff_eq!(x, 42.5, epsilon = 1e-8);
        assert_abs_diff_eq!(y, 17.25, epsilon = 1e-8);
    }

    #[test]
    fn recovers_polynomial_distortion() {
        let src = grid_points();
        let dst: Vec<[f64; 2]> = src
            .iter()
            .map(|p| {
                let (x, y) = (p[0], p[1]);
                [x + 0.002 * y * y - 0.01 * x, y + 1.5]
            })
            .collect();
        let tform = PolyTransform2D::estimate(&src, &dst, 3).unwrap();
        let (x, y) = tform.apply(35.0, 55.0);
        assert_abs_diff_eq!(x, 35.0 + 0.002 * 55.0 * 55.0 - 0.35, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 56.5, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_points_error() {
        // all control points on one line cannot constrain the transform
        let src: Vec<[f64; 2]> = (0..20).map(|i| [i as f64, 0.0]).collect();
        let dst = src.clone();
        assert!(PolyTransform2D::estimate(&src, &dst, 3).is_err());
    }

    #[test]
    fn warp_shifts_image_content() {
        // transform maps output (x, y) to input (x, y + 2): content moves up
        let mut img = Array2::zeros((16, 8));
        img[[10, 4]] = 1.0;
        let src = grid_points();
        let dst: Vec<[f64; 2]> = src.iter().map(|p| [p[0], p[1] + 2.0]).collect();
        let tform = PolyTransform2D::estimate(&src, &dst, 3).unwrap();
        let warped = tform.warp(&img);
        assert_abs_diff_eq!(warped[[8, 4]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(warped[[10, 4]], 0.0, epsilon = 1e-6);
    }
}
