//! 1-D signal utilities shared by the calibration stages: full-mode cross-correlation,
//! cosine tapering, Gaussian and boxcar smoothing, peak finding, and sigma clipping.

use ndarray::{Array1, ArrayView1};

use crate::ndarray_utils::argmax;
use crate::Float;

/// Full-mode linear cross-correlation of `a` against `b`.
///
/// Returns the lags `-(len(b)-1) ..= len(a)-1` and the correlation value at each lag,
/// where the value at lag `k` is the sum over `b[j] * a[j + k]`. A positive lag means
/// `a` is sampled ahead of `b`.
pub fn cross_correlate<F: Float>(
    a: ArrayView1<F>,
    b: ArrayView1<F>,
) -> (Array1<isize>, Array1<F>) {
    let na = a.len() as isize;
    let nb = b.len() as isize;
    let lags = Array1::from_iter((1 - nb)..na);
    let values = lags.mapv(|lag| {
        let j0 = (-lag).max(0);
        let j1 = nb.min(na - lag);
        let mut acc = F::zero();
        for j in j0..j1 {
            acc += b[j as usize] * a[(j + lag) as usize];
        }
        acc
    });
    (lags, values)
}

/// Lag and value of the correlation maximum restricted to the central third of the
/// lag range. The restriction avoids aliased maxima at extreme lags; ties break
/// toward the first occurrence.
pub fn central_peak<F: Float>(lags: &Array1<isize>, values: &Array1<F>) -> (isize, F) {
    let n = values.len();
    let x0 = n / 3;
    let x1 = 2 * n / 3;
    let central = values.slice(ndarray::s![x0..x1]);
    let imax = argmax(central.view());
    (lags[x0 + imax], central[imax])
}

/// Cosine (Tukey) taper window of length `n` with taper fraction `alpha`.
pub fn tukey<F: Float>(n: usize, alpha: f64) -> Array1<F> {
    if alpha <= 0.0 || n < 2 {
        return Array1::from_elem(n, F::one());
    }
    let alpha = alpha.min(1.0);
    let edge = alpha * (n - 1) as f64 / 2.0;
    Array1::from_iter((0..n).map(|i| {
        let i = i as f64;
        let x = if i < edge {
            i
        } else if i > (n - 1) as f64 - edge {
            (n - 1) as f64 - i
        } else {
            return F::one();
        };
        F::from_f64(0.5 * (1.0 + (std::f64::consts::PI * (x / edge - 1.0)).cos())).unwrap()
    }))
}

/// Gaussian smoothing with reflected boundaries, kernel truncated at four sigma.
pub fn gaussian_filter1d<F: Float>(y: ArrayView1<F>, sigma: f64) -> Array1<F> {
    let n = y.len();
    if sigma <= 0.0 || n == 0 {
        return y.to_owned();
    }
    let radius = (4.0 * sigma + 0.5) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let norm: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= norm;
    }
    // reflect indexing: (d c b a | a b c d | d c b a)
    let reflect = |i: isize| -> usize {
        let n = n as isize;
        let mut i = i;
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - 1 - i;
            } else {
                return i as usize;
            }
        }
    };
    Array1::from_iter((0..n).map(|i| {
        let mut acc = F::zero();
        for (k, w) in kernel.iter().enumerate() {
            let j = i as isize + k as isize - radius as isize;
            acc += y[reflect(j)] * F::from_f64(*w).unwrap();
        }
        acc
    }))
}

/// Boxcar smoothing of width `width` (same-length output, zero-padded edges).
/// A width below 2 returns the input unchanged.
pub fn smooth_boxcar<F: Float>(y: ArrayView1<F>, width: usize) -> Array1<F> {
    if width < 2 {
        return y.to_owned();
    }
    let n = y.len();
    let half = width / 2;
    let w = F::from_usize(width).unwrap();
    Array1::from_iter((0..n).map(|i| {
        let mut acc = F::zero();
        for k in 0..width {
            let j = i as isize + k as isize - half as isize;
            if j >= 0 && (j as usize) < n {
                acc += y[j as usize];
            }
        }
        acc / w
    }))
}

/// Indices of local maxima with values above `height`.
///
/// A run of equal samples counts as one plateau peak reported at its midpoint,
/// so flat-topped (e.g. saturated) profiles are still found exactly once.
pub fn find_peaks<F: Float>(y: ArrayView1<F>, height: F) -> Vec<usize> {
    let n = y.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if y[i] > y[i - 1] {
            let start = i;
            let mut end = i;
            while end + 1 < n && y[end + 1] == y[end] {
                end += 1;
            }
            if end + 1 < n && y[end + 1] < y[end] && y[i] >= height {
                peaks.push((start + end) / 2);
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// A detected peak with its interpolated half-prominence crossings.
#[derive(Clone, Copy, Debug)]
pub struct PeakProps {
    /// Sample index of the maximum.
    pub index: usize,
    /// Interpolated left crossing of the half-prominence level.
    pub left_ip: f64,
    /// Interpolated right crossing of the half-prominence level.
    pub right_ip: f64,
    /// `right_ip - left_ip`.
    pub width: f64,
}

/// Find local maxima with a minimum inter-peak distance and a half-prominence width
/// inside `width_range`. Peaks are vetted highest-first for the distance condition,
/// then returned in index order.
pub fn find_peaks_spaced(
    y: ArrayView1<f64>,
    distance: f64,
    width_range: (f64, f64),
) -> Vec<PeakProps> {
    let n = y.len();
    let mut candidates: Vec<usize> = (1..n.saturating_sub(1))
        .filter(|&i| y[i] > y[i - 1] && y[i] > y[i + 1])
        .collect();

    // highest first, then greedy distance veto
    candidates.sort_by(|&i, &j| y[j].partial_cmp(&y[i]).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<usize> = Vec::new();
    for &i in &candidates {
        if kept
            .iter()
            .all(|&j| (i as f64 - j as f64).abs() >= distance)
        {
            kept.push(i);
        }
    }
    kept.sort_unstable();

    let mut props = Vec::new();
    for &peak in &kept {
        let height = y[peak];

        // prominence bases: lowest point on each side before a higher sample or the edge
        let mut left_min = height;
        let mut i = peak;
        while i > 0 && y[i - 1] <= height {
            i -= 1;
            if y[i] < left_min {
                left_min = y[i];
            }
        }
        let mut right_min = height;
        let mut i = peak;
        while i + 1 < n && y[i + 1] <= height {
            i += 1;
            if y[i] < right_min {
                right_min = y[i];
            }
        }
        let base = left_min.max(right_min);
        let prominence = height - base;
        if prominence <= 0.0 {
            continue;
        }
        let level = height - prominence / 2.0;

        let left_ip = cross_down(y, peak, level, -1);
        let right_ip = cross_down(y, peak, level, 1);
        let width = right_ip - left_ip;
        if width >= width_range.0 && width <= width_range.1 {
            props.push(PeakProps {
                index: peak,
                left_ip,
                right_ip,
                width,
            });
        }
    }
    props
}

/// Interpolated index where `y` falls to `level` walking from `peak` in `step` direction.
fn cross_down(y: ArrayView1<f64>, peak: usize, level: f64, step: isize) -> f64 {
    let n = y.len() as isize;
    let mut i = peak as isize;
    loop {
        let j = i + step;
        if j < 0 || j >= n {
            return i as f64;
        }
        if y[j as usize] <= level {
            let yi = y[i as usize];
            let yj = y[j as usize];
            let frac = if yi > yj { (yi - level) / (yi - yj) } else { 0.0 };
            return i as f64 + step as f64 * frac;
        }
        i = j;
    }
}

/// Iterative sigma clipping. Returns the surviving values and the final
/// `(lower, upper)` acceptance bounds.
pub fn sigma_clip<F: Float>(values: &[F], sigma: F, iters: usize) -> (Vec<F>, F, F) {
    let mut kept: Vec<F> = values.to_vec();
    let mut low = F::zero();
    let mut upp = F::zero();
    for _ in 0..iters {
        if kept.is_empty() {
            break;
        }
        let n = F::from_usize(kept.len()).unwrap();
        let mean = kept.iter().copied().fold(F::zero(), |a, b| a + b) / n;
        let var = kept
            .iter()
            .map(|&v| (v - mean) * (v - mean))
            .fold(F::zero(), |a, b| a + b)
            / n;
        let std = var.sqrt();
        low = mean - sigma * std;
        upp = mean + sigma * std;
        kept.retain(|&v| v > low && v < upp);
    }
    (kept, low, upp)
}

/// Flux-weighted centroid of `ys` sampled at `xs`.
pub fn centroid<F: Float>(xs: ArrayView1<F>, ys: ArrayView1<F>) -> F {
    let num = xs
        .iter()
        .zip(ys.iter())
        .fold(F::zero(), |acc, (&x, &y)| acc + x * y);
    num / ys.sum()
}

/// `n` evenly spaced values from `a` to `b` inclusive.
pub fn linspace<F: Float>(a: F, b: F, n: usize) -> Array1<F> {
    if n == 1 {
        return Array1::from_elem(1, a);
    }
    let step = (b - a) / F::from_usize(n - 1).unwrap();
    Array1::from_iter((0..n).map(|i| a + step * F::from_usize(i).unwrap()))
}
