//! Final per-bar wavelength solutions.
//!
//! For every bar whose central region converged, each canonical atlas line is
//! located in the arc spectrum, measured at sub-pixel precision, and the surviving
//! (pixel, wavelength) pairs are fit with a quartic under iterative outlier
//! rejection.

use log::{debug, info};
use ndarray::{Array1, ArrayView1};

use crate::central::CentralSolution;
use crate::error::WavecalError;
use crate::fitting::{polyfit, polyval, polyval_on, std};
use crate::instrument::{CalibParams, Instrument};
use crate::interp::CubicSpline;
use crate::lines::LineList;
use crate::ndarray_utils::argmax;
use crate::signal::{centroid, linspace, smooth_boxcar};

/// Converged wavelength solution for one bar.
#[derive(Debug, Clone)]
pub struct BarSolution {
    /// Bar index.
    pub bar: usize,
    /// Slice this bar belongs to.
    pub slice: usize,
    /// Pixel-to-wavelength coefficients (quartic by default), highest degree
    /// first, with the pixel origin at row zero.
    pub coeffs: Vec<f64>,
    /// RMS of the fit residuals in Angstroms.
    pub rms: f64,
    /// Number of lines retained by the final fit.
    pub nlines: usize,
}

/// Find a window around sample `c` that brackets the line down to its half maximum.
///
/// Expands from a five-sample seed while neighbors exceed the seed maximum,
/// recenters on the local maximum, then walks each side down to half maximum
/// requiring a monotonic decrease. Returns `(first, last, count)` with inclusive
/// bounds, or `None` when the profile is too weak, too ragged, or too close to an
/// edge to trust.
pub fn line_window(y: ArrayView1<'_, f64>, c: usize, thresh: f64) -> Option<(usize, usize, usize)> {
    let nx = y.len();
    if c < 2 || c + 2 >= nx {
        return None;
    }
    let window_max = |a: usize, b: usize| -> f64 {
        y.slice(ndarray::s![a..=b])
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max)
    };
    let mut x0 = c - 2;
    let mut x1 = c + 2;
    let mut count = 5usize;
    let mx = window_max(x0, x1);

    // grow while a neighbor still tops the seed maximum
    while x0 > 0 && y[x0 - 1] > mx {
        x0 -= 1;
        count += 1;
    }
    if x0 == 0 {
        return None;
    }
    while x1 + 1 < nx && y[x1 + 1] > mx {
        x1 += 1;
        count += 1;
    }
    if x1 + 2 >= nx {
        return None;
    }

    // recenter on the maximum
    let cmx = x0 + argmax(y.slice(ndarray::s![x0..=x1]));
    if cmx < 2 || cmx + 2 >= nx {
        return None;
    }
    x0 = cmx - 2;
    x1 = cmx + 2;
    let mx = window_max(x0, x1);
    if mx < thresh {
        return None;
    }

    // walk each side down to half maximum
    let hmx = mx * 0.5;
    let mut prev = mx;
    while y[x0] > hmx {
        if y[x0] > mx || x0 == 0 || y[x0] > prev {
            return None;
        }
        prev = y[x0];
        x0 -= 1;
        count += 1;
    }
    let mut prev = mx;
    while y[x1] > hmx {
        if y[x1] > mx || x1 + 1 >= nx || y[x1] > prev {
            return None;
        }
        prev = y[x1];
        x1 += 1;
        count += 1;
    }
    Some((x0, x1, count))
}

fn solve_bar(
    bar: usize,
    spec: ArrayView1<'_, f64>,
    shifted: &[f64; 5],
    lines: &LineList,
    instrument: &Instrument,
    params: &CalibParams,
) -> Result<BarSolution, WavecalError> {
    let n = spec.len();
    let bspec = smooth_boxcar(spec, instrument.slicer.smoothing_width());
    let xvals = Array1::from_iter((0..n).map(|i| i as f64));
    let bw = polyval_on(shifted, xvals.view());

    let mut pix_dat: Vec<f64> = Vec::new();
    let mut wave_dat: Vec<f64> = Vec::new();
    let mut nrej = 0usize;
    for &aw in &lines.waves {
        // nearest pixel whose predicted wavelength reaches the line
        let Some(line_x) = bw.iter().position(|&v| v >= aw) else {
            nrej += 1;
            continue;
        };
        let Some((x0, x1, count)) = line_window(bspec.view(), line_x, params.line_flux_min) else {
            nrej += 1;
            continue;
        };
        if count < params.line_window_min {
            nrej += 1;
            continue;
        }
        let xvec = xvals.slice(ndarray::s![x0..=x1]);
        let yvec = bspec.slice(ndarray::s![x0..=x1]);
        let spline = CubicSpline::new(xvec, yvec);
        let xplot = linspace(x0 as f64, x1 as f64, 1000);
        let dense = spline.evaluate_on(xplot.view());
        let peak = xplot[argmax(dense.view())];
        let cent = centroid(xvec, yvec);
        if (cent - peak).abs() > params.peak_centroid_max {
            debug!(
                "bar {bar}: peak-centroid offset {:.3} px, skipping line {aw:.2} A",
                (cent - peak).abs()
            );
            nrej += 1;
            continue;
        }
        pix_dat.push(peak);
        wave_dat.push(aw);
    }
    info!(
        "bar {bar}: fitting with {} lines after rejecting {nrej}",
        pix_dat.len()
    );

    let (wfit, wsig, nlines) = fit_with_rejection(
        pix_dat,
        wave_dat,
        params.fit_order,
        params.reject_sigma,
        params.reject_iters,
    )
    .map_err(|reason| WavecalError::Fit {
        bar,
        reason: reason.into(),
    })?;

    let slice = instrument.slice_of(bar);
    info!("bar {bar:3}, slice {slice:2}: RMS = {wsig:.3} A, N = {nlines}");
    Ok(BarSolution {
        bar,
        slice,
        nlines,
        coeffs: wfit,
        rms: wsig,
    })
}

/// Fit wavelength against pixel with iterative rejection of residual outliers.
///
/// After an initial least-squares fit, runs exactly `iters` passes; each pass
/// keeps only the points whose residual is under `sigma` times the current
/// residual scatter, then refits on the survivors. A pass that rejects nothing
/// refits the same set, so the RMS never increases between passes. Returns the
/// coefficients, the residual RMS, and the number of points retained.
pub fn fit_with_rejection(
    mut pix: Vec<f64>,
    mut wave: Vec<f64>,
    order: usize,
    sigma: f64,
    iters: usize,
) -> Result<(Vec<f64>, f64, usize), &'static str> {
    let residuals = |fit: &[f64], pix: &[f64], wave: &[f64]| -> Vec<f64> {
        pix.iter()
            .zip(wave.iter())
            .map(|(&p, &w)| polyval(fit, p) - w)
            .collect()
    };
    let mut wfit = polyfit(&pix, &wave, order)?;
    let mut resid = residuals(&wfit, &pix, &wave);
    let mut wsig = std(&resid);

    for _ in 0..iters {
        let mut ob = Vec::with_capacity(pix.len());
        let mut at = Vec::with_capacity(wave.len());
        for (i, &rsd) in resid.iter().enumerate() {
            if rsd.abs() < wsig * sigma {
                ob.push(pix[i]);
                at.push(wave[i]);
            } else {
                debug!("rejected line {:.3} A, resid {rsd:.3}", wave[i]);
            }
        }
        pix = ob;
        wave = at;
        wfit = polyfit(&pix, &wave, order)?;
        resid = residuals(&wfit, &pix, &wave);
        wsig = std(&resid);
    }
    Ok((wfit, wsig, pix.len()))
}

/// Solve all bars with a converged central solution.
///
/// Returns one entry per input solution; failures are scoped to their bar.
pub fn solve_bars(
    arcs: &[Array1<f64>],
    solutions: &[CentralSolution],
    lines: &LineList,
    instrument: &Instrument,
    params: &CalibParams,
) -> Vec<Result<BarSolution, WavecalError>> {
    solutions
        .iter()
        .map(|sol| {
            solve_bar(
                sol.bar,
                arcs[sol.bar].view(),
                &sol.shifted,
                lines,
                instrument,
                params,
            )
        })
        .collect()
}

#[cfg(feature = "parallel")]
pub use parallel::*;

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Solve all bars in parallel.
    ///
    /// Also see [`solve_bars`] for details.
    pub fn solve_bars_par(
        arcs: &[Array1<f64>],
        solutions: &[CentralSolution],
        lines: &LineList,
        instrument: &Instrument,
        params: &CalibParams,
    ) -> Vec<Result<BarSolution, WavecalError>> {
        solutions
            .par_iter()
            .map(|sol| {
                solve_bar(
                    sol.bar,
                    arcs[sol.bar].view(),
                    &sol.shifted,
                    lines,
                    instrument,
                    params,
                )
            })
            .collect()
    }
}
