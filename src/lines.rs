//! Canonical atlas line list.
//!
//! Finds the clean, unblended atlas lines inside the wavelength window that every
//! bar can see, so the final per-bar fits all draw from the same line set.

use log::{debug, info};
use ndarray::Array1;

use crate::atlas::Atlas;
use crate::central::CentralSolution;
use crate::error::WavecalError;
use crate::fitting::{fit_gaussian, polyval_on};
use crate::instrument::CalibParams;
use crate::interp::CubicSpline;
use crate::ndarray_utils::{argmax, median};
use crate::signal::{find_peaks_spaced, linspace, sigma_clip};

/// Atlas lines selected for the final per-bar fits.
#[derive(Debug, Clone)]
pub struct LineList {
    /// Interpolated peak wavelength of each accepted line, in Angstroms.
    pub waves: Vec<f64>,
    /// Fitted amplitude of each accepted line.
    pub amps: Vec<f64>,
    /// Blue edge of the wavelength window common to all bars.
    pub minwave: f64,
    /// Red edge of the common window.
    pub maxwave: f64,
    /// Atlas sample range corresponding to the common window.
    pub atlas_range: (usize, usize),
}

impl LineList {
    /// Number of accepted lines.
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// True when no line survived selection.
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Extract the canonical line list from the atlas.
///
/// The per-bar central solutions define the wavelength span each bar covers; the
/// common window is their intersection, trimmed by a margin on both edges. Inside
/// it, atlas peaks are vetted three ways: a minimum inter-peak spacing and a width
/// window (both in units of the resolution element) reject blended lines, a
/// sigma-clipped band over the fitted Gaussian widths rejects outlier profiles,
/// and lines whose fitted center strays from the interpolated peak are dropped.
/// The adopted positions are the interpolated peaks, not the Gaussian centers.
pub fn find_atlas_lines(
    solutions: &[CentralSolution],
    specsz: usize,
    atlas: &Atlas,
    params: &CalibParams,
) -> Result<LineList, WavecalError> {
    if solutions.is_empty() {
        return Err(WavecalError::Atlas(
            "no central solutions available to bound the line search".into(),
        ));
    }
    // The outermost pixels carry warp artifacts, so the window is evaluated
    // away from the spectrum ends.
    let margin = params.line_edge_margin.min(specsz / 4);
    let xvals = Array1::from_iter((margin..specsz - margin).map(|i| i as f64));
    let mut minwav = f64::MIN;
    let mut maxwav = f64::MAX;
    for sol in solutions {
        let waves = polyval_on(&sol.shifted, xvals.view());
        let lo = waves.iter().cloned().fold(f64::MAX, f64::min);
        let hi = waves.iter().cloned().fold(f64::MIN, f64::max);
        minwav = minwav.max(lo);
        maxwav = maxwav.min(hi);
    }
    minwav += params.wave_margin;
    maxwav -= params.wave_margin;
    if minwav >= maxwav {
        return Err(WavecalError::Atlas(format!(
            "bars share no common wavelength window ({minwav:.1} >= {maxwav:.1} A)"
        )));
    }
    info!("common wavelength window (A): {minwav:.2} - {maxwav:.2}");

    let (minrw, maxrw) = atlas.index_range(minwav, maxwav)?;
    let atspec = atlas.flux.slice(ndarray::s![minrw..maxrw]);
    let atwave = atlas.wave.slice(ndarray::s![minrw..maxrw]);
    debug!("atlas window median flux = {:.3}", median(atspec));

    let dist = atlas.respix * params.peak_separation;
    let widths = (
        atlas.respix * params.peak_width_range.0,
        atlas.respix * params.peak_width_range.1,
    );
    info!(
        "peak spacing {:.1} px, width range {:.1} - {:.1} px",
        dist, widths.0, widths.1
    );
    let peaks = find_peaks_spaced(atspec, dist, widths);
    info!("found {} atlas peaks", peaks.len());

    // Gaussian fits over each peak's half-prominence window.
    struct Candidate {
        window: (usize, usize),
        center: f64,
        amp: f64,
        sigma: f64,
    }
    let mut candidates = Vec::with_capacity(peaks.len());
    for (ipk, pk) in peaks.iter().enumerate() {
        let x0 = ((pk.left_ip + 0.5) as usize).saturating_sub(1);
        let x1 = ((pk.right_ip + 0.5) as usize + 2).min(atspec.len());
        if x1 <= x0 + 2 {
            continue;
        }
        let xvec = atwave.slice(ndarray::s![x0..x1]);
        let yvec = atspec.slice(ndarray::s![x0..x1]);
        match fit_gaussian(xvec, yvec, (100.0, atwave[pk.index], 1.0)) {
            Ok(fit) => candidates.push(Candidate {
                window: (x0, x1),
                center: fit.center,
                amp: fit.amplitude,
                sigma: fit.sigma,
            }),
            Err(reason) => debug!("Gaussian fit failed for peak {ipk}: {reason}"),
        }
    }

    let sigs: Vec<f64> = candidates.iter().map(|c| c.sigma).collect();
    let (clean, low, upp) = sigma_clip(&sigs, params.width_clip_sigma, params.width_clip_iters);
    info!(
        "width band: n = {}, {:.3} - {:.3} (atlas px scale)",
        clean.len(),
        low,
        upp
    );

    let mut waves = Vec::new();
    let mut amps = Vec::new();
    let mut nrej = 0usize;
    for cand in &candidates {
        if !(low < cand.sigma && cand.sigma < upp) {
            debug!("rejected width: {:.2} A, sig = {:.2}", cand.center, cand.sigma);
            nrej += 1;
            continue;
        }
        let (x0, x1) = cand.window;
        let xvec = atwave.slice(ndarray::s![x0..x1]);
        let yvec = atspec.slice(ndarray::s![x0..x1]);
        // The adopted position comes from a dense cubic resampling of the window.
        let spline = CubicSpline::new(xvec, yvec);
        let xplot = linspace(xvec[0], xvec[xvec.len() - 1], 1000);
        let dense = spline.evaluate_on(xplot.view());
        let peak = xplot[argmax(dense.view())];
        if (cand.center - peak).abs() > params.atlas_peak_offset_max {
            debug!(
                "large peak-center offset, skipping line at {:.3} A",
                cand.center
            );
            nrej += 1;
            continue;
        }
        waves.push(peak);
        amps.push(cand.amp);
    }
    info!("line list: {} accepted, {} rejected", waves.len(), nrej);

    Ok(LineList {
        waves,
        amps,
        minwave: minwav,
        maxwave: maxwav,
        atlas_range: (minrw, maxrw),
    })
}
