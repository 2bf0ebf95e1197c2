//! Central-region wavelength refinement.
//!
//! Starting from the preliminary dispersion and the per-bar pixel offsets, each bar
//! gets a physically motivated quartic wavelength model whose linear term is scanned
//! over a +-5% dispersion bracket. The trial that best correlates the bar spectrum
//! against the atlas fixes the bar's central dispersion and zero point.

use log::info;
use ndarray::{Array1, ArrayView1};

use crate::atlas::{Atlas, AtlasAlignment};
use crate::error::WavecalError;
use crate::fitting::{pascal_shift, polyval, polyval_on};
use crate::instrument::{CalibParams, Instrument};
use crate::interp::CubicSpline;
use crate::ndarray_utils::argmax;
use crate::signal::{central_peak, cross_correlate, linspace, tukey};

/// Central-region wavelength solution for one bar.
#[derive(Debug, Clone, Copy)]
pub struct CentralSolution {
    /// Bar index.
    pub bar: usize,
    /// Quartic coefficients, highest degree first, with the pixel origin at the
    /// spectrum midpoint.
    pub coeffs: [f64; 5],
    /// The same solution re-expressed with the origin at pixel zero.
    pub shifted: [f64; 5],
    /// Refined central dispersion in Angstroms per pixel.
    pub disp: f64,
}

/// Quartic wavelength coefficients implied by the grating equation for a given
/// central wavelength `p0` and central dispersion `disp`, highest degree first.
///
/// The curvature terms follow from the Taylor expansion of the grating equation
/// around the diffraction angle beta; only `p0` and `disp` are free.
pub fn physical_coeffs(p0: f64, disp: f64, instrument: &Instrument, ybin: u32) -> [f64; 5] {
    let pix = instrument.pixel_size * ybin as f64;
    let cosbeta = (disp / pix * instrument.rho * instrument.focal_length * 1.0e-4).min(1.0);
    let beta = cosbeta.acos();
    let r = pix / instrument.focal_length;
    [
        r.powi(4) * beta.sin() / 24.0 / instrument.rho * 1.0e4,
        -r.powi(3) * beta.cos() / 6.0 / instrument.rho * 1.0e4,
        -r.powi(2) * beta.sin() / 2.0 / instrument.rho * 1.0e4,
        disp,
        p0,
    ]
}

/// Shared read-only state for the per-bar dispersion search.
struct Search<'a> {
    atlas: &'a Atlas,
    alignment: &'a AtlasAlignment,
    /// Trial dispersions bracketing the preliminary estimate.
    disps: Array1<f64>,
    /// Pixel coordinates of the central region, relative to the midpoint.
    subxvals: Array1<f64>,
    instrument: &'a Instrument,
    params: &'a CalibParams,
    ybin: u32,
}

impl Search<'_> {
    fn refine_bar(
        &self,
        bar: usize,
        spec: ArrayView1<'_, f64>,
        p0: f64,
    ) -> Result<CentralSolution, WavecalError> {
        let scope = |e: WavecalError| WavecalError::Fit {
            bar,
            reason: e.to_string(),
        };
        let subspec = spec.slice(ndarray::s![self.alignment.minrow..self.alignment.maxrow]);

        let mut maxima = Vec::with_capacity(self.disps.len());
        let mut shifts = Vec::with_capacity(self.disps.len());
        for &disp in &self.disps {
            let coeffs = physical_coeffs(p0, disp, self.instrument, self.ybin);
            let wl0 = polyval(&coeffs, self.subxvals[0]);
            let wl1 = polyval(&coeffs, self.subxvals[self.subxvals.len() - 1]);
            let (minrw, maxrw) = self
                .atlas
                .index_range(wl0.min(wl1), wl0.max(wl1))
                .map_err(scope)?;

            let subrefwvl = self.atlas.wave.slice(ndarray::s![minrw..maxrw]);
            let mut subrefspec = self.atlas.flux.slice(ndarray::s![minrw..maxrw]).to_owned();
            let taper = tukey(subrefspec.len(), self.params.taper_fraction);
            subrefspec *= &taper;

            // Put the bar spectrum on the trial wavelength scale, then onto the
            // atlas grid.
            let waves = polyval_on(&coeffs, self.subxvals.view());
            let spline = CubicSpline::new(waves.view(), subspec);
            let mut intspec = spline.evaluate_on(subrefwvl);
            intspec *= &taper;

            let (lags, xcorr) = cross_correlate(intspec.view(), subrefspec.view());
            let (shift, peak) = central_peak(&lags, &xcorr);
            maxima.push(peak);
            shifts.push(shift as f64);
        }

        let best: f64 = maxima.iter().cloned().fold(f64::MIN, f64::max);
        if best <= 0.0 {
            return Err(WavecalError::Fit {
                bar,
                reason: "no correlation with atlas in dispersion scan".into(),
            });
        }

        // Interpolate the scan and pick the dispersion with the strongest
        // correlation, then read the shift off at that dispersion.
        let maxima = Array1::from_vec(maxima);
        let shifts = Array1::from_vec(shifts);
        let max_spline = CubicSpline::new(self.disps.view(), maxima.view());
        let shift_spline = CubicSpline::new(self.disps.view(), shifts.view());
        let lo = self.disps.iter().cloned().fold(f64::MAX, f64::min);
        let hi = self.disps.iter().cloned().fold(f64::MIN, f64::max);
        let xdisps = linspace(lo, hi, self.disps.len() * self.params.disp_resample);
        let maxima_res = max_spline.evaluate_on(xdisps.view());
        let winner = argmax(maxima_res.view());
        let disp = xdisps[winner];
        let barshift = shift_spline.evaluate(disp) * self.atlas.disp;

        let coeffs = physical_coeffs(p0 - barshift, disp, self.instrument, self.ybin);
        let shifted_vec = pascal_shift(&coeffs, self.alignment.x0 as f64);
        let mut shifted = [0.0; 5];
        shifted.copy_from_slice(&shifted_vec);
        info!(
            "central fit: bar {bar:3}, disp {disp:.4}, coeffs {:.2} {:.4} {:13.5e} {:13.5e}",
            shifted[4], shifted[3], shifted[2], shifted[1]
        );
        Ok(CentralSolution {
            bar,
            coeffs,
            shifted,
            disp,
        })
    }
}

fn make_search<'a>(
    offsets: &[isize],
    atlas: &'a Atlas,
    alignment: &'a AtlasAlignment,
    prelim_disp: f64,
    instrument: &'a Instrument,
    params: &'a CalibParams,
    ybin: u32,
) -> (Search<'a>, Vec<f64>) {
    let span = alignment.maxrow - alignment.minrow;
    let nn = ((params.max_ddisp * prelim_disp.abs() / atlas.disp * span as f64 / 3.0) as usize)
        .clamp(10, 25);
    info!("dispersion scan samples: {}", nn + 1);
    let disps = Array1::from_iter((0..=nn).map(|i| {
        prelim_disp * (1.0 + params.max_ddisp * (i as f64 - nn as f64 / 2.0) * 2.0 / nn as f64)
    }));
    let subxvals = Array1::from_iter(
        (alignment.minrow..alignment.maxrow).map(|i| i as f64 - alignment.x0 as f64),
    );
    // Zero points for each bar, corrected to the atlas frame.
    let p0: Vec<f64> = offsets
        .iter()
        .map(|&off| instrument.cwave + off as f64 * prelim_disp - alignment.offset_wave)
        .collect();
    let search = Search {
        atlas,
        alignment,
        disps,
        subxvals,
        instrument,
        params,
        ybin,
    };
    (search, p0)
}

/// Refine the central-region wavelength solution of every bar.
///
/// Failures are scoped to the bar that produced them; each entry of the returned
/// vector carries either that bar's solution or its error.
#[allow(clippy::too_many_arguments)]
pub fn refine_center(
    arcs: &[Array1<f64>],
    offsets: &[isize],
    atlas: &Atlas,
    alignment: &AtlasAlignment,
    prelim_disp: f64,
    instrument: &Instrument,
    params: &CalibParams,
    ybin: u32,
) -> Vec<Result<CentralSolution, WavecalError>> {
    info!("finding wavelength solution for central region");
    let (search, p0) = make_search(offsets, atlas, alignment, prelim_disp, instrument, params, ybin);
    arcs.iter()
        .enumerate()
        .map(|(b, spec)| search.refine_bar(b, spec.view(), p0[b]))
        .collect()
}

#[cfg(feature = "parallel")]
pub use parallel::*;

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Refine the central-region solutions of all bars in parallel.
    ///
    /// Also see [`refine_center`] for details.
    #[allow(clippy::too_many_arguments)]
    pub fn refine_center_par(
        arcs: &[Array1<f64>],
        offsets: &[isize],
        atlas: &Atlas,
        alignment: &AtlasAlignment,
        prelim_disp: f64,
        instrument: &Instrument,
        params: &CalibParams,
        ybin: u32,
    ) -> Vec<Result<CentralSolution, WavecalError>> {
        info!("finding wavelength solution for central region");
        let (search, p0) =
            make_search(offsets, atlas, alignment, prelim_disp, instrument, params, ybin);
        arcs.par_iter()
            .enumerate()
            .map(|(b, spec)| search.refine_bar(b, spec.view(), p0[b]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn lamp_spectrum(wave0: f64, disp: f64, n: usize, lines: &[(f64, f64)]) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| {
            let w = wave0 + i as f64 * disp;
            lines
                .iter()
                .map(|&(lw, amp)| amp * (-(w - lw).powi(2) / (2.0 * 0.6f64.powi(2))).exp())
                .sum()
        }))
    }

    fn test_instrument() -> Instrument {
        Instrument {
            cwave: 4500.0,
            resolving_power: 1800.0,
            ..Instrument::default()
        }
    }

    #[test]
    fn linear_terms_pass_through() {
        let instrument = test_instrument();
        let c = physical_coeffs(4500.0, 0.5, &instrument, 1);
        assert_abs_diff_eq!(c[4], 4500.0);
        assert_abs_diff_eq!(c[3], 0.5);
        // Positive dispersion bends the solution down at both ends.
        assert!(c[2] < 0.0);
    }

    #[test]
    fn unphysical_dispersion_clamps_beta() {
        let instrument = test_instrument();
        // Large enough that cos(beta) would exceed 1.
        let c = physical_coeffs(4500.0, 1.0e4, &instrument, 1);
        assert_abs_diff_eq!(c[2], 0.0, epsilon = 1e-30);
        assert_abs_diff_eq!(c[0], 0.0, epsilon = 1e-30);
    }

    #[test]
    fn recovers_perturbed_dispersion() {
        let instrument = test_instrument();
        let params = CalibParams::default();
        let lines: Vec<(f64, f64)> = (0..14)
            .map(|i| (4300.0 + i as f64 * 31.7, 60.0 + 15.0 * (i % 4) as f64))
            .collect();
        let atlas = Atlas::new(
            lamp_spectrum(4200.0, 0.25, 2400, &lines),
            4200.0,
            0.25,
            &instrument,
        )
        .unwrap();

        let prelim = 0.5;
        // One of the trial grid points for a 500-sample central window.
        let disp_true = prelim * 1.0125;
        let n = 1500;
        let alignment = AtlasAlignment {
            offset_pix: 0,
            offset_wave: 0.0,
            minrow: n / 3,
            maxrow: 2 * n / 3,
            x0: n / 2,
        };
        let coeffs_true = physical_coeffs(instrument.cwave, disp_true, &instrument, 1);
        let arc = Array1::from_iter((0..n).map(|i| {
            let w = polyval(&coeffs_true, i as f64 - (n / 2) as f64);
            lines
                .iter()
                .map(|&(lw, amp)| amp * (-(w - lw).powi(2) / (2.0 * 1.2f64.powi(2))).exp())
                .sum::<f64>()
        }));

        let results = refine_center(
            &[arc],
            &[0],
            &atlas,
            &alignment,
            prelim,
            &instrument,
            &params,
            1,
        );
        let sol = results[0].as_ref().unwrap();
        assert_abs_diff_eq!(sol.disp, disp_true, epsilon = 2.0e-3 * prelim);
        assert_abs_diff_eq!(sol.coeffs[4], instrument.cwave, epsilon = 2.0 * atlas.disp);
        // Origin change is consistent with evaluating at absolute pixels.
        let w_mid = polyval(&sol.shifted, (n / 2) as f64);
        assert_abs_diff_eq!(w_mid, sol.coeffs[4], epsilon = 1e-6);
    }

    #[test]
    fn bars_outside_atlas_fail_individually() {
        let instrument = test_instrument();
        let params = CalibParams::default();
        let atlas = Atlas::new(
            lamp_spectrum(4400.0, 0.25, 1200, &[(4500.0, 80.0)]),
            4400.0,
            0.25,
            &instrument,
        )
        .unwrap();
        let n = 1500;
        let alignment = AtlasAlignment {
            offset_pix: 0,
            offset_wave: 0.0,
            minrow: n / 3,
            maxrow: 2 * n / 3,
            x0: n / 2,
        };
        let arc = Array1::from_elem(n, 1.0);
        // Second bar is offset far beyond the atlas coverage.
        let results = refine_center(
            &[arc.clone(), arc],
            &[0, 4000],
            &atlas,
            &alignment,
            0.5,
            &instrument,
            &params,
            1,
        );
        assert!(matches!(
            results[1],
            Err(WavecalError::Fit { bar: 1, .. })
        ));
    }
}
