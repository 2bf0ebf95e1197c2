//! Reference-lamp atlas spectrum: loading, resolution matching and the initial
//! arc-to-atlas alignment.

use std::path::{Path, PathBuf};

use log::info;
use ndarray::{Array1, ArrayView1};

use crate::error::WavecalError;
use crate::fits;
use crate::instrument::{CalibParams, Instrument};
use crate::interp::CubicSpline;
use crate::signal::{central_peak, cross_correlate, gaussian_filter1d, tukey};

/// Reference lamp spectrum, degraded to the instrument resolution.
#[derive(Debug, Clone)]
pub struct Atlas {
    /// Flux after convolution with the instrument line-spread function.
    pub flux: Array1<f64>,
    /// Wavelength of each sample in Angstroms.
    pub wave: Array1<f64>,
    /// Atlas dispersion in Angstroms per sample (CDELT1).
    pub disp: f64,
    /// Instrument resolution expressed in atlas samples.
    pub respix: f64,
}

impl Atlas {
    /// Build an atlas from a raw lamp spectrum on a linear wavelength grid.
    ///
    /// The raw spectrum is convolved with a Gaussian whose FWHM matches the
    /// instrument resolution at the central wavelength, so that atlas and arc
    /// features have comparable profiles.
    pub fn new(
        raw_flux: Array1<f64>,
        wave0: f64,
        disp: f64,
        instrument: &Instrument,
    ) -> Result<Self, WavecalError> {
        if raw_flux.len() < 2 {
            return Err(WavecalError::Atlas("atlas spectrum is empty".into()));
        }
        if disp <= 0.0 {
            return Err(WavecalError::Atlas(format!(
                "non-positive atlas dispersion: {disp}"
            )));
        }
        let resolution = instrument.resolution(instrument.cwave);
        let respix = resolution / disp;
        info!("atlas resolution = {resolution:.3} A, or {respix:.2} atlas px");
        // FWHM to sigma
        let flux = gaussian_filter1d(raw_flux.view(), respix / 2.354);
        let wave = Array1::from_iter((0..flux.len()).map(|i| i as f64 * disp + wave0));
        Ok(Atlas {
            flux,
            wave,
            disp,
            respix,
        })
    }

    /// Load the lamp atlas from a FITS file and match it to the instrument
    /// resolution.
    pub fn load(path: &Path, instrument: &Instrument) -> Result<Self, WavecalError> {
        info!("reading atlas spectrum from {}", path.display());
        let (raw_flux, header) = fits::read_spectrum(path)?;
        let disp = header
            .get_float("CDELT1")
            .ok_or_else(|| WavecalError::Atlas("missing CDELT1".into()))?;
        let wave0 = header
            .get_float("CRVAL1")
            .ok_or_else(|| WavecalError::Atlas("missing CRVAL1".into()))?;
        Self::new(raw_flux, wave0, disp, instrument)
    }

    /// Path of the atlas spectrum for a named lamp under `dir`:
    /// `<dir>/<lamp, lowercased>.fits`.
    pub fn path_for_lamp(dir: &Path, lamp: &str) -> PathBuf {
        dir.join(format!("{}.fits", lamp.to_lowercase()))
    }

    /// Load the atlas for the instrument's configured lamp from the spectra
    /// under `dir`.
    pub fn load_for_lamp(dir: &Path, instrument: &Instrument) -> Result<Self, WavecalError> {
        info!("selecting atlas for lamp {}", instrument.lamp);
        Self::load(&Self::path_for_lamp(dir, &instrument.lamp), instrument)
    }

    /// Index of the first sample at or above `wav`, and of the last sample at
    /// or below `maxwav`, as a half-open range into the atlas arrays.
    pub(crate) fn index_range(
        &self,
        minwav: f64,
        maxwav: f64,
    ) -> Result<(usize, usize), WavecalError> {
        let lo = self
            .wave
            .iter()
            .position(|&w| w >= minwav)
            .ok_or_else(|| {
                WavecalError::Atlas(format!("wavelength {minwav:.1} A beyond atlas coverage"))
            })?;
        let hi = self
            .wave
            .iter()
            .rposition(|&w| w <= maxwav)
            .ok_or_else(|| {
                WavecalError::Atlas(format!("wavelength {maxwav:.1} A below atlas coverage"))
            })?;
        if hi <= lo + 2 {
            return Err(WavecalError::Atlas(format!(
                "atlas window {minwav:.1}-{maxwav:.1} A too narrow"
            )));
        }
        Ok((lo, hi))
    }
}

/// Result of the initial alignment between the reference-bar arc and the atlas.
#[derive(Debug, Clone, Copy)]
pub struct AtlasAlignment {
    /// Offset in atlas samples.
    pub offset_pix: isize,
    /// Offset in Angstroms.
    pub offset_wave: f64,
    /// First arc row of the central region used for the alignment.
    pub minrow: usize,
    /// One past the last arc row of the central region.
    pub maxrow: usize,
    /// Arc pixel taken as the wavelength origin (spectrum midpoint).
    pub x0: usize,
}

/// Cross-correlate the reference-bar arc against the atlas to find the
/// wavelength offset of the nominal central-wavelength setting.
///
/// Only the central third of the arc is used (central three fifths for
/// low-dispersion gratings), where the linear model `wave = x * disp + cwave`
/// is still a fair approximation. Both spectra are resampled onto the atlas
/// grid and tapered before correlating, and the peak search is restricted to
/// the central third of the lag axis.
///
/// Sign convention: the true central wavelength is recovered as
/// `cwave - offset_wave`.
pub fn align_to_atlas(
    refarc: ArrayView1<'_, f64>,
    atlas: &Atlas,
    prelim_disp: f64,
    instrument: &Instrument,
    params: &CalibParams,
) -> Result<AtlasAlignment, WavecalError> {
    let n = refarc.len();
    if n < 9 {
        return Err(WavecalError::Alignment(
            "reference arc spectrum too short to align".into(),
        ));
    }
    let x0 = n / 2;
    let obswav =
        Array1::from_iter((0..n).map(|i| (i as f64 - x0 as f64) * prelim_disp + instrument.cwave));

    let (minrow, maxrow) = if instrument.low_dispersion {
        (n / 5, 4 * n / 5)
    } else {
        (n / 3, 2 * n / 3)
    };
    let minwav = obswav[minrow].min(obswav[maxrow]);
    let maxwav = obswav[minrow].max(obswav[maxrow]);
    let (minrw, maxrw) = atlas.index_range(minwav, maxwav)?;

    let cc_refwav = atlas.wave.slice(ndarray::s![minrw..maxrw]);
    let mut cc_reflux = atlas.flux.slice(ndarray::s![minrw..maxrw]).to_owned();

    // Resample the arc onto the atlas grid.
    let spline = CubicSpline::new(
        obswav.slice(ndarray::s![minrow..maxrow]),
        refarc.slice(ndarray::s![minrow..maxrow]),
    );
    let mut cc_obsarc = spline.evaluate_on(cc_refwav);

    let taper = tukey(cc_obsarc.len(), params.taper_fraction);
    cc_obsarc *= &taper;
    cc_reflux *= &taper;

    let (lags, xcorr) = cross_correlate(cc_obsarc.view(), cc_reflux.view());
    let (offset_pix, peak) = central_peak(&lags, &xcorr);
    if peak <= 0.0 {
        return Err(WavecalError::Alignment(
            "no correlation between arc and atlas".into(),
        ));
    }
    let offset_wave = offset_pix as f64 * atlas.disp;
    info!("initial arc-atlas offset (px, A): {offset_pix}, {offset_wave:.1}");
    Ok(AtlasAlignment {
        offset_pix,
        offset_wave,
        minrow,
        maxrow,
        x0,
    })
}
