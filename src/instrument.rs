//! Instrument geometry and calibration parameters.

/// Image-slicer element in the optical path.
///
/// The slicer determines how much an extracted arc spectrum is boxcar-smoothed
/// before line fitting: the small slicer needs none, the large slicer a 5 px kernel,
/// anything else 3 px.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slicer {
    /// Small image slicer; spectra are used unsmoothed.
    Small,
    /// Medium image slicer; 3 px boxcar.
    Medium,
    /// Large image slicer; 5 px boxcar.
    Large,
}

impl Slicer {
    /// Boxcar kernel width used when smoothing an arc spectrum from this slicer.
    pub fn smoothing_width(self) -> usize {
        match self {
            Slicer::Small => 1,
            Slicer::Medium => 3,
            Slicer::Large => 5,
        }
    }
}

/// Instrument-geometry scalars and constants for one spectrograph configuration.
///
/// Angles are in degrees, lengths in mm, wavelengths in Angstroms.
#[derive(Clone, Debug)]
pub struct Instrument {
    /// Number of continuum bars in a bars exposure.
    pub nbars: usize,
    /// Index of the reference bar.
    pub refbar: usize,
    /// Number of adjacent bars sharing one slicer element.
    pub bars_per_slice: usize,
    /// Detector pixel size in mm.
    pub pixel_size: f64,
    /// Camera focal length in mm.
    pub focal_length: f64,
    /// Mean out-of-plane angle of diffraction in degrees.
    pub gamma: f64,
    /// Grating angle in degrees.
    pub grating_angle: f64,
    /// Camera articulation angle in degrees.
    pub camera_angle: f64,
    /// Grating adjustment angle in degrees.
    pub adjustment_angle: f64,
    /// Grating groove density in lines per mm.
    pub rho: f64,
    /// Nominal central wavelength of the setup in Angstroms.
    pub cwave: f64,
    /// Grating identifier; low-dispersion gratings widen the alignment sub-range.
    pub grating: String,
    /// Whether the grating is a low-dispersion one (e.g. "BL", "RL").
    pub low_dispersion: bool,
    /// Illuminating arc lamp identifier, selects the atlas spectrum.
    pub lamp: String,
    /// Image slicer in use.
    pub slicer: Slicer,
    /// Resolving power used to evaluate the instrumental resolution.
    pub resolving_power: f64,
}

impl Default for Instrument {
    /// The medium-slicer, blue-medium-grating configuration the calibration was
    /// commissioned with.
    fn default() -> Self {
        Self {
            nbars: 120,
            refbar: 57,
            bars_per_slice: 5,
            pixel_size: 0.0150,
            focal_length: 305.0,
            gamma: 4.0,
            grating_angle: 31.0,
            camera_angle: 34.0,
            adjustment_angle: 0.0,
            rho: 1.901,
            cwave: 4500.0,
            grating: "BM".into(),
            low_dispersion: false,
            lamp: "fear".into(),
            slicer: Slicer::Medium,
            resolving_power: 1800.0,
        }
    }
}

impl Instrument {
    /// Instrumental resolution element in Angstroms at the given wavelength.
    pub fn resolution(&self, wave: f64) -> f64 {
        wave / self.resolving_power
    }

    /// Slice index for a bar.
    pub fn slice_of(&self, bar: usize) -> usize {
        bar / self.bars_per_slice
    }
}

/// Tunable calibration constants.
///
/// The defaults are the values the calibration was commissioned with; they have no
/// derivation beyond having been tuned on real exposures, so they are kept as named,
/// overridable parameters rather than hard-coded.
#[derive(Clone, Debug)]
pub struct CalibParams {
    /// Unbinned half-width in px of the bar centroid window; binned by the frame's y-binning.
    /// Default: 10
    pub window: usize,
    /// Unbinned vertical sample spacing in px when tracing bars. Default: 80
    pub sample_spacing: usize,
    /// Minimum background-subtracted peak flux for a trace sample to count as signal.
    /// Default: 255.0
    pub trace_flux_min: f64,
    /// Pixels trimmed from both spectrum ends before inter-bar cross-correlation.
    /// Default: 10
    pub align_trim: usize,
    /// Pixels excluded from both ends when estimating the arc baseline. Default: 100
    pub baseline_trim: usize,
    /// Fractional half-range of the brute-force dispersion search. Default: 0.05
    pub max_ddisp: f64,
    /// Dense resample factor for the dispersion search interpolation. Default: 100
    pub disp_resample: usize,
    /// Cosine-taper fraction applied before atlas cross-correlations. Default: 0.2
    pub taper_fraction: f64,
    /// Margin in Angstroms inside the common wavelength window. Default: 10.0
    pub wave_margin: f64,
    /// Pixels excluded at both spectrum ends when collecting atlas lines. Default: 50
    pub line_edge_margin: usize,
    /// Minimum atlas peak separation in units of the resolution in atlas px. Default: 4.0
    pub peak_separation: f64,
    /// Acceptable atlas line width band in units of the resolution in atlas px.
    /// Default: (0.5, 3.0)
    pub peak_width_range: (f64, f64),
    /// Sigma-clip factor applied to fitted atlas line widths. Default: 2.0
    pub width_clip_sigma: f64,
    /// Sigma-clip iterations on fitted atlas line widths. Default: 2
    pub width_clip_iters: usize,
    /// Maximum |Gaussian center - interpolated peak| for an atlas line, in Angstroms.
    /// Default: 2.0
    pub atlas_peak_offset_max: f64,
    /// Minimum flux for a line window in the per-bar solver. Default: 50.0
    pub line_flux_min: f64,
    /// Minimum sample count of an accepted line window. Default: 5
    pub line_window_min: usize,
    /// Maximum |centroid - interpolated peak| in px in the per-bar solver. Default: 0.7
    pub peak_centroid_max: f64,
    /// Residual rejection threshold in units of the residual standard deviation.
    /// Default: 2.5
    pub reject_sigma: f64,
    /// Number of rejection/refit iterations of the per-bar solver. Default: 3
    pub reject_iters: usize,
    /// Polynomial order of the final per-bar fit. Default: 4
    pub fit_order: usize,
}

impl Default for CalibParams {
    fn default() -> Self {
        Self {
            window: 10,
            sample_spacing: 80,
            trace_flux_min: 255.0,
            align_trim: 10,
            baseline_trim: 100,
            max_ddisp: 0.05,
            disp_resample: 100,
            taper_fraction: 0.2,
            wave_margin: 10.0,
            line_edge_margin: 50,
            peak_separation: 4.0,
            peak_width_range: (0.5, 3.0),
            width_clip_sigma: 2.0,
            width_clip_iters: 2,
            atlas_peak_offset_max: 2.0,
            line_flux_min: 50.0,
            line_window_min: 5,
            peak_centroid_max: 0.7,
            reject_sigma: 2.5,
            reject_iters: 3,
            fit_order: 4,
        }
    }
}
