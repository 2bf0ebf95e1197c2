#![warn(missing_docs)]

//! Automated wavelength calibration for multi-slit and image-slicer spectrographs. \
//! Given a continuum-bars calibration exposure and an arc-lamp exposure, this crate
//! locates and traces the fiducial bars across the detector, extracts one arc spectrum
//! per bar, aligns the bars against a reference bar, seeds a wavelength scale from the
//! grating geometry, matches a reference atlas spectrum to the observed arc, and fits a
//! robust polynomial pixel-to-wavelength solution for every bar.
//!
//! CCD reduction (bias, dark, overscan, gain) is out of scope: the input frames are
//! assumed corrected and rectified in amplifier geometry.
//!
//! ## Interface
//! The central struct of this library is [`WavelengthCalibrator`]. It is used to bind
//! the instrument description, override calibration parameters, and run the stages in
//! order. In most cases it should be created with [`WavelengthCalibrator::new()`] and
//! configured via `with_*()` functions.
//!
//! Example:
//! ```rust,ignore
//! let run = WavelengthCalibrator::new(&instrument)
//!     .with_params(CalibParams::default())
//!     .run(&bars_frame, &arc_frame, "data/fear.fits")?;
//! ```
//!
//! The result is a [`CalibrationRun`] holding the control-point table, per-bar offsets
//! and a wavelength solution (coefficients, RMS, line count) for every bar that
//! converged, plus an explicit list of failed bars.
//!
//! ## Stages
//! - [`bars`]: locate and trace the continuum bars, build the control-point table.
//! - [`transform`]: order-3 polynomial spatial transform fit to the control points.
//! - [`extract`]: warp the arc frame, extract one background-subtracted spectrum per bar.
//! - [`align`]: integer-pixel inter-bar offsets via cross-correlation.
//! - [`dispersion`]: preliminary dispersion from the grating equation.
//! - [`atlas`]: atlas loading, resolution matching, and arc-to-atlas alignment.
//! - [`central`]: brute-force dispersion refinement of the central region per bar.
//! - [`lines`]: canonical atlas line list.
//! - [`solve`]: final per-bar 4th-order solution with iterative outlier rejection.

pub mod align;
pub mod atlas;
pub mod bars;
pub mod central;
pub mod dispersion;
pub mod error;
pub mod extract;
pub(crate) mod fits;
pub mod fitting;
pub mod frame;
pub mod instrument;
pub mod interp;
pub mod lines;
pub(crate) mod ndarray_utils;
pub mod pipeline;
pub mod signal;
pub mod solve;
pub mod transform;

pub use error::WavecalError;
pub use frame::Frame;
pub use instrument::{CalibParams, Instrument, Slicer};
pub use pipeline::{CalibrationRun, Diagnostics, WavelengthCalibrator};
pub use solve::BarSolution;

/// A generic float trait such that the signal and fitting utilities are generic over `f32`/`f64`.
///
/// This trait is automatically implemented for all types implementing the supertraits.
/// Particularly, this includes `f32` and `f64`.
/// [`num_traits::Float`] is not a supertrait as the need to specify the provider of the redundant
/// definitions of the basic math functions would clutter the code.
pub trait Float: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}

impl<F> Float for F where F: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}
