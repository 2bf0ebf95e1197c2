//! Preliminary dispersion from the grating geometry.

use log::info;

use crate::frame::Frame;
use crate::instrument::Instrument;

/// Fixed angular offset between the grating-angle encoder zero point and the true
/// incidence angle, in degrees.
pub const GRATING_ANGLE_OFFSET: f64 = 13.0;

/// Preliminary linear dispersion in Angstroms per binned pixel, from the grating
/// equation.
///
/// The incidence angle alpha comes from the grating and adjustment angles, the
/// diffraction angle beta from the camera articulation; the dispersion follows from
/// `cos(beta) / rho / f_cam`, scaled to the binned pixel size and projected by the
/// mean out-of-plane angle. This estimate only seeds the central-region search; it is
/// never the final answer.
pub fn prelim_dispersion(frame: &Frame, instrument: &Instrument) -> f64 {
    let alpha = instrument.grating_angle - GRATING_ANGLE_OFFSET - instrument.adjustment_angle;
    let beta = instrument.camera_angle - alpha;
    let disp = beta.to_radians().cos() / instrument.rho / instrument.focal_length
        * (instrument.pixel_size * frame.ybin as f64)
        * 1.0e4
        * instrument.gamma.to_radians().cos();
    info!("initial alpha, beta (deg): {alpha:.3}, {beta:.3}");
    info!("initial calculated dispersion (A/binned px): {disp:.3}");
    disp
}
