//! Arc spectrum extraction.
//!
//! Warps the arc-lamp frame into the rectified coordinate system defined by the bar
//! trace and extracts one background-subtracted 1-D spectrum per bar.

use log::{debug, info};
use ndarray::{s, Array1};

use crate::bars::ControlPoints;
use crate::error::WavecalError;
use crate::frame::Frame;
use crate::instrument::{CalibParams, Instrument};
use crate::ndarray_utils::{median_axis1, min};
use crate::transform::PolyTransform2D;

/// Order of the spatial transform fitted to the control points.
pub const TRANSFORM_ORDER: usize = 3;

/// Warp the arc frame with the trace transform and extract one spectrum per bar.
///
/// For every control point on the reference row, the spectrum is the row-wise median
/// of a window of the trace half-width around the bar position, minus a local-minimum
/// baseline estimated away from the spectrum ends (the outermost
/// `params.baseline_trim` px carry warp edge artifacts).
pub fn extract_arcs(
    arc: &Frame,
    instrument: &Instrument,
    params: &CalibParams,
    cp: &ControlPoints,
) -> Result<Vec<Array1<f64>>, WavecalError> {
    info!("fitting spatial control points");
    let tform = PolyTransform2D::estimate(&cp.src, &cp.dst, TRANSFORM_ORDER)?;
    info!("transforming arc image");
    let warped = tform.warp(&arc.data);

    info!("extracting arcs");
    let ny = warped.shape()[0];
    let nx = warped.shape()[1];
    let win = cp.window;
    let mut arcs = Vec::new();
    for (point, _) in cp
        .src
        .iter()
        .zip(cp.bar_id.iter())
        .filter(|(p, _)| p[1] as usize == cp.midrow)
    {
        let xi = (point[0] + 0.5) as usize;
        if xi < win || xi + win >= nx {
            continue;
        }
        let mut spec = median_axis1(warped.slice(s![.., xi - win..=xi + win]));
        let trim = params.baseline_trim.min(ny / 4);
        let floor = min(spec.slice(s![trim..ny - trim]));
        spec -= floor;
        arcs.push(spec);
    }

    if arcs.len() != instrument.nbars {
        return Err(WavecalError::Extraction {
            expected: instrument.nbars,
            found: arcs.len(),
        });
    }
    debug!("extracted {} arcs of length {}", arcs.len(), ny);
    Ok(arcs)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;
    use crate::bars::{find_bars, trace_bars};
    use crate::instrument::Instrument;

    /// Bars and arc frames sharing one synthetic distortion-free geometry; the arc
    /// contains two emission lines at known rows.
    fn synthetic_pair(nbars: usize, ny: usize, nx: usize) -> (Frame, Frame) {
        let spacing = nx as f64 / (nbars as f64 + 1.0);
        let mut bars = Array2::from_elem((ny, nx), 5.0);
        let mut arc = Array2::from_elem((ny, nx), 5.0);
        for b in 0..nbars {
            let x0 = spacing * (b as f64 + 1.0);
            for r in 0..ny {
                for c in 0..nx {
                    let d = c as f64 - x0;
                    let profile = (-d * d / (2.0 * 2.25)).exp();
                    bars[[r, c]] += 4000.0 * profile;
                    for line_row in [ny / 3, 2 * ny / 3] {
                        let dy = r as f64 - line_row as f64;
                        arc[[r, c]] += 3000.0 * profile * (-dy * dy / (2.0 * 4.0)).exp();
                    }
                }
            }
        }
        (Frame::new(bars, 1, 1), Frame::new(arc, 1, 1))
    }

    #[test]
    fn extracts_one_spectrum_per_bar_with_lines() {
        let nbars = 6;
        let (ny, nx) = (450, 300);
        let (bars_frame, arc_frame) = synthetic_pair(nbars, ny, nx);
        let instrument = Instrument {
            nbars,
            refbar: 3,
            ..Instrument::default()
        };
        let params = CalibParams::default();
        let located = find_bars(&bars_frame, &instrument, &params).unwrap();
        let cp = trace_bars(&bars_frame, &instrument, &params, &located).unwrap();
        let arcs = extract_arcs(&arc_frame, &instrument, &params, &cp).unwrap();

        assert_eq!(arcs.len(), nbars);
        for arc in &arcs {
            assert_eq!(arc.len(), ny);
            // baseline removed, emission lines present at the expected rows
            assert!(arc[ny / 2].abs() < 1.0);
            assert!(arc[ny / 3] > 1000.0);
            assert!(arc[2 * ny / 3] > 1000.0);
            let trim = params.baseline_trim.min(ny / 4);
            let inner_min = arc
                .slice(ndarray::s![trim..ny - trim])
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            assert_abs_diff_eq!(inner_min, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn arc_count_mismatch_is_reported() {
        let nbars = 6;
        let (bars_frame, arc_frame) = synthetic_pair(nbars, 450, 300);
        let instrument = Instrument {
            nbars: nbars + 1,
            refbar: 3,
            ..Instrument::default()
        };
        let params = CalibParams::default();
        // trace with the true bar count, then demand one more at extraction
        let true_instrument = Instrument {
            nbars,
            ..instrument.clone()
        };
        let located = find_bars(&bars_frame, &true_instrument, &params).unwrap();
        let cp = trace_bars(&bars_frame, &true_instrument, &params, &located).unwrap();
        let err = extract_arcs(&arc_frame, &instrument, &params, &cp);
        assert!(matches!(
            err,
            Err(WavecalError::Extraction {
                expected: 7,
                found: 6
            })
        ));
    }
}
