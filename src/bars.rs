//! Locating and tracing the continuum bars.
//!
//! The bars exposure images one illuminated fiducial bar per slice subdivision. The
//! locator finds all bar centroids along a band of rows at the vertical midpoint; the
//! tracer then follows each bar away from that reference row and accumulates the
//! control points that define the spatial distortion of the detector.

use log::{debug, info, warn};
use ndarray::{s, Array1};

use crate::error::WavecalError;
use crate::frame::Frame;
use crate::instrument::{CalibParams, Instrument};
use crate::ndarray_utils::{max, mean, median_axis0, min};
use crate::signal::find_peaks;

/// Middle-row bar centroids together with the band geometry that produced them.
#[derive(Clone, Debug)]
pub struct BarCentroids {
    /// One sub-pixel x centroid per bar, in bar order.
    pub centroids: Vec<f64>,
    /// Reference row (vertical midpoint of the frame).
    pub midrow: usize,
    /// Half-width in binned px of the centroid window.
    pub window: usize,
}

/// The control-point table relating nominal to measured bar positions.
///
/// `src` holds nominal positions (the bar's reference-row centroid at every sampled
/// row), `dst` the measured centroids. Both always have equal length, and the
/// destination x of every point equals the owning bar's reference centroid only in
/// `src`; `dst` carries the measured distortion.
#[derive(Clone, Debug)]
pub struct ControlPoints {
    /// Nominal (rectified) coordinates, `[x, y]` per point.
    pub src: Vec<[f64; 2]>,
    /// Measured (distorted) coordinates, `[x, y]` per point.
    pub dst: Vec<[f64; 2]>,
    /// Owning bar per point.
    pub bar_id: Vec<usize>,
    /// Owning slice per point.
    pub slice_id: Vec<usize>,
    /// Reference row the trace started from.
    pub midrow: usize,
    /// Half-width in binned px of the centroid window.
    pub window: usize,
}

/// Flux-weighted centroid of `vec[lo..=hi]` after subtracting the local minimum.
/// The subtraction removes the continuum offset that would otherwise bias the
/// centroid toward the window middle.
fn window_centroid(vec: &Array1<f64>, lo: usize, hi: usize) -> f64 {
    let ys = vec.slice(s![lo..=hi]);
    let floor = min(ys);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in ys.iter().enumerate() {
        let yy = y - floor;
        num += (lo + i) as f64 * yy;
        den += yy;
    }
    num / den
}

/// Locate all continuum bars along the middle of the frame.
///
/// Takes the column-wise median of a narrow band of rows centered on the vertical
/// midpoint, thresholds at the band average, and computes a flux-weighted centroid
/// around every peak. Exactly `instrument.nbars` peaks must be found.
pub fn find_bars(
    frame: &Frame,
    instrument: &Instrument,
    params: &CalibParams,
) -> Result<BarCentroids, WavecalError> {
    info!("finding continuum bars");
    let nx = frame.nx();
    let ny = frame.ny();
    let win = (params.window / frame.ybin as usize).max(1);
    let midy = ny / 2;
    let midvec = median_axis0(frame.data.slice(s![midy - win..=midy + win, ..]));
    let midavg = mean(midvec.view());
    debug!("peak threshold = {midavg:.3}");

    let peaks = find_peaks(midvec.view(), midavg);
    if peaks.len() != instrument.nbars {
        return Err(WavecalError::Geometry(format!(
            "expected {} bars, found {} peaks above {:.3}",
            instrument.nbars,
            peaks.len(),
            midavg
        )));
    }

    let mut centroids = Vec::with_capacity(peaks.len());
    for &peak in &peaks {
        let lo = peak.saturating_sub(win);
        let hi = (peak + win).min(nx - 1);
        centroids.push(window_centroid(&midvec, lo, hi));
    }
    info!("found middle centroids for {} bars", centroids.len());
    Ok(BarCentroids {
        centroids,
        midrow: midy,
        window: win,
    })
}

/// Trace every bar vertically away from the reference row.
///
/// Steps by the binned sample spacing in both directions. At each sample row the
/// centroid window recenters on the nearest integer pixel of the previous accepted
/// centroid; a sample is accepted only while its background-subtracted peak flux
/// stays above `params.trace_flux_min`, and tracing stops at the image edges.
/// Bars trace independently, so a weak bar never blocks the others.
pub fn trace_bars(
    frame: &Frame,
    instrument: &Instrument,
    params: &CalibParams,
    bars: &BarCentroids,
) -> Result<ControlPoints, WavecalError> {
    info!("tracing continuum bars");
    if bars.centroids.is_empty() {
        return Err(WavecalError::Geometry("no bars found to trace".into()));
    }
    let ny = frame.ny();
    let nx = frame.nx();
    let samp = (params.sample_spacing / frame.ybin as usize).max(1);
    let win = bars.window;

    let mut cp = ControlPoints {
        src: Vec::new(),
        dst: Vec::new(),
        bar_id: Vec::new(),
        slice_id: Vec::new(),
        midrow: bars.midrow,
        window: win,
    };

    for (barn, &barx) in bars.centroids.iter().enumerate() {
        cp.src.push([barx, bars.midrow as f64]);
        cp.dst.push([barx, bars.midrow as f64]);
        cp.bar_id.push(barn);
        cp.slice_id.push(instrument.slice_of(barn));

        for dir in [1isize, -1] {
            // window follows the previous accepted centroid
            let mut prev_x = barx;
            let mut samy = bars.midrow as isize + dir * samp as isize;
            loop {
                if samy < win as isize || samy as usize >= ny - win {
                    break;
                }
                let row = samy as usize;
                let xi = (prev_x + 0.5) as usize;
                if xi < win || xi + win >= nx {
                    break;
                }
                let band = frame.data.slice(s![row - win..=row + win, xi - win..=xi + win]);
                let profile = median_axis0(band);
                let floor = min(profile.view());
                if max(profile.view()) - floor <= params.trace_flux_min {
                    break;
                }
                let mut num = 0.0;
                let mut den = 0.0;
                for (i, &y) in profile.iter().enumerate() {
                    let yy = y - floor;
                    num += (xi - win + i) as f64 * yy;
                    den += yy;
                }
                let xc = num / den;
                cp.src.push([barx, row as f64]);
                cp.dst.push([xc, row as f64]);
                cp.bar_id.push(barn);
                cp.slice_id.push(instrument.slice_of(barn));
                prev_x = xc;
                samy += dir * samp as isize;
            }
        }
    }

    let per_bar = cp.src.len() as f64 / bars.centroids.len() as f64;
    info!(
        "traced {} control points ({per_bar:.1} per bar)",
        cp.src.len()
    );
    if per_bar < 3.0 {
        warn!("sparse trace: check the bars exposure level");
    }
    Ok(cp)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;
    use crate::instrument::CalibParams;

    fn test_instrument(nbars: usize) -> Instrument {
        Instrument {
            nbars,
            refbar: nbars / 2,
            ..Instrument::default()
        }
    }

    /// Synthetic bars frame: `nbars` straight Gaussian-profile bars on a flat floor.
    fn bars_frame(nbars: usize, ny: usize, nx: usize, tilt: f64) -> (Frame, Vec<f64>) {
        let mut data = Array2::from_elem((ny, nx), 10.0);
        let spacing = nx as f64 / (nbars as f64 + 1.0);
        let mut truth = Vec::new();
        for b in 0..nbars {
            let x0 = spacing * (b as f64 + 1.0);
            truth.push(x0);
            for r in 0..ny {
                let xc = x0 + tilt * (r as f64 - ny as f64 / 2.0);
                for c in 0..nx {
                    let d = c as f64 - xc;
                    data[[r, c]] += 4000.0 * (-d * d / (2.0 * 2.25)).exp();
                }
            }
        }
        (Frame::new(data, 1, 1), truth)
    }

    #[test]
    fn locator_recovers_known_centroids() {
        let nbars = 12;
        let (frame, truth) = bars_frame(nbars, 200, 400, 0.0);
        let instrument = test_instrument(nbars);
        let found = find_bars(&frame, &instrument, &CalibParams::default()).unwrap();
        assert_eq!(found.centroids.len(), nbars);
        for (got, want) in found.centroids.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 0.1);
        }
    }

    #[test]
    fn locator_handles_saturated_bars() {
        // clipping tops every bar with a flat plateau of equal samples
        let nbars = 12;
        let (mut frame, truth) = bars_frame(nbars, 200, 400, 0.0);
        frame.data.mapv_inplace(|v| v.min(2500.0));
        let instrument = test_instrument(nbars);
        let found = find_bars(&frame, &instrument, &CalibParams::default()).unwrap();
        assert_eq!(found.centroids.len(), nbars);
        for (got, want) in found.centroids.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 0.1);
        }
    }

    #[test]
    fn locator_rejects_wrong_bar_count() {
        let (frame, _) = bars_frame(8, 200, 400, 0.0);
        let instrument = test_instrument(12);
        let err = find_bars(&frame, &instrument, &CalibParams::default());
        assert!(matches!(err, Err(WavecalError::Geometry(_))));
    }

    #[test]
    fn tracer_follows_tilted_bars() {
        let nbars = 6;
        let tilt = 0.02;
        let (frame, truth) = bars_frame(nbars, 400, 300, tilt);
        let instrument = test_instrument(nbars);
        let params = CalibParams::default();
        let bars = find_bars(&frame, &instrument, &params).unwrap();
        let cp = trace_bars(&frame, &instrument, &params, &bars).unwrap();

        assert_eq!(cp.src.len(), cp.dst.len());
        // one middle point plus several in each direction, per bar
        assert!(cp.src.len() > nbars * 3);
        for (k, (src, dst)) in cp.src.iter().zip(cp.dst.iter()).enumerate() {
            let bar = cp.bar_id[k];
            // nominal x is pinned to the reference centroid
            assert_abs_diff_eq!(src[0], bars.centroids[bar], epsilon = 1e-12);
            assert_eq!(src[1], dst[1]);
            // measured x tracks the known tilt
            let expect = truth[bar] + tilt * (dst[1] - 200.0);
            assert_abs_diff_eq!(dst[0], expect, epsilon = 0.2);
        }
    }

    #[test]
    fn tracer_points_monotonic_in_y_per_direction() {
        let nbars = 4;
        let (frame, _) = bars_frame(nbars, 400, 200, 0.01);
        let instrument = test_instrument(nbars);
        let params = CalibParams::default();
        let bars = find_bars(&frame, &instrument, &params).unwrap();
        let cp = trace_bars(&frame, &instrument, &params, &bars).unwrap();
        for bar in 0..nbars {
            let ys: Vec<f64> = cp
                .dst
                .iter()
                .zip(&cp.bar_id)
                .filter(|&(_, &b)| b == bar)
                .map(|(p, _)| p[1])
                .collect();
            let inside = ys
                .iter()
                .all(|&y| y >= bars.window as f64 && y < 400.0 - bars.window as f64);
            assert!(inside);
        }
    }
}
