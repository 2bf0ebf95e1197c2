//! Inter-bar alignment.
//!
//! Every bar spectrum is cross-correlated against the reference bar to get an integer
//! pixel offset, a first-order position correction later folded into each bar's
//! wavelength zero point.

use log::{debug, info};
use ndarray::{s, Array1};

use crate::error::WavecalError;
use crate::instrument::{CalibParams, Instrument};
use crate::ndarray_utils::argmax;
use crate::signal::cross_correlate;

/// Cross-correlate every bar spectrum against the reference bar.
///
/// Both ends of each spectrum are trimmed by `params.align_trim` px before
/// correlating, to keep warp edge junk out of the product. The offset is the lag of
/// the global correlation maximum (first occurrence on ties). The reference bar
/// itself always reports 0.
///
/// Sign convention: a bar whose features sit `k` px to the right of the reference
/// reports offset `-k`, i.e. the roll to apply to the bar to align it.
pub fn arc_offsets(
    arcs: &[Array1<f64>],
    instrument: &Instrument,
    params: &CalibParams,
) -> Result<Vec<isize>, WavecalError> {
    info!("finding inter-bar offsets");
    let refarc = arcs
        .get(instrument.refbar)
        .ok_or_else(|| WavecalError::Alignment(format!("no reference bar {}", instrument.refbar)))?;
    let t = params.align_trim;
    if refarc.len() <= 2 * t {
        return Err(WavecalError::Alignment("spectrum shorter than trim margins".into()));
    }
    let reftrim = refarc.slice(s![t..refarc.len() - t]);

    let mut offsets = Vec::with_capacity(arcs.len());
    for (na, arc) in arcs.iter().enumerate() {
        let trimmed = arc.slice(s![t..arc.len() - t]);
        let (lags, xcorr) = cross_correlate(reftrim.view(), trimmed.view());
        let peak = argmax(xcorr.view());
        if xcorr[peak] <= 0.0 {
            return Err(WavecalError::Alignment(format!(
                "flat cross-correlation for bar {na}"
            )));
        }
        let offset = lags[peak];
        debug!(
            "arc {na} slice {} xcorr shift = {offset}",
            instrument.slice_of(na)
        );
        offsets.push(offset);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;

    use super::*;
    use crate::instrument::Instrument;

    fn line_spectrum(n: usize, centers: &[f64]) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| {
            centers
                .iter()
                .map(|&c| 100.0 * (-(i as f64 - c).powi(2) / 8.0).exp())
                .sum()
        }))
    }

    #[test]
    fn reference_bar_reports_zero() {
        let spec = line_spectrum(512, &[100.0, 230.0, 400.0]);
        let arcs = vec![spec.clone(), spec.clone(), spec];
        let instrument = Instrument {
            nbars: 3,
            refbar: 1,
            ..Instrument::default()
        };
        let offsets = arc_offsets(&arcs, &instrument, &CalibParams::default()).unwrap();
        assert_eq!(offsets, vec![0, 0, 0]);
    }

    #[test]
    fn shifted_bar_with_noise_reports_minus_shift() {
        let n = 512;
        let refspec = line_spectrum(n, &[100.0, 230.0, 400.0]);
        // copy shifted right by 7 px, with sigma = 0.01 * peak noise
        let mut shifted = Array1::zeros(n);
        for i in 7..n {
            shifted[i] = refspec[i - 7];
        }
        let noise = Array1::random(n, Normal::new(0.0, 1.0).unwrap());
        let shifted = shifted + noise;

        let arcs = vec![refspec.clone(), shifted];
        let instrument = Instrument {
            nbars: 2,
            refbar: 0,
            ..Instrument::default()
        };
        let offsets = arc_offsets(&arcs, &instrument, &CalibParams::default()).unwrap();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], -7);
    }

    #[test]
    fn swapped_reference_flips_the_sign() {
        let n = 512;
        let refspec = line_spectrum(n, &[100.0, 230.0, 400.0]);
        let mut shifted = Array1::zeros(n);
        for i in 7..n {
            shifted[i] = refspec[i - 7];
        }
        let arcs = vec![refspec, shifted];
        let instrument = Instrument {
            nbars: 2,
            refbar: 1,
            ..Instrument::default()
        };
        let offsets = arc_offsets(&arcs, &instrument, &CalibParams::default()).unwrap();
        assert_eq!(offsets[0], 7);
        assert_eq!(offsets[1], 0);
    }
}
