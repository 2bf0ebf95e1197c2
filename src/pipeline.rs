//! Pipeline orchestration.
//!
//! [`WavelengthCalibrator`] binds an instrument description and calibration
//! parameters, runs the stages in order, and collects everything a caller needs
//! into a [`CalibrationRun`]. Per-bar failures in the central refinement and the
//! final solve are scoped: the run completes with a partial solution set and an
//! explicit list of failed bars.

use std::path::Path;

use itertools::Itertools;
use log::{info, warn};
use ndarray::Array1;

use crate::align::arc_offsets;
use crate::atlas::{align_to_atlas, Atlas, AtlasAlignment};
use crate::bars::{find_bars, trace_bars, BarCentroids, ControlPoints};
use crate::central::CentralSolution;
use crate::dispersion::prelim_dispersion;
use crate::error::WavecalError;
use crate::extract::extract_arcs;
use crate::fitting::std;
use crate::frame::Frame;
use crate::instrument::{CalibParams, Instrument};
use crate::lines::{find_atlas_lines, LineList};
use crate::solve::BarSolution;

/// Observer hooks for intermediate results.
///
/// Every method has an empty default body; implement only what you want to see.
/// The hooks replace interactive inspection in an automated run: attach one to
/// dump plots or tables, or attach none and rely on the log output.
pub trait Diagnostics {
    /// Bar centroids found on the reference row.
    fn bars_located(&mut self, _bars: &BarCentroids) {}
    /// The full control-point table after tracing.
    fn bars_traced(&mut self, _cp: &ControlPoints) {}
    /// One extracted arc spectrum per bar.
    fn arcs_extracted(&mut self, _arcs: &[Array1<f64>]) {}
    /// Integer pixel offsets of each bar relative to the reference bar.
    fn offsets_computed(&mut self, _offsets: &[isize]) {}
    /// Result of the arc-to-atlas cross-correlation.
    fn atlas_aligned(&mut self, _alignment: &AtlasAlignment) {}
    /// Central-region solution of one bar.
    fn central_fit(&mut self, _solution: &CentralSolution) {}
    /// The canonical line list.
    fn lines_selected(&mut self, _lines: &LineList) {}
    /// Final solution of one bar.
    fn bar_solved(&mut self, _solution: &BarSolution) {}
}

/// Everything produced by a calibration run.
#[derive(Debug)]
pub struct CalibrationRun {
    /// Control-point table from the bar trace.
    pub control_points: ControlPoints,
    /// Per-bar pixel offsets relative to the reference bar.
    pub offsets: Vec<isize>,
    /// Preliminary dispersion from the grating geometry, A per binned px.
    pub prelim_disp: f64,
    /// Arc-to-atlas alignment of the reference bar.
    pub alignment: AtlasAlignment,
    /// Central-region solutions for the bars that converged there.
    pub central: Vec<CentralSolution>,
    /// The canonical atlas line list.
    pub lines: LineList,
    /// Final wavelength solutions, one per converged bar.
    pub solutions: Vec<BarSolution>,
    /// Bars that failed, with the error that stopped each one.
    pub failed: Vec<(usize, WavecalError)>,
}

impl CalibrationRun {
    /// True when every bar produced a final solution.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Indices of the bars that failed.
    pub fn failed_bars(&self) -> Vec<usize> {
        self.failed.iter().map(|&(bar, _)| bar).collect_vec()
    }

    /// The final solution for `bar`, if it converged.
    pub fn solution_for(&self, bar: usize) -> Option<&BarSolution> {
        self.solutions.iter().find(|s| s.bar == bar)
    }
}

/// The wavelength-calibration driver.
///
/// Construct with [`WavelengthCalibrator::new()`], adjust via the `with_*()`
/// functions, then call [`run`](WavelengthCalibrator::run) (or
/// [`calibrate`](WavelengthCalibrator::calibrate) with a pre-built [`Atlas`]).
pub struct WavelengthCalibrator<'a> {
    instrument: &'a Instrument,
    params: CalibParams,
    diagnostics: Option<Box<dyn Diagnostics + 'a>>,
}

impl<'a> WavelengthCalibrator<'a> {
    /// A calibrator for `instrument` with default parameters.
    pub fn new(instrument: &'a Instrument) -> Self {
        WavelengthCalibrator {
            instrument,
            params: CalibParams::default(),
            diagnostics: None,
        }
    }

    /// Override the calibration parameters.
    pub fn with_params(mut self, params: CalibParams) -> Self {
        self.params = params;
        self
    }

    /// Attach diagnostics hooks.
    pub fn with_diagnostics(mut self, diagnostics: impl Diagnostics + 'a) -> Self {
        self.diagnostics = Some(Box::new(diagnostics));
        self
    }

    /// Run the full calibration, loading the lamp atlas from `atlas_path`.
    pub fn run(
        &mut self,
        bars_frame: &Frame,
        arc_frame: &Frame,
        atlas_path: impl AsRef<Path>,
    ) -> Result<CalibrationRun, WavecalError> {
        let atlas = Atlas::load(atlas_path.as_ref(), self.instrument)?;
        self.calibrate(bars_frame, arc_frame, &atlas)
    }

    /// Run the full calibration, resolving the atlas file for the instrument's
    /// lamp from the spectra under `atlas_dir`.
    pub fn run_with_atlas_dir(
        &mut self,
        bars_frame: &Frame,
        arc_frame: &Frame,
        atlas_dir: impl AsRef<Path>,
    ) -> Result<CalibrationRun, WavecalError> {
        let atlas = Atlas::load_for_lamp(atlas_dir.as_ref(), self.instrument)?;
        self.calibrate(bars_frame, arc_frame, &atlas)
    }

    /// Run the full calibration against a pre-built atlas.
    pub fn calibrate(
        &mut self,
        bars_frame: &Frame,
        arc_frame: &Frame,
        atlas: &Atlas,
    ) -> Result<CalibrationRun, WavecalError> {
        if bars_frame.nx() != arc_frame.nx()
            || bars_frame.ny() != arc_frame.ny()
            || bars_frame.ybin != arc_frame.ybin
        {
            return Err(WavecalError::Geometry(format!(
                "bars frame {}x{} (ybin {}) does not match arc frame {}x{} (ybin {})",
                bars_frame.nx(),
                bars_frame.ny(),
                bars_frame.ybin,
                arc_frame.nx(),
                arc_frame.ny(),
                arc_frame.ybin
            )));
        }

        info!(
            "calibrating {} bars: grating {}, lamp {}, cwave {:.1} A",
            self.instrument.nbars, self.instrument.grating, self.instrument.lamp,
            self.instrument.cwave
        );

        // geometry
        let located = find_bars(bars_frame, self.instrument, &self.params)?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.bars_located(&located);
        }
        let cp = trace_bars(bars_frame, self.instrument, &self.params, &located)?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.bars_traced(&cp);
        }
        let arcs = extract_arcs(arc_frame, self.instrument, &self.params, &cp)?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.arcs_extracted(&arcs);
        }

        // wavelength seed
        let offsets = arc_offsets(&arcs, self.instrument, &self.params)?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.offsets_computed(&offsets);
        }
        let prelim_disp = prelim_dispersion(arc_frame, self.instrument);
        let alignment = align_to_atlas(
            arcs[self.instrument.refbar].view(),
            atlas,
            prelim_disp,
            self.instrument,
            &self.params,
        )?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.atlas_aligned(&alignment);
        }

        // per-bar refinement, failures scoped
        #[cfg(feature = "parallel")]
        let central_results = crate::central::refine_center_par(
            &arcs,
            &offsets,
            atlas,
            &alignment,
            prelim_disp,
            self.instrument,
            &self.params,
            arc_frame.ybin,
        );
        #[cfg(not(feature = "parallel"))]
        let central_results = crate::central::refine_center(
            &arcs,
            &offsets,
            atlas,
            &alignment,
            prelim_disp,
            self.instrument,
            &self.params,
            arc_frame.ybin,
        );
        let mut central = Vec::new();
        let mut failed: Vec<(usize, WavecalError)> = Vec::new();
        for (bar, result) in central_results.into_iter().enumerate() {
            match result {
                Ok(sol) => {
                    if let Some(d) = self.diagnostics.as_deref_mut() {
                        d.central_fit(&sol);
                    }
                    central.push(sol);
                }
                Err(e) => {
                    warn!("bar {bar} failed central fit: {e}");
                    failed.push((bar, e));
                }
            }
        }

        let lines = find_atlas_lines(&central, arcs[0].len(), atlas, &self.params)?;
        if let Some(d) = self.diagnostics.as_deref_mut() {
            d.lines_selected(&lines);
        }

        #[cfg(feature = "parallel")]
        let solve_results =
            crate::solve::solve_bars_par(&arcs, &central, &lines, self.instrument, &self.params);
        #[cfg(not(feature = "parallel"))]
        let solve_results =
            crate::solve::solve_bars(&arcs, &central, &lines, self.instrument, &self.params);
        let mut solutions = Vec::new();
        for result in solve_results {
            match result {
                Ok(sol) => {
                    if let Some(d) = self.diagnostics.as_deref_mut() {
                        d.bar_solved(&sol);
                    }
                    solutions.push(sol);
                }
                Err(e) => {
                    if let WavecalError::Fit { bar, .. } = e {
                        warn!("bar {bar} failed solve: {e}");
                        failed.push((bar, e));
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        failed.sort_by_key(|&(bar, _)| bar);

        if !solutions.is_empty() {
            let rms: Vec<f64> = solutions.iter().map(|s| s.rms).collect();
            let nls: Vec<f64> = solutions.iter().map(|s| s.nlines as f64).collect();
            let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
            info!("<RMS>     = {:.3} +- {:.3} (A)", mean(&rms), std(&rms));
            info!("<N lines> = {:.1} +- {:.1}", mean(&nls), std(&nls));
        }
        if !failed.is_empty() {
            warn!(
                "{} of {} bars failed: {:?}",
                failed.len(),
                self.instrument.nbars,
                failed.iter().map(|&(b, _)| b).collect_vec()
            );
        }

        Ok(CalibrationRun {
            control_points: cp,
            offsets,
            prelim_disp,
            alignment,
            central,
            lines,
            solutions,
            failed,
        })
    }
}
