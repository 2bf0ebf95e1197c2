//! Error taxonomy of the calibration engine.
//!
//! Geometry and extraction errors are fatal to a run: without the bar geometry nothing
//! downstream is usable. Fit errors in the central refinement and the per-bar solver
//! are scoped to the offending bar; the run completes with a partial solution set.

use thiserror::Error;

/// Errors reported by the wavelength calibration stages.
#[derive(Error, Debug)]
pub enum WavecalError {
    /// Wrong bar count, trace failure, or a degenerate spatial transform.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Arc count mismatch after warping and extraction.
    #[error("extraction error: expected {expected} arcs, extracted {found}")]
    Extraction {
        /// Number of bars the instrument defines.
        expected: usize,
        /// Number of arcs actually extracted.
        found: usize,
    },

    /// Cross-correlation failed to produce a usable peak.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Atlas spectrum missing or unreadable for the requested lamp.
    #[error("atlas error: {0}")]
    Atlas(String),

    /// A fit was underdetermined or numerically singular.
    #[error("fit error for bar {bar}: {reason}")]
    Fit {
        /// Index of the bar whose fit failed.
        bar: usize,
        /// What went wrong.
        reason: String,
    },
}

impl From<std::io::Error> for WavecalError {
    fn from(err: std::io::Error) -> Self {
        WavecalError::Atlas(err.to_string())
    }
}
