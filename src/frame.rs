//! Corrected detector frames.

use ndarray::Array2;

/// A corrected, gain-rectified 2-D detector frame.
///
/// The calibration engine only ever reads the pixel data; CCD reduction happens
/// upstream. Rows run along the dispersion direction after rectification, columns
/// along the spatial direction.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, indexed `[row, column]`.
    pub data: Array2<f64>,
    /// Binning factor along x (columns).
    pub xbin: u32,
    /// Binning factor along y (rows).
    pub ybin: u32,
}

impl Frame {
    /// Create a frame from pixel data and binning factors.
    pub fn new(data: Array2<f64>, xbin: u32, ybin: u32) -> Self {
        Self { data, xbin, ybin }
    }

    /// Number of columns.
    pub fn nx(&self) -> usize {
        self.data.shape()[1]
    }

    /// Number of rows.
    pub fn ny(&self) -> usize {
        self.data.shape()[0]
    }
}
