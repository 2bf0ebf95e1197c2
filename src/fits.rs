//! Minimal FITS primary-HDU reader for 1-D reference spectra.
//!
//! Handles the subset of the standard that atlas files use: 2880-byte blocks,
//! 80-character header records, big-endian data with optional BSCALE/BZERO.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ndarray::Array1;

use crate::error::WavecalError;

/// Parsed primary-HDU header, keyword to raw value string.
#[derive(Debug, Clone, Default)]
pub(crate) struct FitsHeader {
    keywords: HashMap<String, String>,
    /// Number of 80-byte records consumed, including END.
    records: usize,
}

impl FitsHeader {
    pub(crate) fn get_int(&self, key: &str) -> Option<i64> {
        self.keywords.get(key)?.parse().ok()
    }

    pub(crate) fn get_float(&self, key: &str) -> Option<f64> {
        let raw = self.keywords.get(key)?;
        raw.replace(['D', 'd'], "E").parse().ok()
    }
}

/// Read a 1-D spectrum from the primary HDU of a FITS file.
///
/// Returns the data vector and the header, which carries the linear wavelength
/// solution keywords (CRVAL1, CDELT1, CRPIX1). A 2-D image degenerates to a
/// spectrum only when one axis has length 1.
pub(crate) fn read_spectrum(path: &Path) -> Result<(Array1<f64>, FitsHeader), WavecalError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_spectrum_from(&mut reader)
}

pub(crate) fn read_spectrum_from<R: Read>(
    reader: &mut R,
) -> Result<(Array1<f64>, FitsHeader), WavecalError> {
    let header = read_header(reader)?;

    let bitpix = header
        .get_int("BITPIX")
        .ok_or_else(|| WavecalError::Atlas("missing BITPIX".into()))?;
    let naxis = header
        .get_int("NAXIS")
        .ok_or_else(|| WavecalError::Atlas("missing NAXIS".into()))?;
    let n1 = header
        .get_int("NAXIS1")
        .ok_or_else(|| WavecalError::Atlas("missing NAXIS1".into()))? as usize;
    let npix = match naxis {
        1 => n1,
        2 => {
            let n2 = header.get_int("NAXIS2").unwrap_or(1) as usize;
            if n1 != 1 && n2 != 1 {
                return Err(WavecalError::Atlas(format!(
                    "expected a 1-D spectrum, got {n1}x{n2} image"
                )));
            }
            n1 * n2
        }
        other => {
            return Err(WavecalError::Atlas(format!(
                "expected a 1-D spectrum, got NAXIS={other}"
            )));
        }
    };

    let bzero = header.get_float("BZERO").unwrap_or(0.0);
    let bscale = header.get_float("BSCALE").unwrap_or(1.0);

    let nbytes = npix * (bitpix.unsigned_abs() as usize / 8);
    let mut buf = vec![0u8; nbytes];
    reader.read_exact(&mut buf)?;

    let data: Vec<f64> = match bitpix {
        8 => buf.iter().map(|&v| v as f64).collect(),
        16 => buf
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]) as f64)
            .collect(),
        32 => buf
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        -32 => buf
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        -64 => buf
            .chunks_exact(8)
            .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        other => {
            return Err(WavecalError::Atlas(format!("unsupported BITPIX {other}")));
        }
    };

    let data = data.into_iter().map(|v| v * bscale + bzero).collect();
    Ok((Array1::from_vec(data), header))
}

fn read_header<R: Read>(reader: &mut R) -> Result<FitsHeader, WavecalError> {
    let mut header = FitsHeader::default();
    let mut record = [0u8; 80];

    loop {
        reader.read_exact(&mut record)?;
        header.records += 1;

        let text = String::from_utf8_lossy(&record);
        let keyword = text[..8].trim();
        if keyword == "END" {
            break;
        }
        if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
            continue;
        }
        if text.len() > 10 && &text[8..10] == "= " {
            let value = text[10..].trim();
            // Strip an inline comment, respecting quoted strings.
            let value = if value.starts_with('\'') {
                match value[1..].find('\'') {
                    Some(end) => value[1..=end].trim(),
                    None => value,
                }
            } else {
                value.split('/').next().unwrap_or(value).trim()
            };
            header.keywords.insert(keyword.to_string(), value.to_string());
        }
    }

    // Headers are padded with blank records to a 2880-byte block boundary.
    let consumed = header.records * 80;
    let padding = (2880 - consumed % 2880) % 2880;
    if padding > 0 {
        let mut skip = vec![0u8; padding];
        reader.read_exact(&mut skip)?;
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use approx::assert_abs_diff_eq;

    use super::*;

    fn record(text: &str) -> [u8; 80] {
        let mut rec = [b' '; 80];
        rec[..text.len()].copy_from_slice(text.as_bytes());
        rec
    }

    fn keyword(key: &str, value: &str) -> [u8; 80] {
        record(&format!("{key:<8}= {value:>20}"))
    }

    fn synthetic_fits(values: &[f32]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&record("SIMPLE  =                    T"));
        buf.extend_from_slice(&keyword("BITPIX", "-32"));
        buf.extend_from_slice(&keyword("NAXIS", "1"));
        buf.extend_from_slice(&keyword("NAXIS1", &values.len().to_string()));
        buf.extend_from_slice(&keyword("CRVAL1", "3000.0"));
        buf.extend_from_slice(&keyword("CDELT1", "0.5"));
        buf.extend_from_slice(&keyword("CRPIX1", "1.0"));
        buf.extend_from_slice(&record("COMMENT test spectrum"));
        buf.extend_from_slice(&record("END"));
        while buf.len() % 2880 != 0 {
            buf.push(b' ');
        }
        for v in values {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        while buf.len() % 2880 != 0 {
            buf.push(0);
        }
        buf
    }

    #[test]
    fn reads_float_spectrum_and_wave_keywords() {
        let values: Vec<f32> = (0..100).map(|i| i as f32 * 0.25).collect();
        let bytes = synthetic_fits(&values);

        let (data, header) = read_spectrum_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(data.len(), 100);
        assert_abs_diff_eq!(data[4], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(header.get_float("CRVAL1").unwrap(), 3000.0);
        assert_abs_diff_eq!(header.get_float("CDELT1").unwrap(), 0.5);
        assert_eq!(header.get_int("NAXIS1"), Some(100));
    }

    #[test]
    fn inline_comments_are_stripped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&record("SIMPLE  =                    T"));
        buf.extend_from_slice(&keyword("BITPIX", "16"));
        buf.extend_from_slice(&keyword("NAXIS", "1"));
        buf.extend_from_slice(&keyword("NAXIS1", "2"));
        buf.extend_from_slice(&record("CDELT1  = 1.0 / Angstroms per pixel"));
        buf.extend_from_slice(&record("END"));
        while buf.len() % 2880 != 0 {
            buf.push(b' ');
        }
        buf.extend_from_slice(&10i16.to_be_bytes());
        buf.extend_from_slice(&(-3i16).to_be_bytes());
        while buf.len() % 2880 != 0 {
            buf.push(0);
        }

        let (data, header) = read_spectrum_from(&mut Cursor::new(&buf)).unwrap();
        assert_abs_diff_eq!(header.get_float("CDELT1").unwrap(), 1.0);
        assert_eq!(data.as_slice().unwrap(), &[10.0, -3.0]);
    }

    #[test]
    fn rejects_true_2d_images() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&record("SIMPLE  =                    T"));
        buf.extend_from_slice(&keyword("BITPIX", "-32"));
        buf.extend_from_slice(&keyword("NAXIS", "2"));
        buf.extend_from_slice(&keyword("NAXIS1", "16"));
        buf.extend_from_slice(&keyword("NAXIS2", "16"));
        buf.extend_from_slice(&record("END"));
        while buf.len() % 2880 != 0 {
            buf.push(b' ');
        }
        buf.resize(buf.len() + 16 * 16 * 4, 0);

        let err = read_spectrum_from(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, WavecalError::Atlas(_)));
    }
}
