//! Waveform representations and conversions.
//!
//! Two representations coexist: the high-dynamic-range float form used by
//! the filter, and the normalized 16-bit form used by detection and
//! correlation. Normalizing to the peak makes the int16 inner products of
//! the similarity kernel fit comfortably in 64-bit accumulators.

use crate::error::{KeytapError, Result};

/// Peak absolute value of a float waveform.
pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()))
}

/// Convert a float waveform to int16, scaling by the peak absolute value so
/// the loudest sample maps to ±32767.
///
/// An all-zero waveform converts to all zeros (silence must flow through
/// the pipeline). An empty waveform is a conversion error.
pub fn convert_to_i16(samples: &[f32]) -> Result<Vec<i16>> {
    if samples.is_empty() {
        return Err(KeytapError::Conversion {
            message: "empty waveform".to_string(),
        });
    }

    if samples.iter().any(|s| !s.is_finite()) {
        return Err(KeytapError::Conversion {
            message: "waveform contains non-finite samples".to_string(),
        });
    }

    let peak = peak_abs(samples);
    if peak == 0.0 {
        return Ok(vec![0i16; samples.len()]);
    }

    let scale = i16::MAX as f32 / peak;
    Ok(samples
        .iter()
        .map(|&s| (s * scale).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect())
}
