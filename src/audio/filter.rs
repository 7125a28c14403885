//! High-pass filtering of the float waveform.
//!
//! The click transient of a key press is broadband; high-pass filtering
//! suppresses room rumble and mains hum so the detector sees the transient
//! against a quiet background.

use serde::{Deserialize, Serialize};

use crate::error::{KeytapError, Result};

/// Selectable waveform filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioFilter {
    /// Pass the waveform through unchanged.
    None,
    /// First-order RC high-pass.
    #[default]
    FirstOrderHighPass,
    /// Second-order biquad high-pass (Q = 1/sqrt(2)).
    SecondOrderHighPass,
}

impl AudioFilter {
    /// Map a numeric filter id (CLI `-F` flag) to a filter.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(AudioFilter::None),
            1 => Ok(AudioFilter::FirstOrderHighPass),
            2 => Ok(AudioFilter::SecondOrderHighPass),
            _ => Err(KeytapError::Other(format!("Unknown filter id: {}", id))),
        }
    }
}

/// Apply `filter` to `samples` in place.
///
/// `cutoff_hz` is ignored for [`AudioFilter::None`]. A cutoff at or above
/// the Nyquist frequency leaves the waveform unchanged.
pub fn filter(samples: &mut [f32], filter: AudioFilter, cutoff_hz: u32, sample_rate: u32) {
    if samples.is_empty() || cutoff_hz == 0 || 2 * cutoff_hz >= sample_rate {
        return;
    }

    match filter {
        AudioFilter::None => {}
        AudioFilter::FirstOrderHighPass => first_order_high_pass(samples, cutoff_hz, sample_rate),
        AudioFilter::SecondOrderHighPass => second_order_high_pass(samples, cutoff_hz, sample_rate),
    }
}

/// First-order RC high-pass: y[i] = a * (y[i-1] + x[i] - x[i-1]).
fn first_order_high_pass(samples: &mut [f32], cutoff_hz: u32, sample_rate: u32) {
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff_hz as f64);
    let dt = 1.0 / sample_rate as f64;
    let alpha = rc / (rc + dt);

    let mut x_prev = samples[0] as f64;
    let mut y_prev = samples[0] as f64;
    samples[0] = y_prev as f32;

    for s in samples.iter_mut().skip(1) {
        let x = *s as f64;
        let y = alpha * (y_prev + x - x_prev);
        *s = y as f32;
        x_prev = x;
        y_prev = y;
    }
}

/// Second-order high-pass biquad, RBJ cookbook coefficients, Q = 1/sqrt(2).
fn second_order_high_pass(samples: &mut [f32], cutoff_hz: u32, sample_rate: u32) {
    let w0 = 2.0 * std::f64::consts::PI * cutoff_hz as f64 / sample_rate as f64;
    let q = std::f64::consts::FRAC_1_SQRT_2;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();

    let a0 = 1.0 + alpha;
    let b0 = (1.0 + cos_w0) / 2.0 / a0;
    let b1 = -(1.0 + cos_w0) / a0;
    let b2 = (1.0 + cos_w0) / 2.0 / a0;
    let a1 = -2.0 * cos_w0 / a0;
    let a2 = (1.0 - alpha) / a0;

    let (mut x1, mut x2) = (0.0f64, 0.0f64);
    let (mut y1, mut y2) = (0.0f64, 0.0f64);

    for s in samples.iter_mut() {
        let x = *s as f64;
        let y = b0 * x + b1 * x1 + b2 * x2 - a1 * y1 - a2 * y2;
        *s = y as f32;
        x2 = x1;
        x1 = x;
        y2 = y1;
        y1 = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::SAMPLE_RATE;

    fn dc_signal(len: usize, value: f32) -> Vec<f32> {
        vec![value; len]
    }

    #[test]
    fn none_leaves_waveform_unchanged() {
        let mut samples = dc_signal(1000, 0.5);
        filter(&mut samples, AudioFilter::None, 1500, SAMPLE_RATE);
        assert!(samples.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn first_order_removes_dc() {
        let mut samples = dc_signal(10_000, 0.5);
        filter(&mut samples, AudioFilter::FirstOrderHighPass, 1500, SAMPLE_RATE);
        // After the transient the output of a high-pass on DC decays to zero.
        assert!(samples[9_999].abs() < 1e-3, "tail = {}", samples[9_999]);
    }

    #[test]
    fn second_order_removes_dc() {
        let mut samples = dc_signal(10_000, 0.5);
        filter(&mut samples, AudioFilter::SecondOrderHighPass, 1500, SAMPLE_RATE);
        assert!(samples[9_999].abs() < 1e-3, "tail = {}", samples[9_999]);
    }

    #[test]
    fn high_frequency_content_passes() {
        // 6 kHz tone at 24 kHz sample rate, well above the 1.5 kHz cutoff.
        let mut samples: Vec<f32> = (0..4_800)
            .map(|i| (2.0 * std::f32::consts::PI * 6_000.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        let before: f32 = samples.iter().map(|s| s * s).sum();
        filter(&mut samples, AudioFilter::FirstOrderHighPass, 1500, SAMPLE_RATE);
        let after: f32 = samples.iter().map(|s| s * s).sum();
        assert!(after > 0.5 * before, "before = {}, after = {}", before, after);
    }

    #[test]
    fn empty_waveform_is_noop() {
        let mut samples: Vec<f32> = vec![];
        filter(&mut samples, AudioFilter::FirstOrderHighPass, 1500, SAMPLE_RATE);
        assert!(samples.is_empty());
    }

    #[test]
    fn filter_id_mapping() {
        assert_eq!(AudioFilter::from_id(0).unwrap(), AudioFilter::None);
        assert_eq!(AudioFilter::from_id(1).unwrap(), AudioFilter::FirstOrderHighPass);
        assert_eq!(AudioFilter::from_id(2).unwrap(), AudioFilter::SecondOrderHighPass);
        assert!(AudioFilter::from_id(3).is_err());
    }
}
