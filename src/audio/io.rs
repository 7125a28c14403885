//! Recording file I/O.
//!
//! The native recording format (`.kbd`) is raw little-endian float32
//! samples with no header. WAV recordings are also accepted for
//! convenience; they are downmixed to mono and resampled to the process
//! sample rate.

use std::fs;
use std::path::Path;

use crate::defaults::SAMPLE_RATE;
use crate::error::{KeytapError, Result};

/// Load a raw `.kbd` recording: little-endian float32 samples, no header.
pub fn load_kbd(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => KeytapError::RecordingNotFound {
            path: path.display().to_string(),
        },
        _ => KeytapError::Io(e),
    })?;

    if bytes.len() % 4 != 0 {
        return Err(KeytapError::RecordingFormat {
            message: format!(
                "file size {} is not a multiple of the 4-byte sample size",
                bytes.len()
            ),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Save a float waveform as a raw `.kbd` recording.
pub fn save_kbd(path: &Path, samples: &[f32]) -> Result<()> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Load a WAV recording, downmixing to mono and resampling to 24 kHz.
pub fn load_wav(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            KeytapError::RecordingNotFound {
                path: path.display().to_string(),
            }
        }
        other => KeytapError::RecordingFormat {
            message: format!("failed to parse WAV file: {}", other),
        },
    })?;

    let spec = reader.spec();
    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| KeytapError::RecordingFormat {
                message: format!("failed to read WAV samples: {}", e),
            })?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| KeytapError::RecordingFormat {
                    message: format!("failed to read WAV samples: {}", e),
                })?
        }
    };

    let mono = downmix(&raw, spec.channels);
    Ok(resample(&mono, spec.sample_rate, SAMPLE_RATE))
}

/// Load a recording, dispatching on the file extension.
pub fn load_recording(path: &Path) -> Result<Vec<f32>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("wav") => load_wav(path),
        _ => load_kbd(path),
    }
}

/// Average interleaved channels down to mono.
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as f32
            }
        })
        .collect()
}
