//! TOML configuration.
//!
//! Every section has defaults, so a missing file or a sparse file both
//! work; CLI flags override the loaded values, and a small set of
//! environment variables overrides both.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::capture::CaptureParams;
use crate::audio::filter::AudioFilter;
use crate::defaults;
use crate::detect::DetectorConfig;
use crate::pipeline::PipelineConfig;
use crate::similarity::SimilarityConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioSection,
    pub detector: DetectorSection,
    pub similarity: SimilaritySection,
    pub decoder: DecoderSection,
    pub recording: RecordingSection,
}

/// Preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSection {
    pub filter: AudioFilter,
    pub freq_cutoff_hz: u32,
}

/// Keypress detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorSection {
    pub threshold: f64,
    pub window: usize,
    pub refractory: usize,
    pub remove_low_power: bool,
}

/// Similarity engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilaritySection {
    pub align_window: usize,
    pub lag_radius: usize,
    pub corr_len: usize,
}

/// Clusterer and decoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderSection {
    pub w_english_freq: f64,
    pub metropolis_steps_per_event: usize,
    pub seed: u64,
    pub refine_hints: bool,
}

/// Live recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingSection {
    pub capture_id: i32,
    /// 0 uses the capture device's default channel count.
    pub n_channels: u16,
    pub time_limit_secs: u64,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            filter: AudioFilter::default(),
            freq_cutoff_hz: defaults::FREQ_CUTOFF_HZ,
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            threshold: defaults::DETECT_THRESHOLD,
            window: defaults::DETECT_WINDOW,
            refractory: defaults::DETECT_REFRACTORY,
            remove_low_power: true,
        }
    }
}

impl Default for SimilaritySection {
    fn default() -> Self {
        Self {
            align_window: defaults::SIM_ALIGN_WINDOW,
            lag_radius: defaults::SIM_LAG_RADIUS,
            corr_len: defaults::SIM_CORR_LEN,
        }
    }
}

impl Default for DecoderSection {
    fn default() -> Self {
        Self {
            w_english_freq: defaults::W_ENGLISH_FREQ,
            metropolis_steps_per_event: 32,
            seed: 0,
            refine_hints: false,
        }
    }
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            capture_id: 0,
            n_channels: 0,
            time_limit_secs: defaults::RECORD_LIMIT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults only when the file
    /// does not exist. Invalid TOML still fails.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                let not_found = e
                    .downcast_ref::<std::io::Error>()
                    .map(|io| io.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false);
                if not_found {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - KEYTAP3_FREQ_CUTOFF_HZ → audio.freq_cutoff_hz
    /// - KEYTAP3_SEED → decoder.seed
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("KEYTAP3_FREQ_CUTOFF_HZ") {
            if let Ok(cutoff) = value.parse() {
                self.audio.freq_cutoff_hz = cutoff;
            }
        }
        if let Ok(value) = std::env::var("KEYTAP3_SEED") {
            if let Ok(seed) = value.parse() {
                self.decoder.seed = seed;
            }
        }
        self
    }

    /// Detector configuration derived from this config.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold: self.detector.threshold,
            r_win: self.detector.window,
            r_refrac: self.detector.refractory,
            remove_low_power: self.detector.remove_low_power,
        }
    }

    /// Batch pipeline configuration derived from this config.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            filter: self.audio.filter,
            freq_cutoff_hz: self.audio.freq_cutoff_hz,
            detector: self.detector_config(),
            similarity: SimilarityConfig {
                align_window: self.similarity.align_window,
                lag_radius: self.similarity.lag_radius,
                corr_len: self.similarity.corr_len,
            },
            w_english_freq: self.decoder.w_english_freq,
            metropolis_steps_per_event: self.decoder.metropolis_steps_per_event,
            seed: self.decoder.seed,
            refine_hints: self.decoder.refine_hints,
            ..PipelineConfig::default()
        }
    }

    /// Capture parameters derived from this config.
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            capture_id: self.recording.capture_id,
            n_channels: self.recording.n_channels,
            sample_rate: defaults::SAMPLE_RATE,
            filter: AudioFilter::None,
            freq_cutoff_hz: self.audio.freq_cutoff_hz,
        }
    }
}
