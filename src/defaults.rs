//! Default constants for keytap3.
//!
//! This module provides shared constants used across the pipeline stages
//! to ensure consistency and eliminate duplication.

/// Process-wide audio sample rate in Hz.
///
/// The click transient of a key press sits well above 1 kHz, so 24 kHz
/// captures it with headroom while keeping the correlation kernels cheap.
pub const SAMPLE_RATE: u32 = 24_000;

/// Default high-pass cutoff frequency in Hz.
///
/// High-pass filtering emphasizes the click transient and suppresses
/// low-frequency room noise before detection and correlation.
pub const FREQ_CUTOFF_HZ: u32 = 1_500;

/// Detection threshold as a multiple of the local rectified moving average.
pub const DETECT_THRESHOLD: f64 = 8.0;

/// Detection window radius in samples.
pub const DETECT_WINDOW: usize = 512;

/// Refractory period in samples: minimum distance between detected events.
pub const DETECT_REFRACTORY: usize = 2 * 1024;

/// Low-power pruning: events with a peak below this fraction of the mean
/// event peak are dropped.
pub const LOW_POWER_FRACTION: f64 = 0.3;

/// Similarity window alignment span in samples (batch pipeline).
pub const SIM_ALIGN_WINDOW: usize = 2 * 256;

/// Similarity lag search radius in samples.
pub const SIM_LAG_RADIUS: usize = 3 * 32;

/// Similarity correlation window length in samples (batch pipeline).
pub const SIM_CORR_LEN: usize = 2 * 256 - 128;

/// Live decoding uses a wider correlation window than the batch pipeline.
pub const APP_SIM_ALIGN_WINDOW: usize = 3 * 256;

/// Live decoding correlation window length in samples.
pub const APP_SIM_CORR_LEN: usize = 3 * 256 - 128;

/// Alphabet size: 'a'..'z' plus the space separator.
pub const ALPHABET_SIZE: usize = 27;

/// Letter index of the space separator.
pub const SPACE_LETTER: u8 = 26;

/// Order of the n-gram language model.
pub const NGRAM_ORDER: usize = 6;

/// File name of the binary 6-gram table inside the n-gram directory.
pub const NGRAM_FILE: &str = "ggwords-6-gram.dat.binary";

/// Initial cluster-count ceiling for the first clustering iteration.
pub const MAX_CLUSTERS_INITIAL: usize = 29;

/// Cluster-count growth per outer clustering iteration.
pub const CLUSTER_GROWTH_STEP: usize = 4;

/// Number of outer clustering iterations (29, 33, ..., 89).
pub const CLUSTER_GROW_ITERS: usize = 16;

/// Candidate clusterings requested per outer iteration.
pub const CLUSTERINGS_PER_ITER: usize = 32;

/// Weight of the English letter-frequency prior in the decoder score.
pub const W_ENGLISH_FREQ: f64 = 20.0;

/// Wall-clock cap on a live recording session in seconds.
pub const RECORD_LIMIT_SECS: u64 = 2 * 60;

/// Default number of key presses a live session waits for.
pub const KEYS_TO_CAPTURE: usize = 100;

/// Recordings with fewer events than this trigger an insufficient-data
/// warning; decoding is still attempted with an inflated beam.
pub const MIN_KEYPRESSES: usize = 100;

/// Beam width for a recording with `n_events` detected key presses.
///
/// Short recordings get a wide beam (2100); the beam shrinks linearly to
/// 100 as the event count grows, because each hypothesis is costlier to
/// score on a long recording.
pub fn hypotheses_to_keep(n_events: usize) -> usize {
    let over = n_events.saturating_sub(100).min(200);
    (2_100usize.saturating_sub(10 * over)).max(100)
}
