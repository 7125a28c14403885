//! Command-line interfaces for the batch and live binaries.
//!
//! Argument parsing uses clap derive macros. The short flags take attached
//! values (`-F1`, `-f1500`) to match the historical surface.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Recover typed text from a keyboard-audio recording.
#[derive(Parser, Debug)]
#[command(name = "keytap3", version, about = "Acoustic keyboard eavesdropping (batch)")]
pub struct BatchCli {
    /// Recording file (.kbd raw float32, or .wav)
    pub record: PathBuf,

    /// Directory holding the 6-gram table
    pub ngram_dir: PathBuf,

    /// Filter type: 0 - none, 1 - first order high-pass, 2 - second order high-pass
    #[arg(short = 'F', value_name = "TYPE")]
    pub filter: Option<u8>,

    /// Cutoff frequency in Hz
    #[arg(short = 'f', value_name = "HZ")]
    pub freq_cutoff: Option<u32>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// RNG seed for the clustering search
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Iteratively pin high-agreement positions and re-decode
    #[arg(long)]
    pub refine_hints: bool,
}

/// Record a typing session live, then recover the text.
#[derive(Parser, Debug)]
#[command(
    name = "keytap3-app",
    version,
    about = "Acoustic keyboard eavesdropping (live)"
)]
pub struct AppCli {
    /// Output recording file (.kbd raw float32)
    pub output: PathBuf,

    /// Directory holding the 6-gram table
    pub ngram_dir: PathBuf,

    /// Number of keypresses to capture before decoding
    pub n_keys: usize,

    /// Capture device index (0 = default device)
    #[arg(short = 'c', value_name = "ID")]
    pub capture_id: Option<i32>,

    /// Number of capture channels (0 = device default)
    #[arg(short = 'C', value_name = "N")]
    pub n_channels: Option<u16>,

    /// Filter type: 0 - none, 1 - first order high-pass, 2 - second order high-pass
    #[arg(short = 'F', value_name = "TYPE")]
    pub filter: Option<u8>,

    /// Cutoff frequency in Hz
    #[arg(short = 'f', value_name = "HZ")]
    pub freq_cutoff: Option<u32>,

    /// Recording time cap (e.g. 120s, 2m, 1m30s)
    #[arg(short = 't', long = "time-limit", value_name = "DURATION", value_parser = parse_duration)]
    pub time_limit: Option<Duration>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parse a duration string: bare numbers are seconds, otherwise any format
/// accepted by `humantime` (`30s`, `2m`, `1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
