//! Error types for keytap3.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeytapError {
    // Recording I/O errors
    #[error("Recording file not found at {path}")]
    RecordingNotFound { path: String },

    #[error("Recording file is malformed: {message}")]
    RecordingFormat { message: String },

    // Preprocessing errors
    #[error("Waveform conversion failed: {message}")]
    Conversion { message: String },

    // Detection / similarity errors
    #[error("Too few keypresses for similarity analysis: found {found}, need at least {needed}")]
    TooFewKeypresses { found: usize, needed: usize },

    // N-gram model errors
    #[error("N-gram table not found at {path}")]
    NgramNotFound { path: String },

    #[error("Failed to parse n-gram table: {message}")]
    NgramParse { message: String },

    // Audio capture errors
    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, KeytapError>;
