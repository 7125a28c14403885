//! 6-gram English language model.
//!
//! The model is a binary table mapping a radix-27 packed 6-letter window
//! to a log-probability. It is loaded once at startup and shared read-only
//! by every search; windows absent from the table score a fixed smoothing
//! floor.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::defaults::{ALPHABET_SIZE, NGRAM_FILE, NGRAM_ORDER};
use crate::error::{KeytapError, Result};

/// Smoothing floor distance below the rarest observed n-gram.
const FLOOR_MARGIN: f64 = std::f64::consts::LN_10;

/// Pack a letter window into a radix-27 key: sum of c_i * 27^i.
///
/// Letters are 0..=25 for 'a'..='z' and 26 for space.
pub fn pack_key(window: &[u8]) -> u32 {
    debug_assert!(window.iter().all(|&c| (c as usize) < ALPHABET_SIZE));
    window
        .iter()
        .rev()
        .fold(0u32, |key, &c| key * ALPHABET_SIZE as u32 + c as u32)
}

/// Unpack a radix-27 key back into `order` letters.
pub fn unpack_key(key: u32, order: usize) -> Vec<u8> {
    let mut key = key;
    (0..order)
        .map(|_| {
            let c = (key % ALPHABET_SIZE as u32) as u8;
            key /= ALPHABET_SIZE as u32;
            c
        })
        .collect()
}

/// Immutable 6-gram frequency map.
#[derive(Debug, Clone)]
pub struct FreqMap {
    entries: HashMap<u32, f32>,
    p_floor: f64,
}

impl FreqMap {
    /// Load the binary table: a u32 LE record count, then `count` records
    /// of (u32 LE key, f32 LE logP).
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KeytapError::NgramNotFound {
                path: path.display().to_string(),
            },
            _ => KeytapError::Io(e),
        })?;

        if bytes.len() < 4 {
            return Err(KeytapError::NgramParse {
                message: "file is too short to hold a record count".to_string(),
            });
        }

        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let expected = 4 + count * 8;
        if bytes.len() != expected {
            return Err(KeytapError::NgramParse {
                message: format!(
                    "expected {} bytes for {} records, found {}",
                    expected,
                    count,
                    bytes.len()
                ),
            });
        }
        if count == 0 {
            return Err(KeytapError::NgramParse {
                message: "table holds no records".to_string(),
            });
        }

        let mut entries = HashMap::with_capacity(count);
        let mut min_logp = f64::INFINITY;
        for record in bytes[4..].chunks_exact(8) {
            let key = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let logp = f32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            min_logp = min_logp.min(logp as f64);
            entries.insert(key, logp);
        }

        Ok(Self {
            entries,
            p_floor: min_logp - FLOOR_MARGIN,
        })
    }

    /// Load the table from its conventional file name inside `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(NGRAM_FILE))
    }

    /// Log-probability of a packed window; absent windows score the floor.
    pub fn prob(&self, key: u32) -> f64 {
        self.entries
            .get(&key)
            .map(|&p| p as f64)
            .unwrap_or(self.p_floor)
    }

    /// Log-probability of an unpacked letter window.
    pub fn prob_window(&self, window: &[u8]) -> f64 {
        debug_assert_eq!(window.len(), NGRAM_ORDER);
        self.prob(pack_key(window))
    }

    /// The smoothing floor applied to missing windows.
    pub fn floor(&self) -> f64 {
        self.p_floor
    }

    /// Number of distinct 6-grams in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no records (never after a successful load).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write a binary table; counterpart of [`FreqMap::load`] for building
/// tables from a corpus.
pub fn save(path: &Path, entries: &[(u32, f32)]) -> Result<()> {
    let mut bytes = Vec::with_capacity(4 + entries.len() * 8);
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for &(key, logp) in entries {
        bytes.extend_from_slice(&key.to_le_bytes());
        bytes.extend_from_slice(&logp.to_le_bytes());
    }
    fs::write(path, bytes)?;
    Ok(())
}
