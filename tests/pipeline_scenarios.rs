// tests/pipeline_scenarios.rs
//! End-to-end behavior of the batch pipeline stages on synthetic
//! recordings: silence, isolated impulses, and impulse trains.

use keytap3::defaults::{self, NGRAM_FILE};
use keytap3::detect;
use keytap3::ngram::{self, pack_key, FreqMap};
use keytap3::pipeline::{self, PipelineConfig, SilentProgress};
use keytap3::similarity::{self, SimilarityConfig};
use tempfile::tempdir;

fn tiny_freq_map() -> (tempfile::TempDir, FreqMap) {
    let dir = tempdir().unwrap();
    let entries: Vec<(u32, f32)> = (0..12u8).map(|i| (pack_key(&[i; 6]), -2.0)).collect();
    ngram::save(&dir.path().join(NGRAM_FILE), &entries).unwrap();
    let map = FreqMap::load_from_dir(dir.path()).unwrap();
    (dir, map)
}

fn fast_cfg() -> PipelineConfig {
    PipelineConfig {
        similarity: SimilarityConfig {
            align_window: 64,
            lag_radius: 8,
            corr_len: 48,
        },
        cluster_grow_iters: 1,
        clusterings_per_iter: 2,
        metropolis_steps_per_event: 4,
        n_hypotheses_override: Some(32),
        ..PipelineConfig::default()
    }
}

#[test]
fn ten_seconds_of_silence_produces_nothing() {
    let (_dir, freq_map) = tiny_freq_map();
    let samples = vec![0.0f32; 10 * defaults::SAMPLE_RATE as usize];

    let output = pipeline::run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap();
    assert_eq!(output.n_events, 0);
    assert!(output.solutions.is_empty());
    assert!(output.decoded_best().is_none());
}

#[test]
fn single_impulse_is_found_near_its_true_offset() {
    let cfg = fast_cfg();
    let mut samples = vec![0.0f32; 4 * defaults::SAMPLE_RATE as usize];
    samples[48_000] = 0.5;

    let wave = pipeline::preprocess(&samples, &cfg).unwrap();
    let detection = detect::find_keypresses(&wave, &cfg.detector);

    assert_eq!(detection.presses.len(), 1);
    let offset = detection.presses[0].offset as i64;
    assert!(
        (offset - 48_000).abs() <= 16,
        "offset = {} (expected 48000 +/- 16)",
        offset
    );
}

#[test]
fn two_identical_impulses_correlate_perfectly() {
    let cfg = PipelineConfig {
        similarity: SimilarityConfig::default(),
        ..fast_cfg()
    };
    let mut samples = vec![0.0f32; 4 * defaults::SAMPLE_RATE as usize];
    samples[40_000] = 0.5;
    samples[50_000] = 0.5;

    let wave = pipeline::preprocess(&samples, &cfg).unwrap();
    let detection = detect::find_keypresses(&wave, &cfg.detector);
    assert_eq!(detection.presses.len(), 2);

    let sim = similarity::calculate_similarity_map(&wave, &detection.presses, &cfg.similarity);
    let entry = sim.get(0, 1);
    assert!((entry.cc - 1.0).abs() < 1e-6, "cc = {}", entry.cc);
    assert_eq!(entry.offset, 0);
}

#[test]
fn impulse_train_detects_one_event_per_impulse() {
    let cfg = fast_cfg();
    let mut samples = vec![0.0f32; 200_000];
    let period = 4_000;
    let count = 40;
    for i in 0..count {
        samples[10_000 + i * period] = 0.4;
    }

    let wave = pipeline::preprocess(&samples, &cfg).unwrap();
    let detection = detect::find_keypresses(&wave, &cfg.detector);

    assert_eq!(detection.presses.len(), count);
    for pair in detection.presses.windows(2) {
        assert!(pair[1].offset - pair[0].offset >= defaults::DETECT_REFRACTORY);
    }
}

#[test]
fn detected_offsets_are_strictly_increasing() {
    let cfg = fast_cfg();
    let mut samples = vec![0.0f32; 120_000];
    for i in 0..8 {
        samples[20_000 + i * 9_000] = 0.5;
    }

    let wave = pipeline::preprocess(&samples, &cfg).unwrap();
    let detection = detect::find_keypresses(&wave, &cfg.detector);
    assert_eq!(detection.presses.len(), 8);
    for pair in detection.presses.windows(2) {
        assert!(pair[0].offset < pair[1].offset);
    }
}
