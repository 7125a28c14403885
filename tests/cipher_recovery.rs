// tests/cipher_recovery.rs
//! Full-pipeline recovery of a synthetic typing session: 27 distinct
//! click templates replayed according to a known sentence, with injected
//! noise at 20 dB SNR.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::{tempdir, TempDir};

use keytap3::cipher::{char_to_letter, Letter};
use keytap3::defaults::{NGRAM_FILE, NGRAM_ORDER};
use keytap3::ngram::{self, pack_key, FreqMap};
use keytap3::pipeline::{self, PipelineConfig, SilentProgress};
use keytap3::similarity::SimilarityConfig;

/// Ground-truth sentence; uses every letter of the alphabet.
const SENTENCE: &str = "the quick brown fox jumps over the lazy dog while the jovial zebra \
     quickly waxed the big frame and the dog jumped over the fox again before the quick \
     brown fox ran away from the lazy dog into the warm night and then the quick zebra \
     ran off into the dark woods while the dog slept by the door";

const N_EVENTS: usize = 200;
const EVENT_SPACING: usize = 2_500;
const TEMPLATE_LEN: usize = 64;
const NOISE_AMPLITUDE: f32 = 0.05;

fn truth_letters() -> Vec<Letter> {
    let letters: Vec<Letter> = SENTENCE.chars().filter_map(char_to_letter).collect();
    assert!(letters.len() >= N_EVENTS, "sentence is too short");
    letters[..N_EVENTS].to_vec()
}

/// One distinct click template per alphabet symbol: independent random
/// bursts, mutually near-orthogonal.
fn click_templates(rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    (0..27)
        .map(|_| {
            (0..TEMPLATE_LEN)
                .map(|_| rng.gen_range(-0.45..0.45))
                .collect()
        })
        .collect()
}

/// Replay the templates along the sentence and add broadband noise.
fn synth_waveform(letters: &[Letter], rng: &mut ChaCha8Rng) -> Vec<f32> {
    let templates = click_templates(rng);
    let len = 20_000 + letters.len() * EVENT_SPACING;

    let mut samples: Vec<f32> = (0..len)
        .map(|_| rng.gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE))
        .collect();

    for (i, &letter) in letters.iter().enumerate() {
        let at = 10_000 + i * EVENT_SPACING;
        for (k, &value) in templates[letter as usize].iter().enumerate() {
            samples[at + k] += value;
        }
    }
    samples
}

/// 6-gram table counted from the ground-truth letters.
fn freq_map_from(letters: &[Letter]) -> (TempDir, FreqMap) {
    let mut counts: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
    for window in letters.windows(NGRAM_ORDER) {
        *counts.entry(pack_key(window)).or_insert(0) += 1;
    }
    let total: usize = counts.values().sum();
    let entries: Vec<(u32, f32)> = counts
        .into_iter()
        .map(|(key, count)| (key, (count as f64 / total as f64).ln() as f32))
        .collect();

    let dir = tempdir().unwrap();
    ngram::save(&dir.path().join(NGRAM_FILE), &entries).unwrap();
    let map = FreqMap::load_from_dir(dir.path()).unwrap();
    (dir, map)
}

fn recovery_cfg() -> PipelineConfig {
    // The correlation window is twice the template length and the lag
    // search covers the whole template, so two detections of the same key
    // realign no matter where inside the burst each peak was found.
    PipelineConfig {
        similarity: SimilarityConfig {
            align_window: 2 * TEMPLATE_LEN,
            lag_radius: TEMPLATE_LEN + 16,
            corr_len: 2 * TEMPLATE_LEN,
        },
        max_clusters_initial: 27,
        cluster_growth_step: 2,
        cluster_grow_iters: 2,
        clusterings_per_iter: 3,
        metropolis_steps_per_event: 16,
        n_hypotheses_override: Some(300),
        seed: 0,
        ..PipelineConfig::default()
    }
}

fn letter_accuracy(decoded: &str, truth: &[Letter]) -> f64 {
    let decoded: Vec<Letter> = decoded.chars().filter_map(char_to_letter).collect();
    assert_eq!(decoded.len(), truth.len());
    let correct = decoded
        .iter()
        .zip(truth.iter())
        .filter(|(a, b)| a == b)
        .count();
    correct as f64 / truth.len() as f64
}

#[test]
fn synthetic_cipher_is_recovered() {
    let truth = truth_letters();
    let mut rng = ChaCha8Rng::seed_from_u64(1234);
    let samples = synth_waveform(&truth, &mut rng);
    let (_dir, freq_map) = freq_map_from(&truth);

    let output = pipeline::run(&samples, &freq_map, &recovery_cfg(), &SilentProgress).unwrap();
    assert_eq!(output.n_events, N_EVENTS);
    assert!(!output.solutions.is_empty());

    let decoded = output.decoded_best().unwrap();
    let accuracy = letter_accuracy(&decoded, &truth);
    assert!(
        accuracy >= 0.8,
        "accuracy = {:.3}, decoded = {:?}",
        accuracy,
        decoded
    );
}

#[test]
fn pinning_the_first_event_keeps_or_improves_accuracy() {
    let truth = truth_letters();
    let mut rng = ChaCha8Rng::seed_from_u64(1234);
    let samples = synth_waveform(&truth, &mut rng);
    let (_dir, freq_map) = freq_map_from(&truth);

    let cfg = recovery_cfg();
    let baseline = pipeline::run(&samples, &freq_map, &cfg, &SilentProgress).unwrap();
    let baseline_accuracy = letter_accuracy(&baseline.decoded_best().unwrap(), &truth);

    let hinted_cfg = PipelineConfig {
        pinned: vec![(0, truth[0])],
        ..cfg
    };
    let hinted = pipeline::run(&samples, &freq_map, &hinted_cfg, &SilentProgress).unwrap();

    let decoded = hinted.decoded_best().unwrap();
    let first = char_to_letter(decoded.chars().next().unwrap()).unwrap();
    assert_eq!(first, truth[0]);

    let hinted_accuracy = letter_accuracy(&decoded, &truth);
    assert!(
        hinted_accuracy >= baseline_accuracy,
        "hinted = {:.3}, baseline = {:.3}",
        hinted_accuracy,
        baseline_accuracy
    );
}
