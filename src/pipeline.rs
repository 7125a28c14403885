//! Batch decoding pipeline.
//!
//! Sequences preprocessing, detection, similarity, clustering, and the
//! beam-search decoder over a float recording. The batch binary drives
//! the stages itself to interleave reporting; the live engine and tests
//! use [`run`], which sequences everything.

use std::collections::HashSet;

use crate::audio::filter::{self, AudioFilter};
use crate::audio::waveform::convert_to_i16;
use crate::cipher::{beam, cluster, Letter, Parameters, Solution};
use crate::defaults::{self, SPACE_LETTER};
use crate::detect::{self, DetectorConfig};
use crate::error::{KeytapError, Result};
use crate::ngram::FreqMap;
use crate::similarity::{self, SimilarityConfig, SimilarityMap};

/// Positions are pinned during hint refinement once this share of the
/// clusterings agrees on their letter.
const HINT_AGREEMENT: f64 = 0.90;

/// Bound on hint-refinement rounds.
const MAX_HINT_ROUNDS: usize = 8;

/// The letter 'e' is too common to be a useful pin; like space, it is
/// excluded from hint refinement.
const HINT_EXCLUDED: [Letter; 2] = [SPACE_LETTER, 4];

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter: AudioFilter,
    pub freq_cutoff_hz: u32,
    pub detector: DetectorConfig,
    pub similarity: SimilarityConfig,
    /// Cluster ceiling of the first outer iteration.
    pub max_clusters_initial: usize,
    /// Cluster ceiling growth per outer iteration.
    pub cluster_growth_step: usize,
    /// Number of outer clustering iterations.
    pub cluster_grow_iters: usize,
    /// Candidate clusterings per outer iteration.
    pub clusterings_per_iter: usize,
    pub w_english_freq: f64,
    pub metropolis_steps_per_event: usize,
    /// Beam width override; `None` derives it from the event count.
    pub n_hypotheses_override: Option<usize>,
    pub seed: u64,
    /// Enable the iterative hint-refinement mode. The default is the
    /// single-pass behavior.
    pub refine_hints: bool,
    /// Externally pinned letters, as (event index, letter) pairs. Indices
    /// beyond the detected event count are ignored.
    pub pinned: Vec<(usize, Letter)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: AudioFilter::default(),
            freq_cutoff_hz: defaults::FREQ_CUTOFF_HZ,
            detector: DetectorConfig::default(),
            similarity: SimilarityConfig::default(),
            max_clusters_initial: defaults::MAX_CLUSTERS_INITIAL,
            cluster_growth_step: defaults::CLUSTER_GROWTH_STEP,
            cluster_grow_iters: defaults::CLUSTER_GROW_ITERS,
            clusterings_per_iter: defaults::CLUSTERINGS_PER_ITER,
            w_english_freq: defaults::W_ENGLISH_FREQ,
            metropolis_steps_per_event: 32,
            n_hypotheses_override: None,
            seed: 0,
            refine_hints: false,
            pinned: Vec::new(),
        }
    }
}

/// Observer for long-running pipeline stages.
///
/// The default implementations are no-ops; the batch binary plugs in
/// progress reporting, the live engine stays silent.
pub trait ProgressSink {
    fn stage(&self, _message: &str) {}
    fn cluster_iteration(&self, _iteration: usize, _total: usize, _pooled: usize) {}
    fn solution_decoded(&self, _index: usize, _total: usize, _solution: &Solution, _decoded: &str) {
    }
}

/// Progress sink that reports nothing.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {}

/// Pipeline output: every decoded clustering, ranked by text probability.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub n_samples: usize,
    pub n_events: usize,
    /// Solutions sorted by `p` descending. Empty when no events were
    /// detected.
    pub solutions: Vec<Solution>,
    /// Hints in effect for the final decoding pass (all `None` unless
    /// hint refinement ran).
    pub hint: Vec<Option<Letter>>,
}

impl PipelineOutput {
    /// The highest-probability solution, if any.
    pub fn best(&self) -> Option<&Solution> {
        self.solutions.first()
    }

    /// Decoded text of the best solution.
    pub fn decoded_best(&self) -> Option<String> {
        self.best().map(|s| s.decode(&self.hint))
    }
}

/// Preprocess a float recording: filter in a copy, convert to int16.
pub fn preprocess(samples: &[f32], cfg: &PipelineConfig) -> Result<Vec<i16>> {
    let mut filtered = samples.to_vec();
    filter::filter(
        &mut filtered,
        cfg.filter,
        cfg.freq_cutoff_hz,
        defaults::SAMPLE_RATE,
    );
    convert_to_i16(&filtered)
}

/// Clustering pool plus decoding: the 16-step growing clustering search,
/// deduplicated, then a beam search and local refinement per clustering.
///
/// Returns the solutions sorted by decoded-text probability, and the hints
/// in effect for the final pass.
pub fn cluster_and_decode(
    sim: &SimilarityMap,
    freq_map: &FreqMap,
    cfg: &PipelineConfig,
    progress: &dyn ProgressSink,
) -> (Vec<Solution>, Vec<Option<Letter>>) {
    let n = sim.len();

    let mut params = Parameters {
        max_clusters: cfg.max_clusters_initial,
        w_english_freq: cfg.w_english_freq,
        n_hypotheses_to_keep: cfg
            .n_hypotheses_override
            .unwrap_or_else(|| defaults::hypotheses_to_keep(n)),
        cluster_restarts: None,
        metropolis_steps_per_event: cfg.metropolis_steps_per_event,
        seed: cfg.seed,
        hint: vec![None; n],
    };
    for &(pos, letter) in &cfg.pinned {
        if pos < n {
            params.hint[pos] = Some(letter);
        }
    }

    // Clustering pool: grow the cluster ceiling each iteration so the
    // search covers both small and large keyboards, then dedupe across
    // iterations by assignment equality.
    let mut solutions: Vec<Solution> = Vec::new();
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    for iteration in 0..cfg.cluster_grow_iters {
        params.max_clusters = cfg.max_clusters_initial + cfg.cluster_growth_step * iteration;
        params.seed = cfg.seed.wrapping_add(1 + iteration as u64);

        for candidate in cluster::cluster_candidates(sim, &params, cfg.clusterings_per_iter) {
            if seen.insert(candidate.clusters.clone()) {
                solutions.push(candidate);
            }
        }
        progress.cluster_iteration(iteration + 1, cfg.cluster_grow_iters, solutions.len());
    }

    params.seed = cfg.seed;
    params.max_clusters = cfg.max_clusters_initial;

    if cfg.refine_hints {
        refine_with_hints(&mut solutions, &mut params, freq_map, progress);
    } else {
        let total = solutions.len();
        for (index, solution) in solutions.iter_mut().enumerate() {
            beam::beam_search(&params, freq_map, solution);
            beam::refine_nearby(&params, freq_map, solution);
            let decoded = solution.decode(&params.hint);
            progress.solution_decoded(index + 1, total, solution, &decoded);
        }
    }

    solutions.sort_by(|a, b| {
        b.p.partial_cmp(&a.p)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.clusters.cmp(&b.clusters))
    });

    (solutions, params.hint)
}

/// Run the full pipeline over a float recording.
///
/// A recording without detectable keypresses yields an output with no
/// solutions; a recording with exactly one keypress cannot be correlated
/// and fails with [`KeytapError::TooFewKeypresses`].
pub fn run(
    samples: &[f32],
    freq_map: &FreqMap,
    cfg: &PipelineConfig,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput> {
    progress.stage("Preprocessing waveform");
    let wave = preprocess(samples, cfg)?;

    progress.stage("Searching for key presses");
    let detection = detect::find_keypresses(&wave, &cfg.detector);
    let n = detection.presses.len();

    let mut output = PipelineOutput {
        n_samples: samples.len(),
        n_events: n,
        solutions: Vec::new(),
        hint: vec![None; n],
    };

    if n == 0 {
        progress.stage("No keypresses detected");
        return Ok(output);
    }
    if n < 2 {
        return Err(KeytapError::TooFewKeypresses {
            found: n,
            needed: 2,
        });
    }
    if n < defaults::MIN_KEYPRESSES {
        progress.stage("Insufficient data: decoding will use an inflated beam");
    }

    progress.stage("Calculating similarity map");
    let sim = similarity::calculate_similarity_map(&wave, &detection.presses, &cfg.similarity);

    let (solutions, hint) = cluster_and_decode(&sim, freq_map, cfg, progress);
    output.solutions = solutions;
    output.hint = hint;
    Ok(output)
}

/// Iterative hint refinement: decode every clustering, pin positions where
/// most clusterings agree on an uncommon letter, and repeat until no new
/// pin appears.
fn refine_with_hints(
    solutions: &mut [Solution],
    params: &mut Parameters,
    freq_map: &FreqMap,
    progress: &dyn ProgressSink,
) {
    let n = params.hint.len();
    let total = solutions.len();

    for round in 0..MAX_HINT_ROUNDS {
        progress.stage(&format!("Hint refinement round {}", round + 1));
        for (index, solution) in solutions.iter_mut().enumerate() {
            beam::beam_search(params, freq_map, solution);
            beam::refine_nearby(params, freq_map, solution);
            let decoded = solution.decode(&params.hint);
            progress.solution_decoded(index + 1, total, solution, &decoded);
        }

        let mut pinned = false;
        for pos in 0..n {
            if params.hint[pos].is_some() {
                continue;
            }

            let mut counts = [0usize; defaults::ALPHABET_SIZE];
            for solution in solutions.iter() {
                counts[solution.letter_at(pos, &params.hint) as usize] += 1;
            }
            let (letter, &count) = counts
                .iter()
                .enumerate()
                .max_by_key(|&(_, &c)| c)
                .expect("alphabet is non-empty");

            let letter = letter as Letter;
            if count as f64 > HINT_AGREEMENT * solutions.len() as f64
                && !HINT_EXCLUDED.contains(&letter)
            {
                params.hint[pos] = Some(letter);
                pinned = true;
            }
        }

        if !pinned {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::NGRAM_ORDER;
    use crate::ngram::{self, pack_key};
    use tempfile::tempdir;

    fn tiny_freq_map() -> FreqMap {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grams.binary");
        let entries: Vec<(u32, f32)> = (0..NGRAM_ORDER as u32)
            .map(|i| (pack_key(&[i as u8; 6]), -2.0))
            .collect();
        ngram::save(&path, &entries).unwrap();
        FreqMap::load(&path).unwrap()
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
    fn silence_yields_no_events_and_no_solutions() {
        let freq_map = tiny_freq_map();
        let samples = vec![0.0f32; 240_000];

        let output = run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap();
        assert_eq!(output.n_events, 0);
        assert!(output.solutions.is_empty());
        assert!(output.decoded_best().is_none());
    }

    #[test]
    fn a_single_keypress_cannot_be_correlated() {
        let freq_map = tiny_freq_map();
        let mut samples = vec![0.0f32; 96_000];
        samples[48_000] = 0.5;

        let err = run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap_err();
        assert!(matches!(
            err,
            KeytapError::TooFewKeypresses { found: 1, needed: 2 }
        ));
    }

    #[test]
    fn empty_recording_is_a_conversion_error() {
        let freq_map = tiny_freq_map();
        let err = run(&[], &freq_map, &fast_cfg(), &SilentProgress).unwrap_err();
        assert!(matches!(err, KeytapError::Conversion { .. }));
    }

    #[test]
    fn impulse_train_is_decoded_end_to_end() {
        let freq_map = tiny_freq_map();

        // Ten identical clicks: one cluster, decoded as some letter.
        let mut samples = vec![0.0f32; 120_000];
        for i in 0..10 {
            let at = 10_000 + i * 4_000;
            for (k, s) in samples[at..at + 24].iter_mut().enumerate() {
                *s = 0.5 * ((k as f32) * 0.8).sin();
            }
        }

        let output = run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap();
        assert_eq!(output.n_events, 10);
        assert!(!output.solutions.is_empty());

        let best = output.best().unwrap();
        assert_eq!(best.clusters.len(), 10);
        assert_eq!(best.cl_map.len(), best.n_clusters());
        let decoded = output.decoded_best().unwrap();
        assert_eq!(decoded.len(), 10);
    }

    #[test]
    fn pipeline_is_deterministic_for_a_seed() {
        let freq_map = tiny_freq_map();
        let mut samples = vec![0.0f32; 120_000];
        for i in 0..6 {
            samples[10_000 + i * 5_000] = 0.4;
            samples[10_001 + i * 5_000] = -0.3;
        }

        let a = run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap();
        let b = run(&samples, &freq_map, &fast_cfg(), &SilentProgress).unwrap();
        assert_eq!(a.n_events, b.n_events);
        assert_eq!(a.decoded_best(), b.decoded_best());
    }
}
