//! Beam search over cluster→letter maps, scored by the 6-gram model.
//!
//! Clusters are searched in descending-size order. Every hypothesis
//! carries a complete map: clusters not yet reached hold a provisional
//! letter from frequency-rank analysis (largest cluster → most frequent
//! letter). Scoring therefore sees the whole decoded text from the first
//! step, and each branch only re-scores the windows touched by the
//! cluster it reassigns.

use crate::cipher::{letter_freq, Letter, Parameters, Solution};
use crate::defaults::{ALPHABET_SIZE, NGRAM_ORDER};
use crate::ngram::{pack_key, FreqMap};

/// Combined decoder score of a full cluster→letter map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Language-model part plus the weighted letter-frequency prior.
    pub combined: f64,
    /// 6-gram log-probability of the decoded text alone.
    pub p_lm: f64,
}

#[derive(Clone)]
struct Hypothesis {
    cl_map: Vec<Letter>,
    combined: f64,
    p_lm: f64,
}

/// Per-clustering search layout shared by the beam and the refiner.
struct Layout {
    /// Cluster sizes.
    sizes: Vec<usize>,
    /// Clusters in search order: descending size, ties by index.
    order: Vec<usize>,
    /// Forced letter per cluster, derived from the hints.
    forced: Vec<Option<Letter>>,
    /// For each cluster, the starts of the windows covering one of its
    /// events (deduplicated).
    cluster_windows: Vec<Vec<usize>>,
}

impl Layout {
    fn new(solution: &Solution, params: &Parameters) -> Self {
        let n = solution.clusters.len();
        let k = solution.n_clusters();

        let mut sizes = vec![0usize; k];
        for &cluster in &solution.clusters {
            sizes[cluster] += 1;
        }

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by_key(|&c| (std::cmp::Reverse(sizes[c]), c));

        let forced = forced_letters(solution, params, k);

        let mut cluster_windows = vec![Vec::new(); k];
        if n >= NGRAM_ORDER {
            for start in 0..=(n - NGRAM_ORDER) {
                for pos in start..start + NGRAM_ORDER {
                    let cluster = solution.clusters[pos];
                    if cluster_windows[cluster].last() != Some(&start) {
                        cluster_windows[cluster].push(start);
                    }
                }
            }
        }

        Self {
            sizes,
            order,
            forced,
            cluster_windows,
        }
    }

    /// Frequency-rank seed: the r-th largest cluster takes the r-th most
    /// frequent letter (forced letters win). Clusters beyond the alphabet
    /// repeat the rarest letter.
    fn provisional_map(&self) -> Vec<Letter> {
        let mut by_freq: Vec<Letter> = (0..ALPHABET_SIZE as Letter).collect();
        by_freq.sort_by(|&a, &b| {
            letter_freq(b)
                .partial_cmp(&letter_freq(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let k = self.sizes.len();
        let mut cl_map = vec![0 as Letter; k];
        for (rank, &cluster) in self.order.iter().enumerate() {
            cl_map[cluster] = match self.forced[cluster] {
                Some(letter) => letter,
                None => by_freq[rank.min(ALPHABET_SIZE - 1)],
            };
        }
        cl_map
    }
}

/// Derive the forced letter of each cluster from the per-event hints.
///
/// A cluster containing a hinted event must take that letter. Conflicting
/// hints inside one cluster cannot be satisfied; such a cluster falls back
/// to unconstrained branching.
fn forced_letters(solution: &Solution, params: &Parameters, k: usize) -> Vec<Option<Letter>> {
    let mut forced: Vec<Option<Letter>> = vec![None; k];
    let mut conflicted = vec![false; k];

    for (pos, &cluster) in solution.clusters.iter().enumerate() {
        let Some(letter) = params.hint.get(pos).copied().flatten() else {
            continue;
        };
        match forced[cluster] {
            None => forced[cluster] = Some(letter),
            Some(existing) if existing != letter => conflicted[cluster] = true,
            Some(_) => {}
        }
    }

    for (cluster, conflict) in conflicted.iter().enumerate() {
        if *conflict {
            eprintln!(
                "Conflicting hints in cluster {}; leaving it unconstrained",
                cluster
            );
            forced[cluster] = None;
        }
    }

    forced
}

/// Log-probability of the window at `start`, decoding through `cl_map`
/// with `cluster` substituted by `letter` and hints overriding.
fn window_logp(
    solution: &Solution,
    params: &Parameters,
    freq_map: &FreqMap,
    cl_map: &[Letter],
    start: usize,
    cluster: usize,
    letter: Letter,
) -> f64 {
    let mut window = [0u8; NGRAM_ORDER];
    for (slot, pos) in (start..start + NGRAM_ORDER).enumerate() {
        window[slot] = match params.hint.get(pos).copied().flatten() {
            Some(hinted) => hinted,
            None => {
                let c = solution.clusters[pos];
                if c == cluster {
                    letter
                } else {
                    cl_map[c]
                }
            }
        };
    }
    freq_map.prob(pack_key(&window))
}

/// Score change from reassigning `cluster` to `letter` under `cl_map`.
fn reassign_delta(
    solution: &Solution,
    params: &Parameters,
    freq_map: &FreqMap,
    layout: &Layout,
    cl_map: &[Letter],
    cluster: usize,
    letter: Letter,
) -> (f64, f64) {
    let current = cl_map[cluster];
    if letter == current {
        return (0.0, 0.0);
    }

    let d_prior = params.w_english_freq
        * (letter_freq(letter) - letter_freq(current))
        * layout.sizes[cluster] as f64;

    let mut d_lm = 0.0;
    for &start in &layout.cluster_windows[cluster] {
        d_lm += window_logp(solution, params, freq_map, cl_map, start, cluster, letter)
            - window_logp(solution, params, freq_map, cl_map, start, cluster, current);
    }

    (d_prior + d_lm, d_lm)
}

/// Find the cluster→letter map maximizing the combined score and store it
/// in the solution, together with the language-model probability of the
/// decoded text.
pub fn beam_search(params: &Parameters, freq_map: &FreqMap, solution: &mut Solution) {
    let n = solution.clusters.len();
    if n == 0 {
        solution.cl_map.clear();
        solution.p = f64::NEG_INFINITY;
        return;
    }

    let layout = Layout::new(solution, params);
    let k = layout.sizes.len();

    let seed_map = layout.provisional_map();
    let seed_score = full_score(params, freq_map, solution, &seed_map);
    let mut beam = vec![Hypothesis {
        cl_map: seed_map,
        combined: seed_score.combined,
        p_lm: seed_score.p_lm,
    }];

    for step in 0..k {
        let cluster = layout.order[step];
        let letters: Vec<Letter> = match layout.forced[cluster] {
            Some(letter) => vec![letter],
            None => (0..ALPHABET_SIZE as Letter).collect(),
        };

        let mut next = Vec::with_capacity(beam.len() * letters.len());
        for hypothesis in &beam {
            for &letter in &letters {
                let (d_combined, d_lm) = reassign_delta(
                    solution,
                    params,
                    freq_map,
                    &layout,
                    &hypothesis.cl_map,
                    cluster,
                    letter,
                );
                let mut cl_map = hypothesis.cl_map.clone();
                cl_map[cluster] = letter;
                next.push(Hypothesis {
                    cl_map,
                    combined: hypothesis.combined + d_combined,
                    p_lm: hypothesis.p_lm + d_lm,
                });
            }
        }

        // Rank by score; ties break by lexicographic map order so the
        // search is reproducible.
        next.sort_by(|a, b| {
            b.combined
                .partial_cmp(&a.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cl_map.cmp(&b.cl_map))
        });
        next.dedup_by(|a, b| a.cl_map == b.cl_map);
        next.truncate(params.n_hypotheses_to_keep.max(1));
        beam = next;
    }

    let best = &beam[0];
    solution.cl_map = best.cl_map.clone();
    solution.p = best.p_lm;
}

/// Full combined score of a complete cluster→letter map.
pub fn full_score(
    params: &Parameters,
    freq_map: &FreqMap,
    solution: &Solution,
    cl_map: &[Letter],
) -> Score {
    let n = solution.clusters.len();

    let mut sizes = vec![0usize; cl_map.len()];
    for &cluster in &solution.clusters {
        sizes[cluster] += 1;
    }
    let prior: f64 = cl_map
        .iter()
        .zip(sizes.iter())
        .map(|(&letter, &size)| params.w_english_freq * letter_freq(letter) * size as f64)
        .sum();

    let mut p_lm = 0.0;
    let mut window = [0u8; NGRAM_ORDER];
    if n >= NGRAM_ORDER {
        for start in 0..=(n - NGRAM_ORDER) {
            for (slot, pos) in (start..start + NGRAM_ORDER).enumerate() {
                window[slot] = match params.hint.get(pos).copied().flatten() {
                    Some(letter) => letter,
                    None => cl_map[solution.clusters[pos]],
                };
            }
            p_lm += freq_map.prob(pack_key(&window));
        }
    }

    Score {
        combined: prior + p_lm,
        p_lm,
    }
}

/// Local refinement: try every single-letter reassignment and every
/// pairwise swap, accept improvements, and iterate to a local maximum.
///
/// Clusters whose letter is forced by a hint are left untouched.
pub fn refine_nearby(params: &Parameters, freq_map: &FreqMap, solution: &mut Solution) {
    let k = solution.cl_map.len();
    if k == 0 {
        return;
    }

    let layout = Layout::new(solution, params);
    let mut cl_map = solution.cl_map.clone();
    let mut best = full_score(params, freq_map, solution, &cl_map);

    // The search space is finite and the score strictly increases, so this
    // terminates; the bound is a safety net.
    for _ in 0..100 {
        let mut improved = false;

        for cluster in 0..k {
            if layout.forced[cluster].is_some() {
                continue;
            }
            for letter in 0..ALPHABET_SIZE as Letter {
                if letter == cl_map[cluster] {
                    continue;
                }
                let previous = cl_map[cluster];
                cl_map[cluster] = letter;
                let score = full_score(params, freq_map, solution, &cl_map);
                if score.combined > best.combined {
                    best = score;
                    improved = true;
                } else {
                    cl_map[cluster] = previous;
                }
            }
        }

        for c1 in 0..k {
            for c2 in (c1 + 1)..k {
                if layout.forced[c1].is_some() || layout.forced[c2].is_some() {
                    continue;
                }
                if cl_map[c1] == cl_map[c2] {
                    continue;
                }
                cl_map.swap(c1, c2);
                let score = full_score(params, freq_map, solution, &cl_map);
                if score.combined > best.combined {
                    best = score;
                    improved = true;
                } else {
                    cl_map.swap(c1, c2);
                }
            }
        }

        if !improved {
            break;
        }
    }

    solution.cl_map = cl_map;
    solution.p = best.p_lm;
}
