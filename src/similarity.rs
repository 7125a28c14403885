//! Pairwise normalized cross-correlation between detected keypresses.
//!
//! For every pair of events a fixed-length window around each peak is
//! correlated at a range of small lags; the best NCC and its lag populate
//! a dense symmetric similarity map. This is the throughput-critical
//! kernel of the pipeline: rows are computed in parallel and the inner
//! products run on int16 samples with 64-bit integer accumulators.

use rayon::prelude::*;

use crate::defaults;
use crate::detect::KeyPress;

/// Best correlation between two events: the NCC value in [-1, 1] and the
/// lag at which it occurred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEntry {
    pub cc: f64,
    pub offset: i64,
}

impl Default for SimilarityEntry {
    fn default() -> Self {
        Self { cc: 0.0, offset: 0 }
    }
}

/// Similarity engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityConfig {
    /// Window alignment span: each window starts `align_window / 2`
    /// samples before the event peak.
    pub align_window: usize,
    /// Lag search radius in samples.
    pub lag_radius: usize,
    /// Correlation window length in samples.
    pub corr_len: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            align_window: defaults::SIM_ALIGN_WINDOW,
            lag_radius: defaults::SIM_LAG_RADIUS,
            corr_len: defaults::SIM_CORR_LEN,
        }
    }
}

impl SimilarityConfig {
    /// Wider windows used by the live decoding path.
    pub fn live() -> Self {
        Self {
            align_window: defaults::APP_SIM_ALIGN_WINDOW,
            lag_radius: defaults::SIM_LAG_RADIUS,
            corr_len: defaults::APP_SIM_CORR_LEN,
        }
    }
}

/// Dense symmetric n×n similarity map over event pairs.
#[derive(Debug, Clone)]
pub struct SimilarityMap {
    n: usize,
    entries: Vec<SimilarityEntry>,
}

impl SimilarityMap {
    fn new(n: usize) -> Self {
        let mut map = Self {
            n,
            entries: vec![SimilarityEntry::default(); n * n],
        };
        for i in 0..n {
            map.entries[i * n + i] = SimilarityEntry { cc: 1.0, offset: 0 };
        }
        map
    }

    /// Number of events the map covers.
    pub fn len(&self) -> usize {
        self.n
    }

    /// True for a map over zero events.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Build a map from a pairwise correlation function, for synthetic
    /// maps in tests and tooling. Values are clamped to [-1, 1] and the
    /// diagonal is forced to 1.
    pub fn from_fn(n: usize, cc: impl Fn(usize, usize) -> f64) -> Self {
        let mut map = Self::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let entry = SimilarityEntry {
                    cc: cc(i, j).clamp(-1.0, 1.0),
                    offset: 0,
                };
                map.set_symmetric(i, j, entry);
            }
        }
        map
    }

    /// Entry for the pair (i, j).
    pub fn get(&self, i: usize, j: usize) -> SimilarityEntry {
        self.entries[i * self.n + j]
    }

    /// Correlation value for the pair (i, j).
    pub fn cc(&self, i: usize, j: usize) -> f64 {
        self.entries[i * self.n + j].cc
    }

    fn set_symmetric(&mut self, i: usize, j: usize, entry: SimilarityEntry) {
        self.entries[i * self.n + j] = entry;
        self.entries[j * self.n + i] = entry;
    }
}

/// Compute the similarity map for `presses` over `samples`.
///
/// Windows that fall outside the waveform are clamped to its edges; a
/// degenerate (all-zero) window correlates at 0.
pub fn calculate_similarity_map(
    samples: &[i16],
    presses: &[KeyPress],
    cfg: &SimilarityConfig,
) -> SimilarityMap {
    let n = presses.len();
    let mut map = SimilarityMap::new(n);
    if n < 2 || samples.len() < cfg.corr_len {
        return map;
    }

    let starts: Vec<usize> = presses
        .iter()
        .map(|p| window_start(p.offset, samples.len(), cfg))
        .collect();

    // Per-row pair computations are independent; each row i covers j > i.
    let rows: Vec<Vec<SimilarityEntry>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = &samples[starts[i]..starts[i] + cfg.corr_len];
            let sum_aa = dot(a, a);
            ((i + 1)..n)
                .map(|j| best_lag(samples, a, sum_aa, starts[j], cfg))
                .collect()
        })
        .collect();

    for (i, row) in rows.into_iter().enumerate() {
        for (k, entry) in row.into_iter().enumerate() {
            map.set_symmetric(i, i + 1 + k, entry);
        }
    }

    map
}

fn window_start(offset: usize, len: usize, cfg: &SimilarityConfig) -> usize {
    offset
        .saturating_sub(cfg.align_window / 2)
        .min(len - cfg.corr_len)
}

/// Inner product with 64-bit accumulation; int16 products cannot overflow.
fn dot(a: &[i16], b: &[i16]) -> i64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as i64 * y as i64)
        .sum()
}

/// Best NCC of `a` against windows of the same length around `start_j`,
/// sliding over the configured lag range.
fn best_lag(
    samples: &[i16],
    a: &[i16],
    sum_aa: i64,
    start_j: usize,
    cfg: &SimilarityConfig,
) -> SimilarityEntry {
    let mut best = SimilarityEntry {
        cc: -1.0,
        offset: 0,
    };
    let mut found = false;
    let lag_radius = cfg.lag_radius as i64;

    for lag in -lag_radius..=lag_radius {
        let start = start_j as i64 + lag;
        if start < 0 || start as usize + cfg.corr_len > samples.len() {
            continue;
        }
        let b = &samples[start as usize..start as usize + cfg.corr_len];

        let sum_ab = dot(a, b);
        let sum_bb = dot(b, b);

        let denom = (sum_aa as f64 * sum_bb as f64).sqrt();
        let cc = if denom > 0.0 {
            (sum_ab as f64 / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        if !found || cc > best.cc {
            best = SimilarityEntry { cc, offset: lag };
            found = true;
        }
    }

    if !found {
        return SimilarityEntry::default();
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(offset: usize) -> KeyPress {
        KeyPress {
            offset,
            peak: 16_000,
        }
    }

    fn small_cfg() -> SimilarityConfig {
        SimilarityConfig {
            align_window: 64,
            lag_radius: 16,
            corr_len: 48,
        }
    }

    /// A short click template stamped into a zero waveform.
    fn stamp(samples: &mut [i16], offset: usize, template: &[i16]) {
        samples[offset..offset + template.len()].copy_from_slice(template);
    }

    fn click_template() -> Vec<i16> {
        (0..32)
            .map(|i| ((i as f64 * 0.7).sin() * 12_000.0) as i16)
            .collect()
    }

    #[test]
    fn empty_press_list_yields_empty_map() {
        let map = calculate_similarity_map(&vec![0i16; 1000], &[], &small_cfg());
        assert!(map.is_empty());
    }

    #[test]
    fn single_press_yields_diagonal_only_map() {
        let map = calculate_similarity_map(&vec![0i16; 1000], &[press(500)], &small_cfg());
        assert_eq!(map.len(), 1);
        assert_eq!(map.cc(0, 0), 1.0);
    }

    #[test]
    fn identical_events_correlate_at_one_with_zero_lag() {
        let mut samples = vec![0i16; 30_000];
        let template = click_template();
        stamp(&mut samples, 10_000, &template);
        stamp(&mut samples, 20_000, &template);

        let presses = [press(10_000), press(20_000)];
        let map = calculate_similarity_map(&samples, &presses, &small_cfg());

        let entry = map.get(0, 1);
        assert!((entry.cc - 1.0).abs() < 1e-6, "cc = {}", entry.cc);
        assert_eq!(entry.offset, 0);
    }

    #[test]
    fn lag_search_recovers_a_shift() {
        let mut samples = vec![0i16; 30_000];
        let template = click_template();
        stamp(&mut samples, 10_000, &template);
        stamp(&mut samples, 20_007, &template);

        // The second press is reported 7 samples early, so the true match
        // sits at lag +7.
        let presses = [press(10_000), press(20_000)];
        let map = calculate_similarity_map(&samples, &presses, &small_cfg());

        let entry = map.get(0, 1);
        assert!((entry.cc - 1.0).abs() < 1e-6, "cc = {}", entry.cc);
        assert_eq!(entry.offset, 7);
    }

    #[test]
    fn map_is_symmetric_and_clamped() {
        let mut samples = vec![0i16; 60_000];
        let template = click_template();
        for k in 0..4 {
            stamp(&mut samples, 10_000 + k * 10_000, &template);
        }
        let presses: Vec<KeyPress> = (0..4).map(|k| press(10_000 + k * 10_000)).collect();
        let map = calculate_similarity_map(&samples, &presses, &small_cfg());

        for i in 0..4 {
            for j in 0..4 {
                let e = map.get(i, j);
                assert!((-1.0..=1.0).contains(&e.cc));
                assert_eq!(e.cc, map.get(j, i).cc);
                assert_eq!(e.offset, map.get(j, i).offset);
            }
        }
    }

    #[test]
    fn all_zero_window_correlates_at_zero() {
        let mut samples = vec![0i16; 30_000];
        let template = click_template();
        stamp(&mut samples, 10_000, &template);

        // Second event sits in pure silence.
        let presses = [press(10_000), press(20_000)];
        let map = calculate_similarity_map(&samples, &presses, &small_cfg());
        assert_eq!(map.cc(0, 1), 0.0);
    }

    #[test]
    fn windows_near_the_edges_are_clamped() {
        let mut samples = vec![0i16; 2_000];
        let template = click_template();
        stamp(&mut samples, 4, &template);
        stamp(&mut samples, 1_960, &template);

        let presses = [press(4), press(1_960)];
        let map = calculate_similarity_map(&samples, &presses, &small_cfg());
        let e = map.get(0, 1);
        assert!((-1.0..=1.0).contains(&e.cc));
    }
}
