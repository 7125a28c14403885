//! Probabilistic clustering of the similarity map.
//!
//! Each restart seeds centroids by farthest-point sampling, assigns every
//! event to its most-similar centroid, then refines the partition with a
//! Metropolis walk on the clustering quality. Candidates are deduplicated
//! by assignment equality and ranked by quality.

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::cipher::{Parameters, Solution};
use crate::similarity::SimilarityMap;

/// Steepness of the logistic that maps clustering quality to a
/// log-probability.
const QUALITY_SCALE: f64 = 4.0;

/// Metropolis acceptance temperature.
const TEMPERATURE: f64 = 0.05;

/// Per-restart spread of the RNG seed.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Quality of a clustering: mean intra-cluster CC minus mean inter-cluster
/// CC, mapped through a logistic so it reads as a log-probability.
fn p_clusters(quality: f64) -> f64 {
    let x = QUALITY_SCALE * quality;
    -(-x).exp().ln_1p()
}

/// A partition of events with incrementally maintained pair sums.
struct Partition<'a> {
    sim: &'a SimilarityMap,
    assignment: Vec<usize>,
    members: Vec<Vec<usize>>,
    intra_sum: f64,
    intra_cnt: usize,
    total_sum: f64,
    total_cnt: usize,
}

impl<'a> Partition<'a> {
    fn new(sim: &'a SimilarityMap, assignment: Vec<usize>, n_clusters: usize) -> Self {
        let n = assignment.len();
        let mut members = vec![Vec::new(); n_clusters];
        for (event, &cluster) in assignment.iter().enumerate() {
            members[cluster].push(event);
        }

        let mut intra_sum = 0.0;
        let mut intra_cnt = 0;
        let mut total_sum = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let cc = sim.cc(i, j);
                total_sum += cc;
                if assignment[i] == assignment[j] {
                    intra_sum += cc;
                    intra_cnt += 1;
                }
            }
        }

        Self {
            sim,
            assignment,
            members,
            intra_sum,
            intra_cnt,
            total_sum,
            total_cnt: n * (n - 1) / 2,
        }
    }

    fn quality(&self) -> f64 {
        Self::quality_of(
            self.intra_sum,
            self.intra_cnt,
            self.total_sum,
            self.total_cnt,
        )
    }

    fn quality_of(intra_sum: f64, intra_cnt: usize, total_sum: f64, total_cnt: usize) -> f64 {
        let intra = if intra_cnt > 0 {
            intra_sum / intra_cnt as f64
        } else {
            0.0
        };
        let inter_cnt = total_cnt - intra_cnt;
        let inter = if inter_cnt > 0 {
            (total_sum - intra_sum) / inter_cnt as f64
        } else {
            0.0
        };
        intra - inter
    }

    /// Sum of correlations between `event` and the members of `cluster`.
    fn cc_to_cluster(&self, event: usize, cluster: usize) -> f64 {
        self.members[cluster]
            .iter()
            .filter(|&&other| other != event)
            .map(|&other| self.sim.cc(event, other))
            .sum()
    }

    /// Quality after moving `event` to `target`, without applying the move.
    fn quality_after_move(&self, event: usize, target: usize) -> f64 {
        let from = self.assignment[event];
        let s_from = self.cc_to_cluster(event, from);
        let s_to = self.cc_to_cluster(event, target);

        let intra_sum = self.intra_sum - s_from + s_to;
        let intra_cnt = self.intra_cnt - (self.members[from].len() - 1) + self.members[target].len();
        Self::quality_of(intra_sum, intra_cnt, self.total_sum, self.total_cnt)
    }

    fn apply_move(&mut self, event: usize, target: usize) {
        let from = self.assignment[event];
        let s_from = self.cc_to_cluster(event, from);
        let s_to = self.cc_to_cluster(event, target);

        self.intra_sum = self.intra_sum - s_from + s_to;
        self.intra_cnt =
            self.intra_cnt - (self.members[from].len() - 1) + self.members[target].len();

        let pos = self.members[from]
            .iter()
            .position(|&e| e == event)
            .expect("event is a member of its own cluster");
        self.members[from].swap_remove(pos);
        self.members[target].push(event);
        self.assignment[event] = target;
    }
}

/// Farthest-point seeding: the first centroid is random, each further one
/// maximizes its minimum dissimilarity to the centroids chosen so far
/// (lowest index on ties).
fn seed_centroids(sim: &SimilarityMap, k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let n = sim.len();
    let mut centroids = vec![rng.gen_range(0..n)];

    while centroids.len() < k {
        let mut best_event = None;
        let mut best_dist = f64::NEG_INFINITY;
        for event in 0..n {
            if centroids.contains(&event) {
                continue;
            }
            let dist = centroids
                .iter()
                .map(|&c| 1.0 - sim.cc(event, c))
                .fold(f64::INFINITY, f64::min);
            if dist > best_dist {
                best_dist = dist;
                best_event = Some(event);
            }
        }
        match best_event {
            Some(event) => centroids.push(event),
            None => break,
        }
    }

    centroids
}

/// Assign every event to its most-similar centroid.
fn assign_to_centroids(sim: &SimilarityMap, centroids: &[usize]) -> Vec<usize> {
    (0..sim.len())
        .map(|event| {
            let mut best_cluster = 0;
            let mut best_cc = f64::NEG_INFINITY;
            for (cluster, &centroid) in centroids.iter().enumerate() {
                let cc = sim.cc(event, centroid);
                if cc > best_cc {
                    best_cc = cc;
                    best_cluster = cluster;
                }
            }
            best_cluster
        })
        .collect()
}

/// Renumber cluster ids densely, in order of first appearance. Equal
/// partitions compare equal as vectors afterwards.
fn renumber_dense(assignment: &[usize]) -> Vec<usize> {
    let mut remap: Vec<Option<usize>> = vec![None; assignment.len().max(1)];
    let mut next = 0;
    assignment
        .iter()
        .map(|&cluster| {
            *remap[cluster].get_or_insert_with(|| {
                let id = next;
                next += 1;
                id
            })
        })
        .collect()
}

fn run_restart(sim: &SimilarityMap, params: &Parameters, seed: u64) -> (Vec<usize>, f64) {
    let n = sim.len();
    let k = params.max_clusters.min(n).max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let centroids = seed_centroids(sim, k, &mut rng);
    let assignment = assign_to_centroids(sim, &centroids);
    let mut partition = Partition::new(sim, assignment, centroids.len());

    let mut best_assignment = partition.assignment.clone();
    let mut best_quality = partition.quality();

    let steps = params.metropolis_steps_per_event * n;
    let n_clusters = partition.members.len();
    for _ in 0..steps {
        let event = rng.gen_range(0..n);
        let target = rng.gen_range(0..n_clusters);
        if target == partition.assignment[event] {
            continue;
        }

        let current = partition.quality();
        let proposed = partition.quality_after_move(event, target);
        let delta = proposed - current;

        if delta > 0.0 || rng.gen::<f64>() < (delta / TEMPERATURE).exp() {
            partition.apply_move(event, target);
            if proposed > best_quality {
                best_quality = proposed;
                best_assignment = partition.assignment.clone();
            }
        }
    }

    (renumber_dense(&best_assignment), best_quality)
}

/// Produce up to `count` distinct clusterings of the similarity map,
/// ranked by `p_clusters` descending.
pub fn cluster_candidates(
    sim: &SimilarityMap,
    params: &Parameters,
    count: usize,
) -> Vec<Solution> {
    let n = sim.len();
    if n == 0 || count == 0 {
        return Vec::new();
    }

    let restarts = params.cluster_restarts.unwrap_or(count).max(count);
    let mut candidates: Vec<(Vec<usize>, f64)> = (0..restarts)
        .map(|restart| {
            let seed = params
                .seed
                .wrapping_add(SEED_STRIDE.wrapping_mul(restart as u64 + 1));
            run_restart(sim, params, seed)
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut solutions = Vec::with_capacity(count);
    for (assignment, quality) in candidates {
        if solutions.len() == count {
            break;
        }
        if !seen.insert(assignment.clone()) {
            continue;
        }
        solutions.push(Solution {
            clusters: assignment,
            cl_map: Vec::new(),
            p: f64::NEG_INFINITY,
            p_clusters: p_clusters(quality),
        });
    }

    solutions
}
