//! keytap3 batch binary: recover typed text from a keyboard recording.

use std::process::exit;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use keytap3::audio::filter::AudioFilter;
use keytap3::audio::io::load_recording;
use keytap3::cipher::Solution;
use keytap3::cli::BatchCli;
use keytap3::config::Config;
use keytap3::defaults;
use keytap3::detect;
use keytap3::error::KeytapError;
use keytap3::ngram::FreqMap;
use keytap3::pipeline::{self, PipelineConfig, ProgressSink};
use keytap3::similarity;

const EXIT_BAD_ARGS: i32 = -1;
// Reserved for a detector failure distinct from "no keypresses found"; the
// detector cannot fail on a loadable recording, so the code is never
// produced today but stays part of the CLI surface.
#[allow(dead_code)]
const EXIT_DETECTION: i32 = -2;
const EXIT_SIMILARITY: i32 = -3;
const EXIT_CONVERSION: i32 = -4;
const EXIT_NGRAM: i32 = -5;

fn main() {
    exit(run());
}

fn run() -> i32 {
    let cli = match BatchCli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_BAD_ARGS;
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let cfg = match pipeline_config(&cli, &config) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };

    // Load the recording.
    println!("Loading recording from '{}'", cli.record.display());
    let samples = match load_recording(&cli.record) {
        Ok(samples) => samples,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_BAD_ARGS;
        }
    };
    println!(
        "Loaded {} samples ({:.3} MB, {:.2} seconds at {} Hz)",
        samples.len(),
        (samples.len() * 4) as f64 / 1024.0 / 1024.0,
        samples.len() as f64 / defaults::SAMPLE_RATE as f64,
        defaults::SAMPLE_RATE
    );

    // Preprocess.
    println!(
        "Filtering waveform (filter = {:?}, cutoff = {} Hz)",
        cfg.filter, cfg.freq_cutoff_hz
    );
    let wave = match pipeline::preprocess(&samples, &cfg) {
        Ok(wave) => wave,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_CONVERSION;
        }
    };

    // Detect keypresses.
    println!("Searching for key presses");
    let t_detect = Instant::now();
    let detection = detect::find_keypresses(&wave, &cfg.detector);
    let n = detection.presses.len();
    println!(
        "Detected {} potential key presses in {:.3} seconds",
        n,
        t_detect.elapsed().as_secs_f64()
    );

    if n == 0 {
        println!("No keypresses detected; nothing to decode");
        return 0;
    }
    if n < 2 {
        eprintln!(
            "{}",
            KeytapError::TooFewKeypresses {
                found: n,
                needed: 2
            }
        );
        return EXIT_SIMILARITY;
    }
    if n < defaults::MIN_KEYPRESSES {
        eprintln!(
            "Warning: only {} keypresses (recommended at least {}); decoding with an inflated beam",
            n,
            defaults::MIN_KEYPRESSES
        );
    }

    // Similarity map.
    println!("Calculating CC similarity map");
    let t_sim = Instant::now();
    let sim = similarity::calculate_similarity_map(&wave, &detection.presses, &cfg.similarity);
    println!("Calculation took {:.3} seconds", t_sim.elapsed().as_secs_f64());
    print_similarity_summary(&sim);

    // Language model.
    println!("Loading n-grams from '{}'", cli.ngram_dir.display());
    let freq_map = match FreqMap::load_from_dir(&cli.ngram_dir) {
        Ok(freq_map) => freq_map,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_NGRAM;
        }
    };
    println!("Loaded {} 6-grams", freq_map.len());

    // Clustering and decoding.
    println!(
        "Attempting to recover the text (beam width {})",
        cfg.n_hypotheses_override
            .unwrap_or_else(|| defaults::hypotheses_to_keep(n))
    );
    let progress = BatchProgress::new(cfg.cluster_grow_iters);
    let t_decode = Instant::now();
    let (solutions, hint) = pipeline::cluster_and_decode(&sim, &freq_map, &cfg, &progress);
    progress.finish();
    println!(
        "Recovered {} candidate decodings in {:.3} seconds",
        solutions.len(),
        t_decode.elapsed().as_secs_f64()
    );

    for solution in &solutions {
        println!(
            "{:8.3} {:8.3} {}",
            solution.p,
            solution.p_clusters,
            solution.decode(&hint)
        );
    }

    0
}

fn load_config(cli: &BatchCli) -> Result<Config, i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    match config {
        Ok(config) => Ok(config.with_env_overrides()),
        Err(e) => {
            eprintln!("{}", e);
            Err(EXIT_BAD_ARGS)
        }
    }
}

fn pipeline_config(cli: &BatchCli, config: &Config) -> Result<PipelineConfig, i32> {
    let mut cfg = config.pipeline_config();
    if let Some(id) = cli.filter {
        cfg.filter = match AudioFilter::from_id(id) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("{}", e);
                return Err(EXIT_BAD_ARGS);
            }
        };
    }
    if let Some(cutoff) = cli.freq_cutoff {
        cfg.freq_cutoff_hz = cutoff;
    }
    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    cfg.refine_hints |= cli.refine_hints;
    Ok(cfg)
}

/// Print the top-left corner of the similarity map and its extrema.
fn print_similarity_summary(sim: &similarity::SimilarityMap) {
    let n = sim.len();
    let ncc = n.min(32);
    for j in 0..ncc {
        print!("{:2}: ", j);
        for i in 0..ncc {
            print!("{:6.3} ", sim.cc(j, i));
        }
        println!();
    }

    let mut min_cc = f64::INFINITY;
    let mut max_cc = f64::NEG_INFINITY;
    for j in 0..n {
        for i in (j + 1)..n {
            min_cc = min_cc.min(sim.cc(j, i));
            max_cc = max_cc.max(sim.cc(j, i));
        }
    }
    println!("Similarity map: min = {:.4}, max = {:.4}", min_cc, max_cc);
}

/// Progress reporting for the clustering pool and the per-clustering
/// decoding passes.
struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    fn new(cluster_iters: usize) -> Self {
        let bar = ProgressBar::new(cluster_iters as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg:24} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message("clustering");
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BatchProgress {
    fn stage(&self, message: &str) {
        self.bar.println(message);
    }

    fn cluster_iteration(&self, iteration: usize, _total: usize, pooled: usize) {
        self.bar.set_position(iteration as u64);
        self.bar
            .set_message(format!("clustering ({} pooled)", pooled));
    }

    fn solution_decoded(&self, index: usize, total: usize, solution: &Solution, decoded: &str) {
        self.bar
            .set_message(format!("decoding {}/{}", index, total));
        self.bar.println(format!(
            "{:8.3} {:8.3} {}",
            solution.p, solution.p_clusters, decoded
        ));
    }
}
