//! keytap3-app binary: record a typing session live, then recover the text.
//!
//! Drives the engine state machine from a ~100 Hz control loop, relaying
//! the engine's status messages to stdout. The session starts as soon as
//! the n-gram table has loaded and ends after decoding.

use std::process::exit;
use std::thread;
use std::time::Duration;

use clap::Parser;

use keytap3::app::{Engine, EngineConfig, Phase};
use keytap3::audio::capture::CpalAudioCapture;
use keytap3::audio::filter::AudioFilter;
use keytap3::cli::AppCli;
use keytap3::config::Config;
use keytap3::error::KeytapError;

const EXIT_BAD_ARGS: i32 = -1;
const EXIT_AUDIO: i32 = -4;
const EXIT_NGRAM: i32 = -5;

fn main() {
    exit(run());
}

fn run() -> i32 {
    println!(
        "keytap3-app {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown")
    );

    let cli = match AppCli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_BAD_ARGS;
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    let config = match config {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_BAD_ARGS;
        }
    };

    let cfg = match engine_config(&cli, &config) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };
    let n_keys = cli.n_keys;

    let mut engine = Engine::new(cfg, CpalAudioCapture::new());
    let mut started = false;

    loop {
        engine.tick();

        let data = engine.take_data();
        if !data.is_empty() {
            println!("{}", data);
        }

        if let Some(error) = engine.take_error() {
            eprintln!("{}", error);
            return match error {
                KeytapError::NgramNotFound { .. } | KeytapError::NgramParse { .. } => EXIT_NGRAM,
                _ => EXIT_AUDIO,
            };
        }

        if !started && data == "loaded" {
            engine.set_data(&format!("start {}", n_keys));
            started = true;
        }

        if data == "done" {
            // Let the engine settle back to Idle, then report.
            while engine.phase() != Phase::Idle {
                engine.tick();
                thread::sleep(Duration::from_millis(10));
            }
            if let Some(output) = engine.take_result() {
                println!("Detected {} key presses", output.n_events);
                for solution in &output.solutions {
                    println!(
                        "{:8.3} {:8.3} {}",
                        solution.p,
                        solution.p_clusters,
                        solution.decode(&output.hint)
                    );
                }
            }
            return 0;
        }

        thread::sleep(Duration::from_millis(10));
    }
}

fn engine_config(cli: &AppCli, config: &Config) -> Result<EngineConfig, i32> {
    let mut cfg = EngineConfig::new(cli.output.clone(), cli.ngram_dir.clone(), cli.n_keys);
    cfg.capture = config.capture_params();
    cfg.pipeline.filter = config.audio.filter;
    cfg.pipeline.freq_cutoff_hz = config.audio.freq_cutoff_hz;
    cfg.pipeline.detector = config.detector_config();
    cfg.pipeline.w_english_freq = config.decoder.w_english_freq;
    cfg.pipeline.seed = config.decoder.seed;
    cfg.time_limit = Duration::from_secs(config.recording.time_limit_secs);

    if let Some(id) = cli.capture_id {
        cfg.capture.capture_id = id;
    }
    if let Some(channels) = cli.n_channels {
        cfg.capture.n_channels = channels;
    }
    if let Some(id) = cli.filter {
        cfg.pipeline.filter = match AudioFilter::from_id(id) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("{}", e);
                return Err(EXIT_BAD_ARGS);
            }
        };
    }
    if let Some(cutoff) = cli.freq_cutoff {
        cfg.pipeline.freq_cutoff_hz = cutoff;
        cfg.capture.freq_cutoff_hz = cutoff;
    }
    if let Some(limit) = cli.time_limit {
        cfg.time_limit = limit;
    }

    Ok(cfg)
}
