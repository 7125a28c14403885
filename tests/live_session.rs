// tests/live_session.rs
//! Live engine sessions driven end-to-end with a mock capture driver.

use std::thread;
use std::time::Duration;

use keytap3::app::{Engine, EngineConfig, Phase};
use keytap3::audio::capture::MockAudioCapture;
use keytap3::audio::io::load_kbd;
use keytap3::defaults::NGRAM_FILE;
use keytap3::ngram::{self, pack_key};
use keytap3::pipeline::PipelineConfig;
use keytap3::similarity::SimilarityConfig;
use tempfile::{tempdir, TempDir};

fn write_tiny_table(dir: &std::path::Path) {
    let entries: Vec<(u32, f32)> = (0..12u8).map(|i| (pack_key(&[i; 6]), -2.0)).collect();
    ngram::save(&dir.join(NGRAM_FILE), &entries).unwrap();
}

/// Waveform with `count` identical clicks spaced 4000 samples apart.
fn impulse_waveform(count: usize) -> Vec<f32> {
    let mut samples = vec![0.0f32; 10_000 + count * 4_000 + 30_000];
    for i in 0..count {
        let at = 10_000 + i * 4_000;
        samples[at] = 0.5;
        samples[at + 1] = -0.4;
    }
    samples
}

fn fast_session_config(dir: &TempDir) -> EngineConfig {
    let mut cfg = EngineConfig::new(
        dir.path().join("session.kbd"),
        dir.path().to_path_buf(),
        1_000,
    );
    cfg.worker_poll = Duration::from_millis(5);
    cfg.time_limit = Duration::from_millis(300);
    cfg.pipeline = PipelineConfig {
        similarity: SimilarityConfig {
            align_window: 64,
            lag_radius: 8,
            corr_len: 48,
        },
        cluster_grow_iters: 1,
        clusterings_per_iter: 2,
        metropolis_steps_per_event: 2,
        n_hypotheses_override: Some(16),
        ..PipelineConfig::default()
    };
    cfg
}

/// Tick the engine until it settles in Idle after a full session,
/// collecting every UI message on the way.
fn drive_session<C: keytap3::audio::capture::AudioCapture>(
    engine: &mut Engine<C>,
    n_keys: usize,
    max_ticks: usize,
) -> Vec<String> {
    let mut messages = Vec::new();
    let mut started = false;
    let mut saw_work = false;

    for _ in 0..max_ticks {
        engine.tick();

        let data = engine.take_data();
        if !data.is_empty() {
            messages.push(data.clone());
        }

        if !started && data == "loaded" {
            engine.set_data(&format!("start {}", n_keys));
            started = true;
        }
        if engine.phase() != Phase::Idle {
            saw_work = true;
        }
        if started && saw_work && engine.phase() == Phase::Idle {
            break;
        }

        thread::sleep(Duration::from_millis(2));
    }

    messages
}

#[test]
fn timeout_forces_decoding_on_a_partial_recording() {
    let dir = tempdir().unwrap();
    write_tiny_table(dir.path());

    // 50 keys typed, 1000 requested: only the time cap ends the session.
    let capture = MockAudioCapture::new()
        .with_waveform(&impulse_waveform(50), 4_800)
        .with_frames_per_record(4);
    let mut engine = Engine::new(fast_session_config(&dir), capture);

    let messages = drive_session(&mut engine, 1_000, 5_000);

    assert!(messages.iter().any(|m| m == "decoding"), "{:?}", messages);
    assert!(messages.iter().any(|m| m == "done"), "{:?}", messages);
    assert!(engine.take_error().is_none());

    let output = engine.take_result().expect("decoding result");
    assert_eq!(output.n_events, 50);
    assert!(!output.solutions.is_empty());
}

#[test]
fn reaching_the_key_target_ends_the_recording() {
    let dir = tempdir().unwrap();
    write_tiny_table(dir.path());

    let capture = MockAudioCapture::new()
        .with_waveform(&impulse_waveform(20), 4_800)
        .with_frames_per_record(4);
    let mut engine = Engine::new(fast_session_config(&dir), capture);

    let messages = drive_session(&mut engine, 10, 5_000);

    assert_eq!(messages.first().map(String::as_str), Some("loading"));
    assert!(messages.iter().any(|m| m == "loaded"));
    assert!(messages.iter().any(|m| m == "decoding"));
    assert_eq!(messages.last().map(String::as_str), Some("done"));

    // Progress messages carry a count and a typing speed.
    for message in messages.iter().filter(|m| m.starts_with("recording ")) {
        let fields: Vec<&str> = message.split_whitespace().collect();
        assert_eq!(fields.len(), 3, "{:?}", message);
        assert!(fields[1].parse::<usize>().is_ok());
        assert!(fields[2].parse::<f32>().is_ok());
    }

    let output = engine.take_result().expect("decoding result");
    assert!(output.n_events >= 10, "n_events = {}", output.n_events);
}

#[test]
fn the_recording_is_saved_before_decoding() {
    let dir = tempdir().unwrap();
    write_tiny_table(dir.path());

    let capture = MockAudioCapture::new()
        .with_waveform(&impulse_waveform(30), 4_800)
        .with_frames_per_record(4);
    let mut engine = Engine::new(fast_session_config(&dir), capture);

    drive_session(&mut engine, 1_000, 5_000);

    let output = engine.take_result().expect("decoding result");
    let saved = load_kbd(&dir.path().join("session.kbd")).unwrap();
    assert!(!saved.is_empty());
    assert_eq!(saved.len(), output.n_samples);
}

#[test]
fn stop_returns_to_idle_from_recording() {
    let dir = tempdir().unwrap();
    write_tiny_table(dir.path());

    let capture = MockAudioCapture::new().with_waveform(&impulse_waveform(50), 4_800);
    let mut engine = Engine::new(fast_session_config(&dir), capture);

    // Load, then start.
    for _ in 0..500 {
        engine.tick();
        if engine.take_data() == "loaded" {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    engine.set_data("start 100");
    assert_eq!(engine.phase(), Phase::Recording);

    engine.set_data("stop");
    for _ in 0..500 {
        engine.tick();
        if engine.phase() == Phase::Idle {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(engine.phase(), Phase::Idle);
    assert!(engine.take_result().is_none());
}
