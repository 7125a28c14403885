//! Live engine: record a typing session, then decode it.
//!
//! A four-state machine {Loading, Idle, Recording, Decoding} driven by a
//! foreground control loop. At most one background worker exists at a
//! time; it communicates through atomic flags and a mutex-protected
//! shared state. The capture driver never blocks on the pipeline: it
//! pushes frames into a bounded [`FrameSink`] the recording worker drains.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::capture::{AudioCapture, CaptureParams, FrameSink};
use crate::audio::filter::{self, AudioFilter};
use crate::audio::io::save_kbd;
use crate::audio::waveform::convert_to_i16;
use crate::defaults;
use crate::detect;
use crate::error::KeytapError;
use crate::ngram::FreqMap;
use crate::pipeline::{self, PipelineConfig, PipelineOutput, SilentProgress};
use crate::similarity::SimilarityConfig;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Engine state. Transitions Loading→Idle→Recording→Decoding→Idle are
/// monotonic within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The 6-gram table is being loaded.
    Loading,
    /// Ready; waiting for a `start` command.
    Idle,
    /// Capturing audio and counting keypresses incrementally.
    Recording,
    /// Running the full decoding pipeline on the captured waveform.
    Decoding,
}

/// Live engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where the captured recording is saved before decoding.
    pub output_path: PathBuf,
    /// Directory holding the 6-gram table.
    pub ngram_dir: PathBuf,
    /// Keypress count that ends the recording.
    pub keys_to_capture: usize,
    /// Capture driver parameters.
    pub capture: CaptureParams,
    /// Decoding pipeline configuration (live similarity windows).
    pub pipeline: PipelineConfig,
    /// Wall-clock cap on the recording; reaching it forces decoding.
    pub time_limit: Duration,
    /// Recording worker poll interval.
    pub worker_poll: Duration,
    /// Frame queue capacity.
    pub sink_capacity: usize,
}

impl EngineConfig {
    pub fn new(output_path: PathBuf, ngram_dir: PathBuf, keys_to_capture: usize) -> Self {
        Self {
            output_path,
            ngram_dir,
            keys_to_capture,
            capture: CaptureParams::default(),
            pipeline: PipelineConfig {
                similarity: SimilarityConfig::live(),
                ..PipelineConfig::default()
            },
            time_limit: Duration::from_secs(defaults::RECORD_LIMIT_SECS),
            worker_poll: Duration::from_millis(500),
            sink_capacity: 256,
        }
    }
}

/// State shared between the control loop and the background worker.
struct Shared {
    waveform: Mutex<Vec<f32>>,
    data_output: Mutex<String>,
    do_record: AtomicBool,
    done_recording: AtomicBool,
    work_done: AtomicBool,
    freq_map: Mutex<Option<Arc<FreqMap>>>,
    result: Mutex<Option<PipelineOutput>>,
    error: Mutex<Option<KeytapError>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            waveform: Mutex::new(Vec::new()),
            data_output: Mutex::new(String::new()),
            do_record: AtomicBool::new(false),
            done_recording: AtomicBool::new(false),
            work_done: AtomicBool::new(false),
            freq_map: Mutex::new(None),
            result: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    fn set_data(&self, message: impl Into<String>) {
        *self.data_output.lock().unwrap() = message.into();
    }

    fn set_error(&self, error: KeytapError) {
        self.set_data(format!("error {}", error));
        *self.error.lock().unwrap() = Some(error);
    }
}

/// The live engine. Owns the capture driver; generic over it so tests run
/// against a mock.
pub struct Engine<C: AudioCapture> {
    cfg: EngineConfig,
    phase: Phase,
    capture: C,
    sink: FrameSink,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
    stop_requested: bool,
}

impl<C: AudioCapture> Engine<C> {
    pub fn new(cfg: EngineConfig, capture: C) -> Self {
        Self::with_clock(cfg, capture, Arc::new(SystemClock))
    }

    /// Create an engine with a custom clock (for deterministic testing).
    pub fn with_clock(cfg: EngineConfig, capture: C, clock: Arc<dyn Clock>) -> Self {
        let sink_capacity = cfg.sink_capacity;
        Self {
            cfg,
            phase: Phase::Loading,
            capture,
            sink: FrameSink::new(sink_capacity),
            shared: Arc::new(Shared::new()),
            worker: None,
            clock,
            stop_requested: false,
        }
    }

    /// Current state.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Take the pending UI message, clearing it.
    pub fn take_data(&self) -> String {
        std::mem::take(&mut *self.shared.data_output.lock().unwrap())
    }

    /// Take the decoding result, if one is ready.
    pub fn take_result(&self) -> Option<PipelineOutput> {
        self.shared.result.lock().unwrap().take()
    }

    /// Take the last error, if any.
    pub fn take_error(&self) -> Option<KeytapError> {
        self.shared.error.lock().unwrap().take()
    }

    /// Handle a UI command: `start [nKeys]` (Idle only) or `stop`.
    pub fn set_data(&mut self, data: &str) {
        let mut parts = data.split_whitespace();
        match parts.next() {
            Some("start") => {
                if self.phase != Phase::Idle {
                    return;
                }
                if let Some(n) = parts.next().and_then(|v| v.parse().ok()) {
                    self.cfg.keys_to_capture = n;
                }
                self.start_recording();
            }
            Some("stop") => self.stop(),
            Some(other) => eprintln!("Unknown command: {}", other),
            None => {}
        }
    }

    /// Request a transition to Idle from any state.
    fn stop(&mut self) {
        match self.phase {
            Phase::Idle => {}
            Phase::Recording => {
                // Ends the worker; the next tick observes done_recording
                // with a pending stop and goes straight to Idle.
                self.stop_requested = true;
                self.shared.done_recording.store(true, Ordering::SeqCst);
            }
            Phase::Loading | Phase::Decoding => {
                self.stop_requested = true;
            }
        }
    }

    fn start_recording(&mut self) {
        // Fresh session state.
        self.shared.waveform.lock().unwrap().clear();
        self.shared.result.lock().unwrap().take();
        self.shared.do_record.store(false, Ordering::SeqCst);
        self.shared.done_recording.store(false, Ordering::SeqCst);
        self.shared.work_done.store(false, Ordering::SeqCst);
        self.sink = FrameSink::new(self.cfg.sink_capacity);

        match self
            .capture
            .install(self.cfg.capture.clone(), self.sink.clone())
        {
            Ok(()) => {
                self.shared.do_record.store(true, Ordering::SeqCst);
                self.phase = Phase::Recording;
            }
            Err(error) => {
                // Abort the transition; stay in Idle with the error on the
                // data output.
                self.shared.set_error(error);
            }
        }
    }

    /// Drive the state machine one step. Never blocks except to join a
    /// finished worker at a state transition.
    pub fn tick(&mut self) {
        match self.phase {
            Phase::Loading => self.tick_loading(),
            Phase::Idle => {}
            Phase::Recording => self.tick_recording(),
            Phase::Decoding => self.tick_decoding(),
        }
    }

    fn tick_loading(&mut self) {
        if self.worker.is_none() {
            self.shared.set_data("loading");
            self.shared.work_done.store(false, Ordering::SeqCst);

            let shared = self.shared.clone();
            let dir = self.cfg.ngram_dir.clone();
            self.worker = Some(thread::spawn(move || {
                match FreqMap::load_from_dir(&dir) {
                    Ok(map) => *shared.freq_map.lock().unwrap() = Some(Arc::new(map)),
                    Err(error) => shared.set_error(error),
                }
                shared.work_done.store(true, Ordering::SeqCst);
            }));
        }

        if self.shared.work_done.load(Ordering::SeqCst) {
            self.join_worker();
            if self.shared.freq_map.lock().unwrap().is_some() {
                self.shared.set_data("loaded");
            }
            self.phase = Phase::Idle;
            self.stop_requested = false;
        }
    }

    fn tick_recording(&mut self) {
        if self.shared.do_record.swap(false, Ordering::SeqCst) {
            if let Err(error) = self
                .capture
                .record(1.0, self.cfg.capture.capture_id)
            {
                eprintln!("Capture error: {}", error);
            }
        }

        if self.worker.is_none() {
            let shared = self.shared.clone();
            let sink = self.sink.clone();
            let clock = self.clock.clone();
            let detector = self.cfg.pipeline.detector;
            let freq_cutoff_hz = self.cfg.pipeline.freq_cutoff_hz;
            let keys_to_capture = self.cfg.keys_to_capture;
            let time_limit = self.cfg.time_limit;
            let poll = self.cfg.worker_poll;

            self.worker = Some(thread::spawn(move || {
                recording_worker(
                    &shared,
                    &sink,
                    clock.as_ref(),
                    &detector,
                    freq_cutoff_hz,
                    keys_to_capture,
                    time_limit,
                    poll,
                );
            }));
        }

        if self.shared.done_recording.load(Ordering::SeqCst) {
            self.capture.terminate();
            self.join_worker();

            // Frames delivered after the worker exited.
            append_frames(&self.shared, &self.sink);

            if self.stop_requested {
                self.stop_requested = false;
                self.phase = Phase::Idle;
                return;
            }

            let waveform = self.shared.waveform.lock().unwrap().clone();
            if let Err(error) = save_kbd(&self.cfg.output_path, &waveform) {
                self.shared.set_error(error);
                self.phase = Phase::Idle;
                return;
            }

            self.shared.set_data("decoding");
            self.shared.work_done.store(false, Ordering::SeqCst);
            self.phase = Phase::Decoding;
        }
    }

    fn tick_decoding(&mut self) {
        if self.worker.is_none() {
            self.shared.work_done.store(false, Ordering::SeqCst);

            let shared = self.shared.clone();
            let pipeline_cfg = self.cfg.pipeline.clone();
            self.worker = Some(thread::spawn(move || {
                let waveform = shared.waveform.lock().unwrap().clone();
                let freq_map = shared.freq_map.lock().unwrap().clone();

                match freq_map {
                    None => shared.set_error(KeytapError::Other(
                        "n-gram table is not loaded".to_string(),
                    )),
                    Some(freq_map) => {
                        match pipeline::run(&waveform, &freq_map, &pipeline_cfg, &SilentProgress) {
                            Ok(output) => {
                                *shared.result.lock().unwrap() = Some(output);
                                shared.set_data("done");
                            }
                            Err(error) => shared.set_error(error),
                        }
                    }
                }
                shared.work_done.store(true, Ordering::SeqCst);
            }));
        }

        if self.shared.work_done.load(Ordering::SeqCst) {
            self.join_worker();
            self.phase = Phase::Idle;
            self.stop_requested = false;
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Move every queued frame into the shared waveform buffer.
fn append_frames(shared: &Shared, sink: &FrameSink) -> bool {
    let frames = sink.drain();
    if frames.is_empty() {
        return false;
    }
    let mut waveform = shared.waveform.lock().unwrap();
    for frame in frames {
        waveform.extend_from_slice(&frame);
    }
    true
}

/// Recording worker: drain frames, detect keypresses on a snapshot of the
/// growing waveform, and report progress until the target key count or the
/// time cap is reached.
#[allow(clippy::too_many_arguments)]
fn recording_worker(
    shared: &Shared,
    sink: &FrameSink,
    clock: &dyn Clock,
    detector: &detect::DetectorConfig,
    freq_cutoff_hz: u32,
    keys_to_capture: usize,
    time_limit: Duration,
    poll: Duration,
) {
    let t_start = clock.now();
    let mut n_keys_have = 0usize;

    while !shared.done_recording.load(Ordering::SeqCst) {
        if append_frames(shared, sink) {
            shared.do_record.store(true, Ordering::SeqCst);
        }

        // Snapshot: always a prefix of the final waveform.
        let snapshot = shared.waveform.lock().unwrap().clone();
        if !snapshot.is_empty() {
            // Detection on a raw capture needs the high-pass regardless of
            // the configured decoding filter.
            let mut filtered = snapshot;
            filter::filter(
                &mut filtered,
                AudioFilter::FirstOrderHighPass,
                freq_cutoff_hz,
                defaults::SAMPLE_RATE,
            );

            if let Ok(wave) = convert_to_i16(&filtered) {
                let n = detect::find_keypresses(&wave, detector).presses.len();
                if n > n_keys_have {
                    n_keys_have = n;
                    let elapsed = clock.now().duration_since(t_start).as_secs_f32();
                    let cpm = if elapsed > 0.0 {
                        60.0 * n_keys_have as f32 / elapsed
                    } else {
                        0.0
                    };
                    shared.set_data(format!("recording {} {:.2}", n_keys_have, cpm));
                }
                if n_keys_have >= keys_to_capture {
                    shared.done_recording.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }

        if clock.now().duration_since(t_start) > time_limit {
            shared.done_recording.store(true, Ordering::SeqCst);
            break;
        }

        thread::sleep(poll);
    }
}
