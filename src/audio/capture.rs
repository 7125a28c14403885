//! Audio capture behind an injectable capability.
//!
//! The capture driver delivers frames of float samples to a [`FrameSink`],
//! a bounded queue the recording worker drains. The driver never blocks on
//! the pipeline: when the queue is full the oldest frame is dropped and a
//! warning is printed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::filter::AudioFilter;
use crate::defaults;
use crate::error::{KeytapError, Result};

/// Parameters for installing a capture driver.
#[derive(Debug, Clone)]
pub struct CaptureParams {
    /// Capture device index; 0 selects the default input device.
    pub capture_id: i32,
    /// Requested channel count; 0 uses the device default. The sink always
    /// receives mono frames regardless.
    pub n_channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Filter applied by the driver (the live engine records unfiltered and
    /// filters in the worker, so this is normally `None`).
    pub filter: AudioFilter,
    /// Cutoff for the driver-side filter.
    pub freq_cutoff_hz: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            capture_id: 0,
            n_channels: 0,
            sample_rate: defaults::SAMPLE_RATE,
            filter: AudioFilter::None,
            freq_cutoff_hz: defaults::FREQ_CUTOFF_HZ,
        }
    }
}

/// Bounded queue of mono float frames between the capture driver and the
/// recording worker.
#[derive(Clone)]
pub struct FrameSink {
    queue: Arc<Mutex<VecDeque<Vec<f32>>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    /// Create a sink holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a frame, dropping the oldest one if the queue is full.
    pub fn push(&self, frame: Vec<f32>) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == self.capacity {
            queue.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            eprintln!("Frame queue full, dropped oldest frame ({} total)", dropped);
        }
        queue.push_back(frame);
    }

    /// Take all queued frames in arrival order.
    pub fn drain(&self) -> Vec<Vec<f32>> {
        let mut queue = self.queue.lock().unwrap();
        queue.drain(..).collect()
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// True when no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of frames dropped due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Capture capability: deliver frames of float samples to a sink.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioCapture {
    /// Install the driver and direct its frames at `sink`.
    fn install(&mut self, params: CaptureParams, sink: FrameSink) -> Result<()>;

    /// Request capture. The cpal driver streams continuously once started,
    /// so repeated calls are idempotent; the mock delivers one batch per
    /// call.
    fn record(&mut self, duration_secs: f32, capture_id: i32) -> Result<()>;

    /// Stop the driver. No frames are delivered after this returns.
    fn terminate(&mut self);
}

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that cpal triggers when
/// probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Real audio capture using cpal.
///
/// Not `Send`: the stream lives on the control-loop thread; workers only
/// ever see the [`FrameSink`].
#[derive(Default)]
pub struct CpalAudioCapture {
    stream: Option<cpal::Stream>,
    started: bool,
}

impl CpalAudioCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCapture for CpalAudioCapture {
    fn install(&mut self, params: CaptureParams, sink: FrameSink) -> Result<()> {
        let device = with_suppressed_stderr(|| -> Result<cpal::Device> {
            let host = cpal::default_host();
            if params.capture_id <= 0 {
                host.default_input_device().ok_or(KeytapError::AudioCapture {
                    message: "no default input device".to_string(),
                })
            } else {
                host.input_devices()
                    .map_err(|e| KeytapError::AudioCapture {
                        message: format!("failed to enumerate input devices: {}", e),
                    })?
                    .nth(params.capture_id as usize)
                    .ok_or(KeytapError::AudioCapture {
                        message: format!("no input device with index {}", params.capture_id),
                    })
            }
        })?;

        let default_config =
            device
                .default_input_config()
                .map_err(|e| KeytapError::AudioCapture {
                    message: format!("failed to query input config: {}", e),
                })?;

        // n_channels == 0 means "device default"; the callback downmixes to
        // mono either way, so the core always sees a single channel.
        let channels = if params.n_channels == 0 {
            default_config.channels()
        } else {
            params.n_channels
        };

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = if channels <= 1 {
                        data.to_vec()
                    } else {
                        data.chunks_exact(channels as usize)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };
                    sink.push(mono);
                },
                |e| eprintln!("Audio capture error: {}", e),
                None,
            )
            .map_err(|e| KeytapError::AudioCapture {
                message: format!("failed to build input stream: {}", e),
            })?;

        stream.pause().ok();
        self.stream = Some(stream);
        self.started = false;
        Ok(())
    }

    fn record(&mut self, _duration_secs: f32, _capture_id: i32) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(KeytapError::AudioCapture {
            message: "record called before install".to_string(),
        })?;
        if !self.started {
            stream.play().map_err(|e| KeytapError::AudioCapture {
                message: format!("failed to start input stream: {}", e),
            })?;
            self.started = true;
        }
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.pause().ok();
        }
        self.started = false;
    }
}

/// Mock capture driver for tests.
///
/// Delivers a pre-chunked waveform one batch of frames per `record` call.
pub struct MockAudioCapture {
    frames: VecDeque<Vec<f32>>,
    frames_per_record: usize,
    sink: Option<FrameSink>,
    should_fail_install: bool,
    terminated: bool,
}

impl MockAudioCapture {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            frames_per_record: 1,
            sink: None,
            should_fail_install: false,
            terminated: false,
        }
    }

    /// Chunk `samples` into frames of `frame_len` and queue them for delivery.
    pub fn with_waveform(mut self, samples: &[f32], frame_len: usize) -> Self {
        self.frames = samples
            .chunks(frame_len.max(1))
            .map(|c| c.to_vec())
            .collect();
        self
    }

    /// Deliver `n` frames per `record` call instead of one.
    pub fn with_frames_per_record(mut self, n: usize) -> Self {
        self.frames_per_record = n.max(1);
        self
    }

    /// Configure the mock to fail on install.
    pub fn with_install_failure(mut self) -> Self {
        self.should_fail_install = true;
        self
    }

    /// True once `terminate` has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Frames not yet delivered.
    pub fn frames_remaining(&self) -> usize {
        self.frames.len()
    }
}

impl Default for MockAudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCapture for MockAudioCapture {
    fn install(&mut self, _params: CaptureParams, sink: FrameSink) -> Result<()> {
        if self.should_fail_install {
            return Err(KeytapError::AudioCapture {
                message: "mock install failure".to_string(),
            });
        }
        self.sink = Some(sink);
        self.terminated = false;
        Ok(())
    }

    fn record(&mut self, _duration_secs: f32, _capture_id: i32) -> Result<()> {
        let sink = self.sink.as_ref().ok_or(KeytapError::AudioCapture {
            message: "record called before install".to_string(),
        })?;
        if self.terminated {
            return Ok(());
        }
        for _ in 0..self.frames_per_record {
            match self.frames.pop_front() {
                Some(frame) => sink.push(frame),
                None => break,
            }
        }
        Ok(())
    }

    fn terminate(&mut self) {
        self.terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_preserves_arrival_order() {
        let sink = FrameSink::new(8);
        sink.push(vec![1.0]);
        sink.push(vec![2.0]);
        sink.push(vec![3.0]);

        let frames = sink.drain();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], vec![1.0]);
        assert_eq!(frames[2], vec![3.0]);
        assert!(sink.is_empty());
    }

    #[test]
    fn sink_drops_oldest_when_full() {
        let sink = FrameSink::new(2);
        sink.push(vec![1.0]);
        sink.push(vec![2.0]);
        sink.push(vec![3.0]);

        let frames = sink.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![2.0]);
        assert_eq!(frames[1], vec![3.0]);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn mock_delivers_batches_per_record() {
        let sink = FrameSink::new(16);
        let mut capture = MockAudioCapture::new()
            .with_waveform(&[0.0; 10], 2)
            .with_frames_per_record(2);

        capture.install(CaptureParams::default(), sink.clone()).unwrap();
        capture.record(1.0, 0).unwrap();
        assert_eq!(sink.len(), 2);
        capture.record(1.0, 0).unwrap();
        assert_eq!(sink.len(), 4);
        assert_eq!(capture.frames_remaining(), 1);
    }

    #[test]
    fn mock_install_failure() {
        let sink = FrameSink::new(4);
        let mut capture = MockAudioCapture::new().with_install_failure();
        let err = capture.install(CaptureParams::default(), sink).unwrap_err();
        assert!(matches!(err, KeytapError::AudioCapture { .. }));
    }

    #[test]
    fn mock_stops_delivering_after_terminate() {
        let sink = FrameSink::new(4);
        let mut capture = MockAudioCapture::new().with_waveform(&[0.0; 4], 2);
        capture.install(CaptureParams::default(), sink.clone()).unwrap();
        capture.terminate();
        capture.record(1.0, 0).unwrap();
        assert!(sink.is_empty());
    }
}
