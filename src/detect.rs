//! Keypress detection on the int16 waveform.
//!
//! One-pass threshold detector: a centered sliding window tracks the
//! rectified max and the rectified moving average; an event is emitted at
//! the position of the window max whenever it exceeds a fixed multiple of
//! the average, subject to a refractory period.

use std::collections::VecDeque;

use crate::defaults;

/// A single detected acoustic onset, presumed to be one key strike.
///
/// Events are immutable after detection; cluster assignments live in
/// separate structures keyed by event index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    /// Sample offset of the peak into the waveform.
    pub offset: usize,
    /// Rectified peak amplitude at the offset.
    pub peak: i16,
}

/// Detector configuration.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Threshold as a multiple of the local rectified moving average.
    pub threshold: f64,
    /// Window radius in samples.
    pub r_win: usize,
    /// Refractory period: minimum sample distance between events.
    pub r_refrac: usize,
    /// Drop events whose peak is far below the mean event peak.
    pub remove_low_power: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::DETECT_THRESHOLD,
            r_win: defaults::DETECT_WINDOW,
            r_refrac: defaults::DETECT_REFRACTORY,
            remove_low_power: true,
        }
    }
}

/// Detection output: the ordered event list plus two debug waveforms.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Detected events, offsets strictly increasing and separated by at
    /// least the refractory period.
    pub presses: Vec<KeyPress>,
    /// Threshold envelope per sample (zero in the skipped edge regions).
    pub threshold: Vec<i16>,
    /// Rectified window max per sample (zero in the skipped edge regions).
    pub window_max: Vec<i16>,
}

/// Find keypress onsets in `samples`.
///
/// Detection is one-pass, left-to-right, and deterministic. The first and
/// last `r_win` samples are skipped; a waveform shorter than the window
/// yields an empty list without error.
pub fn find_keypresses(samples: &[i16], cfg: &DetectorConfig) -> Detection {
    let n = samples.len();
    let r = cfg.r_win;

    let mut detection = Detection {
        presses: Vec::new(),
        threshold: vec![0; n],
        window_max: vec![0; n],
    };

    if n < 2 * r + 1 {
        return detection;
    }

    let rect: Vec<i64> = samples.iter().map(|&s| (s as i64).abs()).collect();

    // Prefix sums for the rectified moving average.
    let mut prefix = vec![0i64; n + 1];
    for (i, &v) in rect.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }

    // Monotonic deque of indices with decreasing rectified values; the
    // front is the argmax of the current window. Ties keep the newer
    // index so a repeated peak can trigger once the older one has left.
    let mut deque: VecDeque<usize> = VecDeque::new();
    let push = |deque: &mut VecDeque<usize>, idx: usize| {
        while deque.back().is_some_and(|&b| rect[b] <= rect[idx]) {
            deque.pop_back();
        }
        deque.push_back(idx);
    };

    for idx in 0..=2 * r {
        push(&mut deque, idx);
    }

    let window_len = (2 * r + 1) as f64;

    for t in r..n - r {
        if t > r {
            push(&mut deque, t + r);
            while deque.front().is_some_and(|&f| f + r < t) {
                deque.pop_front();
            }
        }

        let avg = (prefix[t + r + 1] - prefix[t - r]) as f64 / window_len;
        let thr = cfg.threshold * avg;
        let argmax = *deque.front().expect("window is never empty");
        let wmax = rect[argmax];

        detection.threshold[t] = thr.min(i16::MAX as f64) as i16;
        detection.window_max[t] = wmax.min(i16::MAX as i64) as i16;

        if wmax > 0 && wmax as f64 > thr {
            let far_enough = detection
                .presses
                .last()
                .is_none_or(|last| argmax >= last.offset + cfg.r_refrac);
            if far_enough {
                detection.presses.push(KeyPress {
                    offset: argmax,
                    peak: wmax.min(i16::MAX as i64) as i16,
                });
            }
        }
    }

    if cfg.remove_low_power && detection.presses.len() >= 2 {
        let mean = detection.presses.iter().map(|p| p.peak as f64).sum::<f64>()
            / detection.presses.len() as f64;
        let cutoff = defaults::LOW_POWER_FRACTION * mean;
        detection.presses.retain(|p| p.peak as f64 >= cutoff);
    }

    detection
}
