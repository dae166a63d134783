//! Energy-based barge-in detection.
//!
//! Runs only while synthesized speech is playing: a frame whose RMS energy
//! clears the effective threshold counts toward a consecutive-frame
//! requirement, and meeting it reports a barge-in. Quiet frames feed a
//! rolling noise estimate that adapts the threshold to the caller's
//! environment.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::VadConfig;

/// Frames quieter than this RMS are treated as background noise.
const NOISE_CEILING: f64 = 200.0;

/// Lower clamp of the adaptive threshold.
const ADAPTIVE_FLOOR: f64 = 50.0;

/// Adaptive threshold as a multiple of the mean noise level.
const NOISE_MULTIPLIER: f64 = 3.0;

/// Thresholds below this force single-frame confirmation: a detector tuned
/// this sensitive would otherwise miss short interjections while waiting
/// for its frame count.
const LOW_THRESHOLD_CUTOFF: f64 = 200.0;

/// Detects caller speech over little-endian 16-bit PCM frames.
pub struct VadDetector {
    enabled: bool,
    threshold: f64,
    adaptive_threshold: f64,
    consecutive_needed: u32,
    consecutive_count: u32,
    noise_samples: VecDeque<f64>,
    noise_window: usize,
    last_frame_log: Instant,
}

impl VadDetector {
    pub fn new(config: &VadConfig) -> Self {
        let mut consecutive_needed = config.consecutive_frames.max(1);
        if config.threshold < LOW_THRESHOLD_CUTOFF && consecutive_needed > 1 {
            tracing::info!(
                threshold = config.threshold,
                "low threshold, forcing single-frame confirmation"
            );
            consecutive_needed = 1;
        }
        VadDetector {
            enabled: config.enabled,
            threshold: config.threshold,
            adaptive_threshold: 0.0,
            consecutive_needed,
            consecutive_count: 0,
            noise_samples: VecDeque::with_capacity(config.noise_window),
            noise_window: config.noise_window.max(1),
            last_frame_log: Instant::now() - Duration::from_secs(1),
        }
    }

    /// Examines one caller audio frame. Returns true when enough
    /// consecutive speech frames have arrived to count as a barge-in.
    ///
    /// Detection only runs while TTS is playing; otherwise the consecutive
    /// counter resets so stale progress never carries into the next reply.
    pub fn check_barge_in(&mut self, frame: &[u8], tts_playing: bool) -> bool {
        if frame.len() < 2 {
            return false;
        }
        if !self.enabled || !tts_playing {
            self.consecutive_count = 0;
            return false;
        }

        let rms = frame_rms(frame);
        if rms < NOISE_CEILING {
            self.observe_noise(rms);
        }
        let effective = if self.adaptive_threshold > 0.0 {
            self.adaptive_threshold
        } else {
            self.threshold
        };

        if self.last_frame_log.elapsed() >= Duration::from_secs(1) {
            tracing::debug!(
                rms = rms as u64,
                effective = effective as u64,
                count = self.consecutive_count,
                "vad frame"
            );
            self.last_frame_log = Instant::now();
        }

        if rms > effective {
            self.consecutive_count += 1;
            if self.consecutive_count >= self.consecutive_needed {
                self.consecutive_count = 0;
                return true;
            }
        } else {
            self.consecutive_count = 0;
        }
        false
    }

    fn observe_noise(&mut self, rms: f64) {
        if self.noise_samples.len() == self.noise_window {
            self.noise_samples.pop_front();
        }
        self.noise_samples.push_back(rms);
        let mean = self.noise_samples.iter().sum::<f64>() / self.noise_samples.len() as f64;
        self.adaptive_threshold = (mean * NOISE_MULTIPLIER).clamp(ADAPTIVE_FLOOR, self.threshold);
    }

    /// Disabling also clears any consecutive-frame progress.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.consecutive_count = 0;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// RMS energy of a little-endian 16-bit PCM frame. A trailing odd byte is
/// ignored.
fn frame_rms(frame: &[u8]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u32;
    for pair in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64;
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / f64::from(count)).sqrt()
}
