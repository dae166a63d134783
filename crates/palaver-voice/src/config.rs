//! Engine and session configuration.
//!
//! Every empirical constant in the engine (retry waits, cooldowns, queue
//! bounds, detection thresholds) lives here with a serde default matching
//! production behavior, so deployments can tune them and tests can shrink
//! the waits to keep suites fast.

use palaver_types::LlmOptions;
use serde::{Deserialize, Serialize};

/// Timing and capacity knobs shared by every session in a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wait before retrying when the ASR permit pool is saturated.
    #[serde(default = "default_pool_retry_ms")]
    pub pool_retry_ms: u64,
    /// Fixed cooldown after a rate-limited ASR failure.
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
    /// Wait after a transient ASR failure before notifying the reconnect
    /// manager.
    #[serde(default = "default_transient_pre_notify_ms")]
    pub transient_pre_notify_ms: u64,
    /// Wait after notifying the reconnect manager before the next attempt.
    #[serde(default = "default_transient_post_notify_ms")]
    pub transient_post_notify_ms: u64,
    /// Interval between recognizer liveness checks while connected.
    #[serde(default = "default_liveness_tick_ms")]
    pub liveness_tick_ms: u64,
    /// Wait after recognizer activity is lost before reconnecting.
    #[serde(default = "default_activity_lost_wait_ms")]
    pub activity_lost_wait_ms: u64,
    /// First reconnect backoff delay.
    #[serde(default = "default_reconnect_floor_ms")]
    pub reconnect_floor_ms: u64,
    /// Reconnect backoff ceiling.
    #[serde(default = "default_reconnect_ceiling_ms")]
    pub reconnect_ceiling_ms: u64,
    /// Backoff growth factor between attempts.
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    /// Reconnect attempts before the manager gives up.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// Settle time between recognizer connect and the `connected` frame.
    #[serde(default = "default_connect_settle_ms")]
    pub connect_settle_ms: u64,
    /// Budget for one fire-and-forget usage record.
    #[serde(default = "default_usage_timeout_ms")]
    pub usage_timeout_ms: u64,
    /// Capture bitrate used to estimate audio volume from duration.
    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u64,
    /// Bound of each outbound writer queue (text and binary).
    #[serde(default = "default_writer_queue")]
    pub writer_queue: usize,
    /// Bound of the synthesized-audio chunk channel per utterance.
    #[serde(default = "default_tts_chunk_buffer")]
    pub tts_chunk_buffer: usize,
    /// Bound of the pending synthesis task queue.
    #[serde(default = "default_tts_queue")]
    pub tts_queue: usize,
    /// History length that triggers trimming.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// History length kept after a trim.
    #[serde(default = "default_history_keep")]
    pub history_keep: usize,
}

fn default_pool_retry_ms() -> u64 {
    2000
}

fn default_rate_limit_cooldown_ms() -> u64 {
    30000
}

fn default_transient_pre_notify_ms() -> u64 {
    3000
}

fn default_transient_post_notify_ms() -> u64 {
    2000
}

fn default_liveness_tick_ms() -> u64 {
    1000
}

fn default_activity_lost_wait_ms() -> u64 {
    2000
}

fn default_reconnect_floor_ms() -> u64 {
    1000
}

fn default_reconnect_ceiling_ms() -> u64 {
    30000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_connect_settle_ms() -> u64 {
    500
}

fn default_usage_timeout_ms() -> u64 {
    5000
}

fn default_audio_bytes_per_second() -> u64 {
    32000
}

fn default_writer_queue() -> usize {
    100
}

fn default_tts_chunk_buffer() -> usize {
    10
}

fn default_tts_queue() -> usize {
    100
}

fn default_history_cap() -> usize {
    100
}

fn default_history_keep() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pool_retry_ms: default_pool_retry_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
            transient_pre_notify_ms: default_transient_pre_notify_ms(),
            transient_post_notify_ms: default_transient_post_notify_ms(),
            liveness_tick_ms: default_liveness_tick_ms(),
            activity_lost_wait_ms: default_activity_lost_wait_ms(),
            reconnect_floor_ms: default_reconnect_floor_ms(),
            reconnect_ceiling_ms: default_reconnect_ceiling_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            connect_settle_ms: default_connect_settle_ms(),
            usage_timeout_ms: default_usage_timeout_ms(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            writer_queue: default_writer_queue(),
            tts_chunk_buffer: default_tts_chunk_buffer(),
            tts_queue: default_tts_queue(),
            history_cap: default_history_cap(),
            history_keep: default_history_keep(),
        }
    }
}

/// Barge-in detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_enabled")]
    pub enabled: bool,
    /// RMS energy a frame must exceed to count as speech.
    #[serde(default = "default_vad_threshold")]
    pub threshold: f64,
    /// Speech frames required in a row before a barge-in is reported.
    #[serde(default = "default_vad_consecutive_frames")]
    pub consecutive_frames: u32,
    /// Rolling window of quiet-frame samples for the adaptive floor.
    #[serde(default = "default_vad_noise_window")]
    pub noise_window: usize,
}

fn default_vad_enabled() -> bool {
    true
}

fn default_vad_threshold() -> f64 {
    500.0
}

fn default_vad_consecutive_frames() -> u32 {
    1
}

fn default_vad_noise_window() -> usize {
    20
}

impl Default for VadConfig {
    fn default() -> Self {
        VadConfig {
            enabled: default_vad_enabled(),
            threshold: default_vad_threshold(),
            consecutive_frames: default_vad_consecutive_frames(),
            noise_window: default_vad_noise_window(),
        }
    }
}

/// Input text filter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Optional blacklist dictionary file, one phrase per line with `#`
    /// comments. The built-in filler list is used when unset or missing.
    #[serde(default)]
    pub dictionary_path: Option<String>,
}

/// Per-session configuration supplied by the host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Recognition language hint passed to the transcriber.
    #[serde(default = "default_language")]
    pub language: String,
    /// Usage attribution keys.
    #[serde(default)]
    pub credential_id: String,
    #[serde(default)]
    pub assistant_id: String,
    #[serde(default)]
    pub group_id: String,
    /// Installed on the language model before the first query, when set.
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub llm: LlmOptions,
    #[serde(default)]
    pub vad: VadConfig,
}

fn default_language() -> String {
    "en".to_owned()
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            language: default_language(),
            credential_id: String::new(),
            assistant_id: String::new(),
            group_id: String::new(),
            system_prompt: String::new(),
            llm: LlmOptions::default(),
            vad: VadConfig::default(),
        }
    }
}
