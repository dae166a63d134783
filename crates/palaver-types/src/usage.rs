//! ASR usage records emitted after recognized utterances.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One billable unit of speech recognition.
///
/// Emitted fire-and-forget when a final recognition result reports a
/// positive audio duration. The byte estimate is derived from the duration
/// at the session's capture bitrate, not measured from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub session_id: Uuid,
    pub credential_id: String,
    pub assistant_id: String,
    pub group_id: String,
    pub audio_seconds: f64,
    pub estimated_bytes: u64,
}

impl UsageRecord {
    /// Estimates the byte volume for `audio_seconds` of capture audio at
    /// `bytes_per_second` and builds the record.
    pub fn estimate(
        session_id: Uuid,
        credential_id: impl Into<String>,
        assistant_id: impl Into<String>,
        group_id: impl Into<String>,
        audio_seconds: f64,
        bytes_per_second: u64,
    ) -> Self {
        UsageRecord {
            session_id,
            credential_id: credential_id.into(),
            assistant_id: assistant_id.into(),
            group_id: group_id.into(),
            audio_seconds,
            estimated_bytes: (audio_seconds * bytes_per_second as f64) as u64,
        }
    }
}
