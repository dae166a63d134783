//! Wire envelopes for the dialogue WebSocket.
//!
//! Text frames carry JSON envelopes tagged by a `type` field; binary frames
//! carry raw audio (caller microphone audio inbound, synthesized speech
//! outbound) and never have a JSON wrapper.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AudioFormat;

/// A JSON envelope sent from the server to the dialogue client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// The session is fully wired and ready to accept audio.
    #[serde(rename = "connected")]
    Connected,
    /// A recognized utterance increment, emitted before any processing.
    #[serde(rename = "asr_result")]
    AsrResult { text: String },
    /// The assistant's full text reply for one utterance.
    #[serde(rename = "llm_response")]
    LlmResponse { text: String },
    /// Synthesized audio follows as binary frames in this format.
    #[serde(rename = "tts_start", rename_all = "camelCase")]
    TtsStart {
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
    },
    /// Synthesis for the current utterance has finished or been cancelled.
    #[serde(rename = "tts_end")]
    TtsEnd,
    /// A session error. Fatal errors terminate all further processing.
    #[serde(rename = "error")]
    Error { message: String, fatal: bool },
    /// Acknowledges a `new_session` request after history has been cleared.
    #[serde(rename = "session_cleared")]
    SessionCleared,
    /// Liveness reply to a client `ping`.
    #[serde(rename = "pong")]
    Pong,
}

impl ServerFrame {
    /// Builds a `tts_start` frame advertising the given audio format.
    pub fn tts_start(format: AudioFormat) -> Self {
        ServerFrame::TtsStart {
            sample_rate: format.sample_rate,
            channels: format.channels,
            bit_depth: format.bit_depth,
        }
    }

    /// Builds an `error` frame.
    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        ServerFrame::Error {
            message: message.into(),
            fatal,
        }
    }
}

/// A JSON envelope sent from the dialogue client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Clear conversation history and start a fresh dialogue.
    #[serde(rename = "new_session")]
    NewSession,
    /// Inject text directly into the dialogue pipeline, bypassing ASR.
    #[serde(rename = "text")]
    Text { text: String },
    /// Liveness probe; answered with `pong`.
    #[serde(rename = "ping")]
    Ping,
}

impl ClientFrame {
    /// Parses a client text frame.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Failure to interpret a client frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed client frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let json = serde_json::to_string(&ServerFrame::Connected).expect("serialize connected");
        assert_eq!(json, r#"{"type":"connected"}"#);

        let json = serde_json::to_string(&ServerFrame::AsrResult {
            text: "hello".into(),
        })
        .expect("serialize asr_result");
        assert_eq!(json, r#"{"type":"asr_result","text":"hello"}"#);

        let json = serde_json::to_string(&ServerFrame::error("boom", true)).expect("serialize error");
        assert_eq!(json, r#"{"type":"error","message":"boom","fatal":true}"#);
    }

    #[test]
    fn tts_start_uses_camel_case_fields() {
        let frame = ServerFrame::tts_start(AudioFormat {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
        });
        let json = serde_json::to_string(&frame).expect("serialize tts_start");
        assert_eq!(
            json,
            r#"{"type":"tts_start","sampleRate":16000,"channels":1,"bitDepth":16}"#
        );
    }

    #[test]
    fn client_frames_parse_by_type_tag() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"new_session"}"#).expect("parse new_session"),
            ClientFrame::NewSession
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"text","text":"hi there"}"#).expect("parse text"),
            ClientFrame::Text {
                text: "hi there".into()
            }
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"ping"}"#).expect("parse ping"),
            ClientFrame::Ping
        );
    }

    #[test]
    fn unknown_client_frame_is_rejected() {
        assert!(ClientFrame::parse(r#"{"type":"reboot"}"#).is_err());
        assert!(ClientFrame::parse("not json").is_err());
    }
}
