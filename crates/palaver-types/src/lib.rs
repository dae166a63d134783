//! Shared types for the Palaver spoken-dialogue platform.
//!
//! This crate provides the foundational types used across all Palaver
//! crates: the WebSocket wire envelopes exchanged with dialogue clients,
//! the audio format descriptor advertised by synthesizers, chat history
//! entries and per-call LLM options, and the ASR usage record emitted
//! after each recognized utterance.
//!
//! No crate in the workspace depends on anything *except* `palaver-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! clean and prevents circular dependencies.

pub mod audio;
pub mod llm;
pub mod usage;
pub mod wire;

pub use audio::AudioFormat;
pub use llm::{ChatRole, ChatTurn, LlmOptions};
pub use usage::UsageRecord;
pub use wire::{ClientFrame, FrameError, ServerFrame};
