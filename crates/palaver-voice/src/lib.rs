//! The Palaver realtime dialogue engine.
//!
//! One [`Session`] per caller connection: audio frames flow in through a
//! [`FrameSource`], recognized speech is deduplicated and answered by a
//! language model, and the synthesized reply streams back out through a
//! [`FrameSink`]. The engine is transport- and vendor-agnostic; hosts
//! supply the connection endpoints and a [`ProviderSet`] of recognition,
//! synthesis, language-model, and usage adapters.
//!
//! The architecture separates concerns: recognizer connections are
//! metered by a process-wide [`PermitPool`], a per-session state lock
//! carries the dedup cursors and playback flags, and every outbound frame
//! funnels through a non-blocking writer so a slow consumer can never
//! stall recognition.

pub mod asr;
pub mod config;
pub mod error;
pub mod filter;
pub mod llm;
pub mod pool;
pub mod processor;
pub mod providers;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;
pub mod tts;
pub mod vad;
pub mod writer;

pub use asr::{AsrEvent, AsrService};
pub use config::{EngineConfig, FilterConfig, SessionConfig, VadConfig};
pub use error::{ErrorKind, ProviderError, SessionError};
pub use filter::FilterManager;
pub use llm::LlmService;
pub use pool::{AsrPermit, PermitPool};
pub use processor::MessageProcessor;
pub use providers::{
    LlmProvider, ProviderSet, Synthesizer, Transcriber, TranscriberEvent, UsageSink,
};
pub use reconnect::{BackoffStrategy, ReconnectHandler, ReconnectManager};
pub use session::Session;
pub use state::ClientState;
pub use transport::{FrameSink, FrameSource, InboundFrame, TransportError};
pub use tts::TtsService;
pub use vad::VadDetector;
pub use writer::MessageWriter;
