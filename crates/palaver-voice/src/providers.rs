//! Provider seams for recognition, synthesis, language models, and usage
//! metering.
//!
//! Vendor SDK adapters implement these traits outside this crate. Provider
//! push interfaces are rendered as channel publication rather than
//! callbacks: a transcriber is handed an `mpsc::Sender` at init time and
//! publishes recognition events into it for as long as its stream lives.

use std::sync::Arc;

use async_trait::async_trait;
use palaver_types::{AudioFormat, ChatTurn, LlmOptions, UsageRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// An event published by a transcriber stream.
#[derive(Debug, Clone)]
pub enum TranscriberEvent {
    /// A recognition result. Intermediate results (`is_final == false`)
    /// carry the cumulative text recognized so far; final results also
    /// report the utterance's audio duration for usage metering.
    Result {
        text: String,
        is_final: bool,
        audio_seconds: f64,
    },
    /// An asynchronous provider failure on a live stream.
    Error(ProviderError),
}

/// A streaming speech recognizer.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Registers the channel recognition events are published into.
    /// Called once, before the first `connect`.
    async fn init(&self, events: mpsc::Sender<TranscriberEvent>) -> Result<(), ProviderError>;

    /// Opens the recognition stream and starts the provider's receive
    /// machinery. Returns once the stream is established; events flow into
    /// the registered channel from then on.
    async fn connect(&self, language: &str) -> Result<(), ProviderError>;

    /// Feeds one caller audio frame into the live stream.
    async fn send_audio(&self, frame: &[u8]) -> Result<(), ProviderError>;

    /// Whether the stream is still live. Consulted by the liveness ticker.
    fn is_active(&self) -> bool;

    /// Tears down the stream. Idempotent.
    async fn stop(&self);
}

/// A streaming speech synthesizer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Streams raw audio chunks for `text` into `chunks`, honoring
    /// `cancel`. Returns when synthesis completes, fails, or is cancelled;
    /// the sender is dropped on return.
    async fn synthesize(
        &self,
        cancel: CancellationToken,
        chunks: mpsc::Sender<Vec<u8>>,
        text: &str,
    ) -> Result<(), ProviderError>;

    /// Format of the chunks this synthesizer produces.
    fn format(&self) -> AudioFormat;

    /// Releases provider resources. Idempotent.
    async fn close(&self);
}

/// A chat language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Installs the system prompt applied to subsequent queries.
    async fn set_system_prompt(&self, prompt: &str);

    /// One chat completion over the session's trimmed history. The last
    /// turn is the user utterance being answered.
    async fn query(&self, turns: &[ChatTurn], options: &LlmOptions)
        -> Result<String, ProviderError>;

    /// Releases provider resources. Idempotent.
    async fn close(&self);
}

/// A destination for ASR usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Records one usage unit. Callers bound this with a timeout and
    /// swallow failures; sinks must never block a pipeline.
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError>;
}

/// The provider set a session is wired with.
#[derive(Clone)]
pub struct ProviderSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub llm: Arc<dyn LlmProvider>,
    pub usage: Arc<dyn UsageSink>,
}
