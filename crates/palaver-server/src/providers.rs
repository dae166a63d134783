//! Built-in development providers.
//!
//! These stand in for vendor speech and language services so the server
//! runs end to end out of the box: the transcriber echoes UTF-8 audio
//! frames back as finished utterances, the synthesizer renders a sine
//! tone sized to the reply, and the language model answers with a canned
//! echo. Production deployments swap in real adapters by constructing
//! their own [`ProviderSet`].

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use palaver_types::{AudioFormat, ChatTurn, LlmOptions, UsageRecord};
use palaver_voice::{
    LlmProvider, ProviderError, ProviderSet, Synthesizer, Transcriber, TranscriberEvent, UsageSink,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Builds the development provider set described by `config`.
///
/// Usage records go to `usage.endpoint` when one is configured and to the
/// log otherwise.
pub fn dev_provider_set(config: &Config) -> ProviderSet {
    let usage: Arc<dyn UsageSink> = match &config.usage.endpoint {
        Some(endpoint) => Arc::new(HttpUsageSink::new(endpoint.clone())),
        None => Arc::new(LogUsageSink),
    };
    ProviderSet {
        transcriber: Arc::new(LoopbackTranscriber::new(
            config.engine.audio_bytes_per_second,
        )),
        synthesizer: Arc::new(ToneSynthesizer::new()),
        llm: Arc::new(EchoLlm::default()),
        usage,
    }
}

/// Development recognizer. Each binary frame that decodes as UTF-8 is
/// treated as one finished utterance; anything else is ignored as
/// unrecognized sound.
pub struct LoopbackTranscriber {
    events: Mutex<Option<mpsc::Sender<TranscriberEvent>>>,
    active: AtomicBool,
    bytes_per_second: u64,
}

impl LoopbackTranscriber {
    pub fn new(bytes_per_second: u64) -> Self {
        LoopbackTranscriber {
            events: Mutex::new(None),
            active: AtomicBool::new(false),
            bytes_per_second: bytes_per_second.max(1),
        }
    }
}

#[async_trait]
impl Transcriber for LoopbackTranscriber {
    async fn init(&self, events: mpsc::Sender<TranscriberEvent>) -> Result<(), ProviderError> {
        *self.events.lock().expect("events lock poisoned") = Some(events);
        Ok(())
    }

    async fn connect(&self, language: &str) -> Result<(), ProviderError> {
        tracing::debug!(language, "loopback recognizer connected");
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> Result<(), ProviderError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(ProviderError::new("recognizer stream is not open"));
        }
        let Ok(text) = std::str::from_utf8(frame) else {
            return Ok(());
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let sender = self
            .events
            .lock()
            .expect("events lock poisoned")
            .clone();
        if let Some(sender) = sender {
            let event = TranscriberEvent::Result {
                text: text.to_owned(),
                is_final: true,
                audio_seconds: frame.len() as f64 / self.bytes_per_second as f64,
            };
            sender
                .send(event)
                .await
                .map_err(|_| ProviderError::new("recognition event channel closed"))?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Development synthesizer. Renders a paced 440 Hz sine tone whose length
/// scales with the text, so barge-in and cancellation have something real
/// to interrupt.
pub struct ToneSynthesizer {
    format: AudioFormat,
}

const TONE_HZ: f32 = 440.0;
const CHUNK_MS: u64 = 100;
const CHUNK_PACING_MS: u64 = 20;

impl ToneSynthesizer {
    pub fn new() -> Self {
        ToneSynthesizer {
            format: AudioFormat {
                sample_rate: 16_000,
                channels: 1,
                bit_depth: 16,
            },
        }
    }

    /// One chunk of signed 16-bit mono sine samples starting at `phase`.
    fn render_chunk(&self, phase: &mut f32) -> Vec<u8> {
        let samples = (self.format.sample_rate as u64 * CHUNK_MS / 1000) as usize;
        let step = TAU * TONE_HZ / self.format.sample_rate as f32;
        let mut chunk = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            let sample = (phase.sin() * 8_000.0) as i16;
            chunk.extend_from_slice(&sample.to_le_bytes());
            *phase = (*phase + step) % TAU;
        }
        chunk
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(
        &self,
        cancel: CancellationToken,
        chunks: mpsc::Sender<Vec<u8>>,
        text: &str,
    ) -> Result<(), ProviderError> {
        // Roughly one chunk per syllable-sized slice of text, bounded so a
        // long reply cannot pin the session for minutes.
        let count = (text.chars().count() / 4).clamp(2, 40);
        let mut phase = 0.0f32;
        for _ in 0..count {
            let chunk = self.render_chunk(&mut phase);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = chunks.send(chunk) => {
                    if result.is_err() {
                        return Ok(());
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_millis(CHUNK_PACING_MS)) => {}
            }
        }
        Ok(())
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn close(&self) {}
}

/// Development language model that echoes the caller's words back.
#[derive(Default)]
pub struct EchoLlm {
    system_prompt: Mutex<String>,
}

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn set_system_prompt(&self, prompt: &str) {
        *self.system_prompt.lock().expect("prompt lock poisoned") = prompt.to_owned();
    }

    async fn query(
        &self,
        turns: &[ChatTurn],
        _options: &LlmOptions,
    ) -> Result<String, ProviderError> {
        let last = turns
            .last()
            .ok_or_else(|| ProviderError::new("empty chat history"))?;
        Ok(format!("You said: {}", last.content))
    }

    async fn close(&self) {}
}

/// Writes usage records to the log. The default sink when no endpoint is
/// configured.
pub struct LogUsageSink;

#[async_trait]
impl UsageSink for LogUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError> {
        tracing::info!(
            session = %record.session_id,
            credential = %record.credential_id,
            audio_seconds = record.audio_seconds,
            estimated_bytes = record.estimated_bytes,
            "usage recorded"
        );
        Ok(())
    }
}

/// Posts usage records to an HTTP endpoint as JSON.
pub struct HttpUsageSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUsageSink {
    pub fn new(endpoint: String) -> Self {
        HttpUsageSink {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl UsageSink for HttpUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&record)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("usage post failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new(format!(
                "usage endpoint returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_publishes_finals_for_utf8_frames() {
        let transcriber = LoopbackTranscriber::new(32_000);
        let (tx, mut rx) = mpsc::channel(4);
        transcriber.init(tx).await.expect("init");
        transcriber.connect("en").await.expect("connect");

        transcriber
            .send_audio("Hello there".as_bytes())
            .await
            .expect("send");
        match rx.recv().await.expect("event") {
            TranscriberEvent::Result {
                text,
                is_final,
                audio_seconds,
            } => {
                assert_eq!(text, "Hello there");
                assert!(is_final);
                assert!((audio_seconds - 11.0 / 32_000.0).abs() < 1e-9);
            }
            TranscriberEvent::Error(err) => panic!("unexpected error: {err}"),
        }

        // Non-UTF-8 frames are dropped silently.
        transcriber
            .send_audio(&[0x80, 0x81, 0x82])
            .await
            .expect("send");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn loopback_rejects_audio_when_stopped() {
        let transcriber = LoopbackTranscriber::new(32_000);
        let (tx, _rx) = mpsc::channel(4);
        transcriber.init(tx).await.expect("init");
        assert!(transcriber.send_audio(b"hi").await.is_err());

        transcriber.connect("en").await.expect("connect");
        assert!(transcriber.is_active());
        transcriber.stop().await;
        assert!(!transcriber.is_active());
        assert!(transcriber.send_audio(b"hi").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tone_length_tracks_text_length() {
        let synth = ToneSynthesizer::new();

        let (tx, mut rx) = mpsc::channel(64);
        synth
            .synthesize(CancellationToken::new(), tx, "Hi.")
            .await
            .expect("synthesize");
        let mut short = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.len(), 3200);
            short += 1;
        }
        assert_eq!(short, 2);

        let (tx, mut rx) = mpsc::channel(64);
        let text = "A considerably longer reply that should produce more audio.";
        synth
            .synthesize(CancellationToken::new(), tx, text)
            .await
            .expect("synthesize");
        let mut long = 0;
        while rx.recv().await.is_some() {
            long += 1;
        }
        assert!(long > short);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tone_stops_streaming() {
        let synth = ToneSynthesizer::new();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            synth
                .synthesize(token, tx, &"word ".repeat(100))
                .await
                .expect("synthesize");
        });

        let _first = rx.recv().await.expect("at least one chunk");
        cancel.cancel();
        handle.await.expect("synthesis task");
        // The sender is dropped on return, so the stream ends promptly.
        let mut rest = 0;
        while rx.recv().await.is_some() {
            rest += 1;
        }
        assert!(rest < 40);
    }

    #[tokio::test]
    async fn echo_llm_answers_with_the_last_turn() {
        let llm = EchoLlm::default();
        llm.set_system_prompt("Be helpful.").await;
        let turns = vec![ChatTurn::user("How are you?")];
        let reply = llm
            .query(&turns, &LlmOptions::default())
            .await
            .expect("query");
        assert_eq!(reply, "You said: How are you?");
        assert!(llm.query(&[], &LlmOptions::default()).await.is_err());
    }
}
