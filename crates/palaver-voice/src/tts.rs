//! Cancellable streaming speech synthesis.
//!
//! Each synthesis call returns a bounded channel of audio chunks. Items
//! are `Some(bytes)`; an item of `None` is the abnormal-stop sentinel sent
//! after a provider failure, and the consumer must stop rather than treat
//! it as a zero-length chunk. The channel closing without the sentinel
//! means synthesis completed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use palaver_types::AudioFormat;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{self, SessionError};
use crate::providers::Synthesizer;

pub struct TtsService {
    synthesizer: Arc<dyn Synthesizer>,
    chunk_bound: usize,
    closed: AtomicBool,
}

impl TtsService {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, chunk_bound: usize) -> Self {
        TtsService {
            synthesizer,
            chunk_bound,
            closed: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.synthesizer.format()
    }

    /// Starts synthesizing `text` and returns its chunk stream. Cancelling
    /// `cancel` stops the provider and ends the stream without a sentinel.
    pub fn synthesize(
        &self,
        cancel: CancellationToken,
        text: &str,
    ) -> Result<mpsc::Receiver<Option<Vec<u8>>>, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::recoverable("tts", "service closed"));
        }
        if text.trim().is_empty() {
            return Err(SessionError::recoverable("tts", "empty synthesis text"));
        }

        let (out_tx, out_rx) = mpsc::channel::<Option<Vec<u8>>>(self.chunk_bound);
        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<u8>>(self.chunk_bound);
        let synthesizer = Arc::clone(&self.synthesizer);
        let text = text.to_owned();

        tokio::spawn(async move {
            let forward = {
                let out_tx = out_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            chunk = raw_rx.recv() => {
                                let Some(chunk) = chunk else { return };
                                if out_tx.send(Some(chunk)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                })
            };

            let result = synthesizer.synthesize(cancel.clone(), raw_tx, &text).await;
            let _ = forward.await;
            if let Err(err) = result {
                let classified = error::classify("tts", &err);
                error::log_classified(&classified);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = out_tx.send(None) => {}
                }
            }
        });

        Ok(out_rx)
    }

    /// Stops accepting synthesis and releases the provider. Idempotent.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.synthesizer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;

    struct ScriptedSynthesizer {
        chunks: usize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        async fn synthesize(
            &self,
            cancel: CancellationToken,
            chunks: mpsc::Sender<Vec<u8>>,
            _text: &str,
        ) -> Result<(), ProviderError> {
            for i in 0..self.chunks {
                if self.fail_after == Some(i) {
                    return Err(ProviderError::new("synthesis backend failed"));
                }
                let chunk = vec![i as u8; 4];
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = chunks.send(chunk) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(())
        }

        fn format(&self) -> AudioFormat {
            AudioFormat::default()
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn completed_synthesis_closes_the_stream_without_a_sentinel() {
        let service = TtsService::new(
            Arc::new(ScriptedSynthesizer {
                chunks: 3,
                fail_after: None,
            }),
            10,
        );
        let mut rx = service
            .synthesize(CancellationToken::new(), "hello")
            .expect("synthesize");

        let mut received = 0;
        while let Some(item) = rx.recv().await {
            assert!(item.is_some(), "no sentinel on the success path");
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test]
    async fn provider_failure_sends_the_sentinel_after_delivered_chunks() {
        let service = TtsService::new(
            Arc::new(ScriptedSynthesizer {
                chunks: 3,
                fail_after: Some(2),
            }),
            10,
        );
        let mut rx = service
            .synthesize(CancellationToken::new(), "hello")
            .expect("synthesize");

        assert!(rx.recv().await.unwrap().is_some());
        assert!(rx.recv().await.unwrap().is_some());
        assert!(rx.recv().await.unwrap().is_none(), "failure ends with the sentinel");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream_promptly() {
        let service = TtsService::new(
            Arc::new(ScriptedSynthesizer {
                chunks: 1_000_000,
                fail_after: None,
            }),
            4,
        );
        let cancel = CancellationToken::new();
        let mut rx = service.synthesize(cancel.clone(), "hello").expect("synthesize");

        assert!(rx.recv().await.unwrap().is_some());
        cancel.cancel();
        while let Some(item) = rx.recv().await {
            assert!(item.is_some(), "cancellation must not produce the sentinel");
        }
    }

    #[tokio::test]
    async fn closed_service_and_empty_text_are_rejected() {
        let service = TtsService::new(
            Arc::new(ScriptedSynthesizer {
                chunks: 1,
                fail_after: None,
            }),
            10,
        );
        assert!(service.synthesize(CancellationToken::new(), "  ").is_err());
        service.close().await;
        assert!(service.synthesize(CancellationToken::new(), "hello").is_err());
    }
}
