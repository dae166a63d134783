//! Non-blocking outbound frame writer.
//!
//! All session output funnels through two bounded queues, one for JSON
//! envelopes and one for synthesized audio, each drained by a dedicated
//! task. The drain tasks share the connection sink behind a lock, so a
//! frame is never interleaved mid-write. Enqueueing never blocks: when a
//! slow consumer fills a queue, the frame is dropped with a warning. A
//! write failure cancels the writer, and every later send reports it.

use std::sync::Arc;

use palaver_types::{AudioFormat, ServerFrame};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::transport::FrameSink;

pub struct MessageWriter {
    text_tx: mpsc::Sender<String>,
    binary_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    drains: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MessageWriter {
    /// Wraps `sink` and starts the drain tasks. The writer stops when
    /// `parent` is cancelled, the sink fails, or [`close`] is called.
    ///
    /// [`close`]: MessageWriter::close
    pub fn new(sink: Box<dyn FrameSink>, parent: &CancellationToken, queue_bound: usize) -> Self {
        let (text_tx, text_rx) = mpsc::channel(queue_bound);
        let (binary_tx, binary_rx) = mpsc::channel(queue_bound);
        let cancel = parent.child_token();
        let sink = Arc::new(Mutex::new(sink));

        let text_drain = tokio::spawn(drain_text(Arc::clone(&sink), text_rx, cancel.clone()));
        let binary_drain = tokio::spawn(drain_binary(sink, binary_rx, cancel.clone()));

        MessageWriter {
            text_tx,
            binary_tx,
            cancel,
            drains: std::sync::Mutex::new(vec![text_drain, binary_drain]),
        }
    }

    pub fn send_connected(&self) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::Connected)
    }

    pub fn send_asr_result(&self, text: &str) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::AsrResult {
            text: text.to_owned(),
        })
    }

    pub fn send_llm_response(&self, text: &str) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::LlmResponse {
            text: text.to_owned(),
        })
    }

    pub fn send_tts_start(&self, format: AudioFormat) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::tts_start(format))
    }

    pub fn send_tts_end(&self) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::TtsEnd)
    }

    pub fn send_error(&self, message: &str, fatal: bool) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::error(message, fatal))
    }

    pub fn send_session_cleared(&self) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::SessionCleared)
    }

    pub fn send_pong(&self) -> Result<(), SessionError> {
        self.send_frame(&ServerFrame::Pong)
    }

    /// Queues one JSON envelope.
    pub fn send_frame(&self, frame: &ServerFrame) -> Result<(), SessionError> {
        let payload = serde_json::to_string(frame)
            .map_err(|err| SessionError::recoverable("writer", format!("encode frame: {err}")))?;
        if self.cancel.is_cancelled() {
            return Err(SessionError::recoverable("writer", "writer closed"));
        }
        match self.text_tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("text queue full, dropping frame for slow consumer");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SessionError::recoverable("writer", "writer closed"))
            }
        }
    }

    /// Queues one synthesized audio chunk.
    pub fn send_audio_chunk(&self, chunk: Vec<u8>) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::recoverable("writer", "writer closed"));
        }
        match self.binary_tx.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("audio queue full, dropping chunk for slow consumer");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SessionError::recoverable("writer", "writer closed"))
            }
        }
    }

    /// Whether the writer has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the drain tasks and waits for them to finish. Queued frames
    /// that have not reached the sink are dropped.
    pub async fn close(&self) {
        self.cancel.cancel();
        let drains: Vec<JoinHandle<()>> = {
            let mut guard = self.drains.lock().expect("writer drain lock poisoned");
            guard.drain(..).collect()
        };
        for drain in drains {
            let _ = drain.await;
        }
    }
}

async fn drain_text(
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = rx.recv() => {
                let Some(payload) = frame else { return };
                let result = {
                    let mut sink = sink.lock().await;
                    sink.send_text(payload).await
                };
                if let Err(err) = result {
                    if err.is_closed() {
                        tracing::debug!("connection closed while writing text frame");
                    } else {
                        tracing::error!("text frame write failed: {err}");
                    }
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn drain_binary(
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = rx.recv() => {
                let Some(payload) = chunk else { return };
                let result = {
                    let mut sink = sink.lock().await;
                    sink.send_binary(payload).await
                };
                if let Err(err) = result {
                    if err.is_closed() {
                        tracing::debug!("connection closed while writing audio chunk");
                    } else {
                        tracing::error!("audio chunk write failed: {err}");
                    }
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}
