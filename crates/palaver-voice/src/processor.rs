//! Turn orchestration: recognized or injected text in, reply frames out.
//!
//! A recognition increment is echoed to the client, screened against the
//! input filter, then answered by a spawned pipeline: query the language
//! model over the trimmed history, send the reply text, synthesize and
//! stream the reply audio. New speech arriving mid-reply supersedes it by
//! cancelling the in-flight synthesis. Direct text injection runs the same
//! pipeline but skips the echo, the filter, and the supersede check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use palaver_types::{ChatTurn, ClientFrame};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{self, SessionError};
use crate::filter::FilterManager;
use crate::llm::LlmService;
use crate::state::{ClientState, TtsTask};
use crate::tts::TtsService;
use crate::writer::MessageWriter;

pub struct MessageProcessor {
    state: Arc<ClientState>,
    writer: Arc<MessageWriter>,
    filter: Arc<FilterManager>,
    llm: Arc<LlmService>,
    tts: Arc<TtsService>,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
    history: Mutex<Vec<ChatTurn>>,
    draining: AtomicBool,
}

/// Clears the processing flag however the pipeline exits.
struct ProcessingGuard<'a>(&'a ClientState);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_processing(false);
    }
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<ClientState>,
        writer: Arc<MessageWriter>,
        filter: Arc<FilterManager>,
        llm: Arc<LlmService>,
        tts: Arc<TtsService>,
        config: Arc<EngineConfig>,
        cancel: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(MessageProcessor {
            state,
            writer,
            filter,
            llm,
            tts,
            config,
            cancel: cancel.clone(),
            history: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
        })
    }

    /// Handles one deduplicated recognition increment.
    pub fn process_asr_result(self: &Arc<Self>, text: &str) {
        let gate = self.state.can_process();
        if gate.fatal {
            tracing::debug!("dropping recognition result after fatal error");
            return;
        }
        if gate.processing {
            // The caller spoke over the reply in flight; the new utterance
            // wins.
            tracing::debug!("new speech supersedes the in-flight reply");
            self.state.interrupt_tts();
        }

        if let Err(err) = self.writer.send_asr_result(text) {
            error::log_classified(&err);
            return;
        }
        if self.filter.is_filtered(text) {
            self.filter.record_filtered(text);
            return;
        }

        let this = Arc::clone(self);
        let text = text.to_owned();
        tokio::spawn(async move {
            this.respond(text).await;
        });
    }

    /// Handles one raw client text frame.
    pub fn handle_text_message(self: &Arc<Self>, raw: &str) {
        match ClientFrame::parse(raw) {
            Ok(ClientFrame::NewSession) => {
                self.state.clear();
                self.history.lock().expect("history lock poisoned").clear();
                tracing::info!("session state cleared");
                if let Err(err) = self.writer.send_session_cleared() {
                    error::log_classified(&err);
                }
            }
            Ok(ClientFrame::Text { text }) => {
                if text.trim().is_empty() {
                    tracing::debug!("ignoring empty injected text");
                    return;
                }
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.respond(text).await;
                });
            }
            Ok(ClientFrame::Ping) => {
                if let Err(err) = self.writer.send_pong() {
                    error::log_classified(&err);
                }
            }
            Err(err) => {
                tracing::warn!("unparseable client frame: {err}");
                if let Err(send_err) = self.writer.send_error("unrecognized message", false) {
                    error::log_classified(&send_err);
                }
            }
        }
    }

    /// Classifies a service failure into the session: fatal errors poison
    /// the state, and the client always gets an error frame.
    pub fn handle_service_error(&self, err: SessionError) {
        error::log_classified(&err);
        if err.is_fatal() {
            self.state.set_fatal_error(true);
        }
        if let Err(send_err) = self.writer.send_error(&err.to_string(), err.is_fatal()) {
            tracing::debug!("error frame not delivered: {send_err}");
        }
    }

    /// The reply pipeline for one utterance.
    async fn respond(&self, text: String) {
        self.state.set_processing(true);
        let _guard = ProcessingGuard(&self.state);

        let turns = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.push(ChatTurn::user(&text));
            if history.len() > self.config.history_cap {
                let excess = history.len() - self.config.history_keep;
                history.drain(..excess);
            }
            history.clone()
        };

        let reply = match self.llm.query(&turns).await {
            Ok(reply) => reply,
            Err(err) => {
                self.handle_service_error(err);
                return;
            }
        };
        if reply.trim().is_empty() {
            tracing::debug!("model produced an empty reply, nothing to speak");
            return;
        }

        self.history
            .lock()
            .expect("history lock poisoned")
            .push(ChatTurn::assistant(&reply));

        if let Err(err) = self.writer.send_llm_response(&reply) {
            error::log_classified(&err);
        }
        if let Some(elapsed) = self.state.asr_complete_elapsed() {
            tracing::debug!(latency_ms = elapsed.as_millis() as u64, "reply ready");
        }

        self.speak(reply).await;
    }

    /// Queues the reply for synthesis and drains pending jobs in order.
    /// Only one drainer runs at a time; a job enqueued while a drain is
    /// winding down is picked up by the recheck.
    async fn speak(&self, text: String) {
        let task = TtsTask {
            text,
            cancel: self.cancel.child_token(),
            writer: Arc::clone(&self.writer),
        };
        if !self.state.enqueue_tts(task) {
            tracing::warn!("synthesis queue full, dropping reply audio");
            return;
        }

        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            while let Some(task) = self.state.dequeue_tts() {
                self.play(task).await;
            }
            self.draining.store(false, Ordering::SeqCst);
            if self.state.tts_queue_len() == 0 || self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Streams one synthesis job to its writer. A started utterance ends
    /// with exactly one `tts_end`, whether it completes, fails, or is
    /// barged in on.
    async fn play(&self, task: TtsTask) {
        if task.cancel.is_cancelled() {
            return;
        }
        self.state.set_tts_cancel(task.cancel.clone());

        let mut chunks = match self.tts.synthesize(task.cancel.clone(), &task.text) {
            Ok(chunks) => chunks,
            Err(err) => {
                error::log_classified(&err);
                return;
            }
        };

        self.state.set_tts_playing(true);
        if task.writer.send_tts_start(self.tts.format()).is_err() {
            task.cancel.cancel();
            self.state.set_tts_playing(false);
            return;
        }

        while let Some(item) = chunks.recv().await {
            match item {
                Some(chunk) => {
                    if task.writer.send_audio_chunk(chunk).is_err() {
                        task.cancel.cancel();
                        break;
                    }
                }
                None => {
                    // The provider failed mid-utterance; chunks already
                    // delivered stand, and the client hears a clean stop.
                    let _ = task.writer.send_error("speech synthesis failed", false);
                    break;
                }
            }
        }

        let _ = task.writer.send_tts_end();
        self.state.set_tts_playing(false);
    }
}
