//! One realtime dialogue session over an abstract frame transport.
//!
//! The session owns the whole per-connection assembly: writer, state,
//! recognition, synthesis, language model, and the barge-in detector. Its
//! read loop consumes caller frames until the transport closes or the
//! session is cancelled, then tears everything down best-effort. A
//! spawned consumer folds recognition events into the dedup cursors and
//! hands increments to the processor, recording usage for each final
//! result on the side.

use std::sync::Arc;
use std::time::Duration;

use palaver_types::UsageRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::asr::{AsrEvent, AsrService};
use crate::config::{EngineConfig, SessionConfig};
use crate::error;
use crate::filter::FilterManager;
use crate::llm::LlmService;
use crate::pool::PermitPool;
use crate::processor::MessageProcessor;
use crate::providers::{ProviderSet, UsageSink};
use crate::state::ClientState;
use crate::transport::{FrameSink, FrameSource, InboundFrame};
use crate::tts::TtsService;
use crate::vad::VadDetector;
use crate::writer::MessageWriter;

pub struct Session {
    id: Uuid,
    config: SessionConfig,
    engine: Arc<EngineConfig>,
    cancel: CancellationToken,
    state: Arc<ClientState>,
    writer: Arc<MessageWriter>,
    processor: Arc<MessageProcessor>,
    asr: AsrService,
    asr_events: Option<mpsc::Receiver<AsrEvent>>,
    tts: Arc<TtsService>,
    llm: Arc<LlmService>,
    usage: Arc<dyn UsageSink>,
    vad: VadDetector,
}

impl Session {
    /// Assembles a session around `sink`. Nothing runs until [`run`].
    ///
    /// [`run`]: Session::run
    pub fn new(
        providers: ProviderSet,
        pool: Arc<PermitPool>,
        filter: Arc<FilterManager>,
        engine: Arc<EngineConfig>,
        config: SessionConfig,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let writer = Arc::new(MessageWriter::new(sink, &cancel, engine.writer_queue));
        let state = Arc::new(ClientState::new(engine.tts_queue));
        let (asr, asr_events) = AsrService::new(
            providers.transcriber,
            pool,
            Arc::clone(&engine),
            config.language.clone(),
            &cancel,
        );
        let tts = Arc::new(TtsService::new(
            providers.synthesizer,
            engine.tts_chunk_buffer,
        ));
        let llm = Arc::new(LlmService::new(providers.llm, &config));
        let processor = MessageProcessor::new(
            Arc::clone(&state),
            Arc::clone(&writer),
            filter,
            Arc::clone(&llm),
            Arc::clone(&tts),
            Arc::clone(&engine),
            &cancel,
        );
        let vad = VadDetector::new(&config.vad);

        Session {
            id,
            config,
            engine,
            cancel,
            state,
            writer,
            processor,
            asr,
            asr_events: Some(asr_events),
            tts,
            llm,
            usage: providers.usage,
            vad,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drives the session until the transport closes or a cancellation
    /// lands, then tears down every service.
    pub async fn run<S: FrameSource>(mut self, mut source: S) {
        tracing::info!(session = %self.id, language = %self.config.language, "session starting");

        if let Err(err) = self.asr.connect().await {
            self.processor.handle_service_error(err);
            self.teardown().await;
            return;
        }
        // Let the recognizer settle before inviting audio.
        tokio::time::sleep(Duration::from_millis(self.engine.connect_settle_ms)).await;
        if let Err(err) = self.writer.send_connected() {
            error::log_classified(&err);
        }

        let events = self.asr_events.take().expect("run called once");
        self.spawn_event_consumer(events);

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = source.next_frame() => frame,
            };
            match frame {
                None => {
                    tracing::debug!(session = %self.id, "client closed the stream");
                    break;
                }
                Some(Err(err)) => {
                    if err.is_closed() {
                        tracing::debug!(session = %self.id, "transport closed: {err}");
                    } else {
                        tracing::warn!(session = %self.id, "transport error: {err}");
                    }
                    break;
                }
                Some(Ok(InboundFrame::Text(raw))) => {
                    self.processor.handle_text_message(&raw);
                }
                Some(Ok(InboundFrame::Binary(frame))) => {
                    if self.vad.check_barge_in(&frame, self.state.is_tts_playing()) {
                        tracing::info!(session = %self.id, "barge-in detected, interrupting playback");
                        self.state.interrupt_tts();
                    }
                    // The triggering frame still reaches the recognizer, so
                    // the interrupting speech is not clipped.
                    if let Err(err) = self.asr.send_audio(&frame).await {
                        tracing::debug!("audio frame not forwarded: {err}");
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Folds recognition events into the dedup cursors and forwards
    /// increments. Usage for final results is recorded on a detached task
    /// so a slow sink never stalls recognition.
    fn spawn_event_consumer(&self, mut events: mpsc::Receiver<AsrEvent>) {
        let processor = Arc::clone(&self.processor);
        let state = Arc::clone(&self.state);
        let usage = Arc::clone(&self.usage);
        let cancel = self.cancel.clone();
        let session_id = self.id;
        let credential_id = self.config.credential_id.clone();
        let assistant_id = self.config.assistant_id.clone();
        let group_id = self.config.group_id.clone();
        let bytes_per_second = self.engine.audio_bytes_per_second;
        let usage_timeout = Duration::from_millis(self.engine.usage_timeout_ms);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };
                let Some(event) = event else { return };
                match event {
                    AsrEvent::Transcript {
                        text,
                        is_final,
                        audio_seconds,
                    } => {
                        if is_final && audio_seconds > 0.0 {
                            let record = UsageRecord::estimate(
                                session_id,
                                credential_id.as_str(),
                                assistant_id.as_str(),
                                group_id.as_str(),
                                audio_seconds,
                                bytes_per_second,
                            );
                            let usage = Arc::clone(&usage);
                            tokio::spawn(async move {
                                match tokio::time::timeout(usage_timeout, usage.record(record))
                                    .await
                                {
                                    Ok(Ok(())) => {}
                                    Ok(Err(err)) => {
                                        tracing::warn!("usage record failed: {err}");
                                    }
                                    Err(_) => tracing::warn!("usage record timed out"),
                                }
                            });
                        }
                        if let Some(increment) = state.update_asr_text(&text, is_final) {
                            processor.process_asr_result(&increment);
                        }
                    }
                    AsrEvent::Failed(err) => processor.handle_service_error(err),
                }
            }
        });
    }

    async fn teardown(&self) {
        tracing::info!(session = %self.id, "session closing");
        self.cancel.cancel();
        self.asr.disconnect().await;
        self.tts.close().await;
        self.llm.close().await;
        self.writer.close().await;
        self.state.clear();
    }
}
