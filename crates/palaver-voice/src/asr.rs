//! Speech-recognition service: pooled connections, reconnect, liveness.
//!
//! One background loop owns the recognizer connection. Each cycle takes a
//! pool permit, connects, then watches liveness until the stream goes
//! quiet. Failures pick their path by classification: saturated pool and
//! rate limits wait fixed cooldowns, transient errors notify the reconnect
//! manager between waits, fatal errors surface to the session and stop the
//! loop for good. The permit is held exactly while connected or
//! connecting, and every exit path releases it exactly once because it
//! releases on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{self, ErrorKind, ProviderError, SessionError};
use crate::pool::PermitPool;
use crate::providers::{Transcriber, TranscriberEvent};
use crate::reconnect::{BackoffStrategy, ReconnectHandler, ReconnectManager};

/// Buffer for recognition events between the provider and the session.
const ASR_EVENT_BUFFER: usize = 32;

/// An event delivered to the session's recognition consumer.
#[derive(Debug)]
pub enum AsrEvent {
    /// A recognition result, raw from the provider; deduplication happens
    /// in the session.
    Transcript {
        text: String,
        is_final: bool,
        audio_seconds: f64,
    },
    /// The service hit a fatal error and has stopped.
    Failed(SessionError),
}

pub struct AsrService {
    inner: Arc<AsrInner>,
}

struct AsrInner {
    transcriber: Arc<dyn Transcriber>,
    pool: Arc<PermitPool>,
    config: Arc<EngineConfig>,
    language: String,
    connected: AtomicBool,
    loop_running: AtomicBool,
    cancel: CancellationToken,
    reconnect: OnceLock<Arc<ReconnectManager>>,
    session_tx: mpsc::Sender<AsrEvent>,
}

impl AsrService {
    /// Builds the service and the event stream the session consumes.
    /// Nothing connects until [`connect`] is called.
    ///
    /// [`connect`]: AsrService::connect
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        pool: Arc<PermitPool>,
        config: Arc<EngineConfig>,
        language: String,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<AsrEvent>) {
        let cancel = parent.child_token();
        let (session_tx, session_rx) = mpsc::channel(ASR_EVENT_BUFFER);
        let inner = Arc::new(AsrInner {
            transcriber,
            pool,
            config: Arc::clone(&config),
            language,
            connected: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
            cancel: cancel.clone(),
            reconnect: OnceLock::new(),
            session_tx,
        });
        let manager = ReconnectManager::new(
            BackoffStrategy::from_config(&config),
            Arc::new(AsrReconnectHandler {
                inner: Arc::downgrade(&inner),
            }),
            cancel,
        );
        let _ = inner.reconnect.set(manager);
        (AsrService { inner }, session_rx)
    }

    /// Registers the event channel with the provider and starts the
    /// connection loop and the event relay.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (events_tx, events_rx) = mpsc::channel(ASR_EVENT_BUFFER);
        self.inner
            .transcriber
            .init(events_tx)
            .await
            .map_err(|err| error::classify("asr", &err))?;
        tokio::spawn(Arc::clone(&self.inner).event_loop(events_rx));
        spawn_receive_loop(&self.inner);
        Ok(())
    }

    /// Feeds one caller audio frame to the recognizer.
    pub async fn send_audio(&self, frame: &[u8]) -> Result<(), SessionError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(SessionError::transient("asr", "service not connected"));
        }
        if let Err(err) = self.inner.transcriber.send_audio(frame).await {
            if !self.inner.transcriber.is_active() {
                self.inner.connected.store(false, Ordering::SeqCst);
                if let Some(manager) = self.inner.reconnect.get() {
                    manager.notify_disconnect(&err);
                }
            }
            return Err(
                SessionError::transient("asr", format!("send failed: {err}")).with_source(err)
            );
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Stops the loops and the provider stream. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();
        self.inner.transcriber.stop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

fn spawn_receive_loop(inner: &Arc<AsrInner>) {
    if inner.loop_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.receive_loop().await;
        inner.loop_running.store(false, Ordering::SeqCst);
    });
}

impl AsrInner {
    async fn receive_loop(self: &Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let permit = match self.pool.try_acquire() {
                Some(permit) => permit,
                None => {
                    tracing::warn!(
                        capacity = self.pool.capacity(),
                        "recognizer pool saturated, waiting for a slot"
                    );
                    if !self.wait(self.config.pool_retry_ms).await {
                        return;
                    }
                    continue;
                }
            };

            match self.transcriber.connect(&self.language).await {
                Err(err) => {
                    drop(permit);
                    let classified = error::classify("asr", &err);
                    error::log_classified(&classified);
                    match classified.kind {
                        ErrorKind::RateLimited => {
                            // The provider is shedding load: back off for
                            // the full cooldown without touching the
                            // reconnect schedule.
                            if !self.wait(self.config.rate_limit_cooldown_ms).await {
                                return;
                            }
                        }
                        ErrorKind::Fatal => {
                            self.surface_fatal(classified).await;
                            return;
                        }
                        _ => {
                            if !self.wait(self.config.transient_pre_notify_ms).await {
                                return;
                            }
                            if let Some(manager) = self.reconnect.get() {
                                manager.notify_disconnect(&err);
                            }
                            if !self.wait(self.config.transient_post_notify_ms).await {
                                return;
                            }
                        }
                    }
                }
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    if let Some(manager) = self.reconnect.get() {
                        manager.reset();
                    }
                    tracing::info!("recognizer connected");

                    loop {
                        if !self.wait(self.config.liveness_tick_ms).await {
                            self.connected.store(false, Ordering::SeqCst);
                            return;
                        }
                        if !self.transcriber.is_active() {
                            break;
                        }
                    }

                    self.connected.store(false, Ordering::SeqCst);
                    drop(permit);
                    tracing::warn!("recognizer activity lost, reconnecting");
                    if !self.wait(self.config.activity_lost_wait_ms).await {
                        return;
                    }
                }
            }
        }
    }

    /// Relays provider events to the session, classifying failures on the
    /// way through.
    async fn event_loop(self: Arc<Self>, mut events: mpsc::Receiver<TranscriberEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = events.recv() => {
                    let Some(event) = event else { return };
                    match event {
                        TranscriberEvent::Result { text, is_final, audio_seconds } => {
                            let forwarded = self
                                .session_tx
                                .send(AsrEvent::Transcript { text, is_final, audio_seconds })
                                .await;
                            if forwarded.is_err() {
                                return;
                            }
                        }
                        TranscriberEvent::Error(err) => {
                            let classified = error::classify("asr", &err);
                            match classified.kind {
                                ErrorKind::Fatal => {
                                    error::log_classified(&classified);
                                    self.connected.store(false, Ordering::SeqCst);
                                    self.surface_fatal(classified).await;
                                    return;
                                }
                                ErrorKind::Transient => {
                                    error::log_classified(&classified);
                                    if let Some(manager) = self.reconnect.get() {
                                        manager.notify_disconnect(&err);
                                    }
                                }
                                _ => error::log_classified(&classified),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Delivers a fatal error to the session and stops the service.
    /// Cancelling ends the connection loop, which releases any held
    /// permit.
    async fn surface_fatal(&self, classified: SessionError) {
        let _ = self.session_tx.send(AsrEvent::Failed(classified)).await;
        self.cancel.cancel();
    }

    /// Cancellation-aware sleep; false when the service was stopped.
    async fn wait(&self, ms: u64) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
        }
    }
}

struct AsrReconnectHandler {
    inner: Weak<AsrInner>,
}

#[async_trait]
impl ReconnectHandler for AsrReconnectHandler {
    async fn attempt_reconnect(&self) -> Result<(), ProviderError> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(ProviderError::new("recognizer service dropped"));
        };
        if inner.cancel.is_cancelled() {
            return Err(ProviderError::new("recognizer service stopped"));
        }
        if inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        // The connection loop owns recovery while it runs; revive it if it
        // is gone.
        if !inner.loop_running.load(Ordering::SeqCst) {
            spawn_receive_loop(&inner);
        }
        Ok(())
    }

    fn on_disconnect(&self, err: &ProviderError) {
        tracing::warn!("recognizer disconnected: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct FakeTranscriber {
        connect_script: Mutex<VecDeque<Result<(), ProviderError>>>,
        connects: AtomicU32,
        active: AtomicBool,
        events: Mutex<Option<mpsc::Sender<TranscriberEvent>>>,
        send_result: Mutex<Result<(), ProviderError>>,
    }

    impl FakeTranscriber {
        fn scripted(script: Vec<Result<(), ProviderError>>) -> Arc<Self> {
            Arc::new(FakeTranscriber {
                connect_script: Mutex::new(script.into()),
                connects: AtomicU32::new(0),
                active: AtomicBool::new(true),
                events: Mutex::new(None),
                send_result: Mutex::new(Ok(())),
            })
        }

        fn push_event(&self, event: TranscriberEvent) {
            let sender = self
                .events
                .lock()
                .unwrap()
                .clone()
                .expect("transcriber not initialized");
            sender.try_send(event).expect("event buffer full");
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn init(&self, events: mpsc::Sender<TranscriberEvent>) -> Result<(), ProviderError> {
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn connect(&self, _language: &str) -> Result<(), ProviderError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connect_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn send_audio(&self, _frame: &[u8]) -> Result<(), ProviderError> {
            self.send_result.lock().unwrap().clone()
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        async fn stop(&self) {
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn engine_config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig::default())
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_holds_one_permit() {
        let pool = Arc::new(PermitPool::new(2));
        let transcriber = FakeTranscriber::scripted(vec![Ok(())]);
        let (service, _events) = AsrService::new(
            transcriber,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_delays_connection_until_a_slot_frees() {
        let pool = Arc::new(PermitPool::new(1));
        let held = pool.try_acquire().expect("take the only slot");
        let transcriber = FakeTranscriber::scripted(vec![Ok(())]);
        let (service, _events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transcriber.connects.load(Ordering::SeqCst), 0);
        assert!(!service.is_connected());

        drop(held);
        wait_until(|| service.is_connected()).await;
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_connect_error_surfaces_and_releases_the_permit() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber =
            FakeTranscriber::scripted(vec![Err(ProviderError::new("invalid api key"))]);
        let (service, mut events) = AsrService::new(
            transcriber,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        match events.recv().await {
            Some(AsrEvent::Failed(err)) => {
                assert!(err.is_fatal());
                assert_eq!(err.service, "asr");
            }
            other => panic!("expected a fatal event, got {other:?}"),
        }
        wait_until(|| pool.available() == 1).await;
        assert!(!service.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connect_error_retries_until_it_succeeds() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![
            Err(ProviderError::new("connection refused")),
            Err(ProviderError::new("connection refused")),
            Ok(()),
        ]);
        let (service, _events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;
        assert!(transcriber.connects.load(Ordering::SeqCst) >= 3);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_connect_error_recovers_after_the_cooldown() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![
            Err(ProviderError::new("rate limit exceeded")),
            Ok(()),
        ]);
        let (service, mut events) = AsrService::new(
            transcriber,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;
        assert!(events.try_recv().is_err(), "rate limiting is not surfaced as failure");
    }

    #[tokio::test(start_paused = true)]
    async fn lost_activity_triggers_a_reconnect_without_leaking_permits() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![Ok(()), Ok(())]);
        let (service, _events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;

        transcriber.active.store(false, Ordering::SeqCst);
        wait_until(|| !service.is_connected()).await;
        transcriber.active.store(true, Ordering::SeqCst);
        wait_until(|| service.is_connected()).await;

        assert_eq!(transcriber.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transcripts_flow_through_to_the_session() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![Ok(())]);
        let (service, mut events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            pool,
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;

        transcriber.push_event(TranscriberEvent::Result {
            text: "hello there".into(),
            is_final: true,
            audio_seconds: 1.5,
        });
        match events.recv().await {
            Some(AsrEvent::Transcript {
                text,
                is_final,
                audio_seconds,
            }) => {
                assert_eq!(text, "hello there");
                assert!(is_final);
                assert_eq!(audio_seconds, 1.5);
            }
            other => panic!("expected a transcript, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn asynchronous_fatal_event_stops_the_service() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![Ok(())]);
        let (service, mut events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;

        transcriber.push_event(TranscriberEvent::Error(ProviderError::new(
            "quota exceeded",
        )));
        match events.recv().await {
            Some(AsrEvent::Failed(err)) => assert!(err.is_fatal()),
            other => panic!("expected a fatal event, got {other:?}"),
        }
        wait_until(|| pool.available() == 1).await;
        assert!(service.send_audio(&[0u8; 4]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_audio_requires_a_connection() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![]);
        let (service, _events) = AsrService::new(
            transcriber,
            pool,
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        let err = service.send_audio(&[0u8; 4]).await.expect_err("not connected");
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_releases_the_permit_and_stops_the_loop() {
        let pool = Arc::new(PermitPool::new(1));
        let transcriber = FakeTranscriber::scripted(vec![Ok(())]);
        let (service, _events) = AsrService::new(
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::clone(&pool),
            engine_config(),
            "en".into(),
            &CancellationToken::new(),
        );

        service.connect().await.expect("connect");
        wait_until(|| service.is_connected()).await;

        service.disconnect().await;
        wait_until(|| pool.available() == 1).await;
        assert!(!service.is_connected());
        assert!(service.send_audio(&[0u8; 4]).await.is_err());
    }
}
