//! Exponential-backoff reconnect driver.
//!
//! Generic over a [`ReconnectHandler`], decoupled from any transport. The
//! recognizer service notifies the manager on transient disconnects; at
//! most one backoff task runs at a time, retrying the handler with delays
//! doubling from a floor to a ceiling until it succeeds or the attempt cap
//! is reached.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::ProviderError;

/// Hooks implemented by the service that owns the connection.
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    /// Attempts to restore the connection. Returning `Ok` ends the backoff
    /// loop and resets the schedule.
    async fn attempt_reconnect(&self) -> Result<(), ProviderError>;

    /// Observability hook fired on every disconnect notification.
    fn on_disconnect(&self, err: &ProviderError);
}

/// Delay schedule: floor, geometric growth, ceiling, attempt cap.
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    pub floor: Duration,
    pub ceiling: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl BackoffStrategy {
    pub fn from_config(config: &EngineConfig) -> Self {
        BackoffStrategy {
            floor: Duration::from_millis(config.reconnect_floor_ms),
            ceiling: Duration::from_millis(config.reconnect_ceiling_ms),
            multiplier: config.reconnect_multiplier,
            max_attempts: config.reconnect_max_attempts,
        }
    }

    /// Delay before the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let grown = self.floor.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = grown.min(self.ceiling.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Tracks disconnects and drives reconnect attempts for one connection.
///
/// Rate-limited failures never reach this path; their fixed cooldown is
/// owned by the recognizer loop.
pub struct ReconnectManager {
    strategy: BackoffStrategy,
    attempts: AtomicU32,
    reconnecting: AtomicBool,
    handler: Arc<dyn ReconnectHandler>,
    cancel: CancellationToken,
}

impl ReconnectManager {
    pub fn new(
        strategy: BackoffStrategy,
        handler: Arc<dyn ReconnectHandler>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(ReconnectManager {
            strategy,
            attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            handler,
            cancel,
        })
    }

    /// Records a disconnect and starts the backoff task unless one is
    /// already running. The observability hook fires on every call.
    pub fn notify_disconnect(self: &Arc<Self>, err: &ProviderError) {
        self.handler.on_disconnect(err);
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_backoff().await;
        });
    }

    async fn run_backoff(&self) {
        loop {
            let attempt = self.attempts.load(Ordering::SeqCst);
            if attempt >= self.strategy.max_attempts {
                tracing::warn!(attempts = attempt, "reconnect attempts exhausted, giving up");
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            let delay = self.strategy.delay_for(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            match self.handler.attempt_reconnect().await {
                Ok(()) => {
                    self.reset();
                    self.reconnecting.store(false, Ordering::SeqCst);
                    tracing::info!(attempt, "reconnected");
                    return;
                }
                Err(err) => {
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnect attempt failed: {err}");
                }
            }
        }
    }

    /// Returns the schedule to its floor after a successful connection.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Delay the next attempt would wait.
    pub fn next_delay(&self) -> Duration {
        self.strategy.delay_for(self.attempts.load(Ordering::SeqCst))
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }
}
