//! Error types and severity classification for dialogue sessions.
//!
//! Providers reduce their failures to message-bearing [`ProviderError`]s;
//! the session layer classifies those into a [`SessionError`] whose
//! [`ErrorKind`] decides the recovery strategy: fatal errors stop the
//! session, transient errors feed the reconnect path, rate-limited errors
//! get a fixed cooldown owned by the caller, and everything else is
//! recoverable noise.

use thiserror::Error;

/// Recovery class of a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecoverable. The session surfaces the error and stops.
    Fatal,
    /// Likely to clear on its own; worth reconnecting.
    Transient,
    /// The provider is shedding load; retry only after a fixed cooldown.
    RateLimited,
    /// Recoverable without any special handling.
    Recoverable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Fatal => "fatal",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Recoverable => "recoverable",
        }
    }
}

/// An error surfaced by a speech or language provider.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError {
            message: message.into(),
        }
    }
}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        ProviderError { message }
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        ProviderError {
            message: message.to_owned(),
        }
    }
}

/// A classified error attributed to one session service.
#[derive(Debug, Error)]
#[error("{service}: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub service: &'static str,
    pub message: String,
    #[source]
    pub source: Option<ProviderError>,
}

impl SessionError {
    pub fn fatal(service: &'static str, message: impl Into<String>) -> Self {
        SessionError {
            kind: ErrorKind::Fatal,
            service,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        SessionError {
            kind: ErrorKind::Transient,
            service,
            message: message.into(),
            source: None,
        }
    }

    pub fn recoverable(service: &'static str, message: impl Into<String>) -> Self {
        SessionError {
            kind: ErrorKind::Recoverable,
            service,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: ProviderError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ErrorKind::RateLimited
    }
}

/// Keywords that mark an error as unrecoverable. Exhausted quotas and
/// credential problems never clear on retry.
const FATAL_KEYWORDS: &[&str] = &[
    "quota",
    "insufficient balance",
    "unauthorized",
    "authentication",
    "invalid api key",
    "forbidden",
    "account suspended",
];

/// Keywords that mark provider load shedding.
const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "concurrency limit",
    "concurrent connections",
];

/// Keywords that mark a transport or availability blip.
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "broken pipe",
    "network",
    "temporarily unavailable",
    "try again",
    "service not connected",
];

fn kind_of(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    if FATAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ErrorKind::Fatal
    } else if RATE_LIMIT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ErrorKind::RateLimited
    } else if TRANSIENT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Recoverable
    }
}

/// Classifies a provider error, attributing it to `service`.
pub fn classify(service: &'static str, err: &ProviderError) -> SessionError {
    SessionError {
        kind: kind_of(&err.message),
        service,
        message: err.message.clone(),
        source: Some(err.clone()),
    }
}

/// Whether a provider error indicates load shedding, without building the
/// full classified error.
pub fn is_rate_limit_error(err: &ProviderError) -> bool {
    kind_of(&err.message) == ErrorKind::RateLimited
}

/// Logs a classified error at a level matching its severity.
pub fn log_classified(err: &SessionError) {
    match err.kind {
        ErrorKind::Fatal => {
            tracing::error!(service = err.service, kind = err.kind.as_str(), "{}", err.message);
        }
        ErrorKind::Transient | ErrorKind::RateLimited => {
            tracing::warn!(service = err.service, kind = err.kind.as_str(), "{}", err.message);
        }
        ErrorKind::Recoverable => {
            tracing::debug!(service = err.service, kind = err.kind.as_str(), "{}", err.message);
        }
    }
}
