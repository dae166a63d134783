//! Transport seam between a session and its network connection.
//!
//! Sessions never touch a WebSocket type directly. The server adapts its
//! socket to [`FrameSink`] and [`FrameSource`], and tests plug in channel
//! backed implementations, so the whole engine can be driven without a
//! network.

use async_trait::async_trait;
use thiserror::Error;

/// A frame received from the dialogue client.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A JSON control envelope.
    Text(String),
    /// Raw caller audio.
    Binary(Vec<u8>),
}

/// A transport failure while reading or writing frames.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer closed the connection. Expected at the end of every
    /// session, never treated as a failure.
    #[error("connection closed")]
    Closed,
    /// Anything else the transport could not deliver.
    #[error("transport failure: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Outbound half of a session connection.
///
/// Held behind a lock shared by the writer's drain tasks; one frame is in
/// flight at a time.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError>;
    async fn send_binary(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Inbound half of a session connection.
#[async_trait]
pub trait FrameSource: Send {
    /// The next client frame, or `None` once the peer has closed cleanly.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}
