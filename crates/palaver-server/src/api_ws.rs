//! WebSocket session endpoint.
//!
//! Upgrades `/session` connections and hands each socket to a
//! [`Session`], adapting the axum socket halves to the engine's frame
//! transport traits. The engine never sees an axum type.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use palaver_voice::{FrameSink, FrameSource, InboundFrame, Session, TransportError};

use crate::AppState;

pub async fn session_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, "websocket session upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (sender, receiver) = socket.split();

    let session = Session::new(
        state.providers.clone(),
        Arc::clone(&state.pool),
        Arc::clone(&state.filter),
        Arc::clone(&state.engine),
        state.session.clone(),
        Box::new(WsFrameSink(sender)),
    );
    let session_id = session.id();
    tracing::info!(session = %session_id, remote_addr = %addr, "websocket session open");

    session.run(WsFrameSource(receiver)).await;

    tracing::info!(session = %session_id, remote_addr = %addr, "websocket session closed");
}

/// axum erases the underlying tungstenite error type, so closed-connection
/// send failures are recognized by message. Anything else is a real fault.
fn map_send_error(e: axum::Error) -> TransportError {
    let msg = e.to_string();
    if msg.contains("closed") {
        TransportError::Closed
    } else {
        TransportError::Io(msg)
    }
}

struct WsFrameSink(SplitSink<WebSocket, AxumMessage>);

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError> {
        self.0
            .send(AxumMessage::Text(payload.into()))
            .await
            .map_err(map_send_error)
    }

    async fn send_binary(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.0
            .send(AxumMessage::Binary(payload.into()))
            .await
            .map_err(map_send_error)
    }
}

struct WsFrameSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let msg = match self.0.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };
            match msg {
                AxumMessage::Text(text) => return Some(Ok(InboundFrame::Text(text.to_string()))),
                AxumMessage::Binary(bytes) => {
                    return Some(Ok(InboundFrame::Binary(bytes.to_vec())))
                }
                AxumMessage::Close(_) => return None,
                // axum answers pings on its own; both directions are pure
                // keepalive at this layer.
                AxumMessage::Ping(_) | AxumMessage::Pong(_) => continue,
            }
        }
    }
}
