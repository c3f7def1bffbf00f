//! WebSocket connection over an upgraded axum socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use parley_protocol::{codec, ClientEnvelope, ProtocolError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, TransportError};

/// What a single WebSocket message means to the session.
#[derive(Debug)]
enum Inbound {
    Envelope(ClientEnvelope),
    Control,
    Closed,
}

/// Classify one WebSocket message.
fn classify(message: Message, max_message_size: usize) -> Result<Inbound, TransportError> {
    let data = match message {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(data) => data,
        // Pings are answered by the socket itself.
        Message::Ping(_) | Message::Pong(_) => return Ok(Inbound::Control),
        Message::Close(_) => return Ok(Inbound::Closed),
    };

    if data.len() > max_message_size {
        warn!(
            "Message too large: {} bytes (max: {})",
            data.len(),
            max_message_size
        );
        return Err(ProtocolError::FrameTooLarge(data.len()).into());
    }

    Ok(Inbound::Envelope(codec::decode_envelope(&data)?))
}

/// A WebSocket client connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: Mutex<WebSocket>,
    remote_addr: Option<String>,
    is_open: AtomicBool,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, id: ConnectionId, max_message_size: usize) -> Self {
        Self {
            id,
            socket: Mutex::new(socket),
            remote_addr: None,
            is_open: AtomicBool::new(true),
            max_message_size,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEnvelope>, TransportError> {
        let socket = self.socket.get_mut();

        loop {
            match socket.next().await {
                Some(Ok(message)) => match classify(message, self.max_message_size)? {
                    Inbound::Envelope(envelope) => return Ok(Some(envelope)),
                    Inbound::Control => {}
                    Inbound::Closed => {
                        debug!(connection = %self.id, "Received close frame");
                        self.is_open.store(false, Ordering::SeqCst);
                        return Ok(None);
                    }
                },
                Some(Err(e)) => {
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }

    async fn send_raw(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        self.socket
            .get_mut()
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.socket
            .get_mut()
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_is_an_envelope() {
        let message = Message::Text(r#"{"event":"group.list","data":{}}"#.to_string());
        match classify(message, 1024).unwrap() {
            Inbound::Envelope(envelope) => assert_eq!(envelope.event, "group.list"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_binary_json_is_accepted() {
        let message = Message::Binary(br#"{"event":"user.list"}"#.to_vec());
        assert!(matches!(
            classify(message, 1024).unwrap(),
            Inbound::Envelope(_)
        ));
    }

    #[test]
    fn test_control_and_close() {
        assert!(matches!(
            classify(Message::Ping(vec![1]), 1024).unwrap(),
            Inbound::Control
        ));
        assert!(matches!(
            classify(Message::Close(None), 1024).unwrap(),
            Inbound::Closed
        ));
    }

    #[test]
    fn test_malformed_and_oversized_frames() {
        assert!(matches!(
            classify(Message::Text("not json".to_string()), 1024),
            Err(TransportError::Protocol(ProtocolError::Json(_)))
        ));
        assert!(matches!(
            classify(Message::Text("x".repeat(64)), 16),
            Err(TransportError::Protocol(ProtocolError::FrameTooLarge(64)))
        ));
    }
}
