//! In-memory loopback connection.
//!
//! `pair` returns the server half, which implements `Connection`, and a
//! client half that speaks JSON values. Dropping or closing either half is
//! observed by the other as a clean close.

use async_trait::async_trait;
use parley_protocol::{codec, ClientEnvelope};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, TransportError};

/// Create a connected server/client pair.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryClient) {
    let (to_server, from_client) = mpsc::unbounded_channel();
    let (to_client, from_server) = mpsc::unbounded_channel();

    let connection = MemoryConnection {
        id: id.into(),
        inbound: from_client,
        outbound: Some(to_client),
    };
    let client = MemoryClient {
        outbound: Some(to_server),
        inbound: from_server,
    };
    (connection, client)
}

/// Server half of a loopback pair.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEnvelope>, TransportError> {
        if self.outbound.is_none() {
            return Ok(None);
        }

        match self.inbound.recv().await {
            Some(text) => Ok(Some(codec::decode_envelope(text.as_bytes())?)),
            None => {
                self.outbound = None;
                Ok(None)
            }
        }
    }

    async fn send_raw(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Client half of a loopback pair.
pub struct MemoryClient {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryClient {
    /// Send raw text, which may or may not be valid JSON.
    ///
    /// Returns `false` if the server half is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Send a JSON value.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Send a command envelope.
    pub fn send_event(&self, event: &str, data: Value) -> bool {
        self.send_json(&serde_json::json!({ "event": event, "data": data }))
    }

    /// Wait for the next frame. `None` once the server side has closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Wait for the next frame and parse it as JSON.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Take a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        let text = self.inbound.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Close the client side; the server sees a clean close.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
