//! # parley-transport
//!
//! Connection abstraction for the Parley chat server.
//!
//! - **WebSocket** - an upgraded axum socket carrying JSON text frames
//! - **Memory** - a loopback pair for tests and in-process clients
//!
//! Sessions are written against the `Connection` trait and never see the
//! concrete transport.
//!
//! ```rust
//! use parley_transport::{memory, Connection};
//!
//! # tokio_test_block_on(async {
//! let (mut server, client) = memory::pair("conn-1");
//! client.send_event("group.list", serde_json::json!({}));
//! let envelope = server.recv().await.unwrap().unwrap();
//! assert_eq!(envelope.event, "group.list");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryConnection};
pub use traits::{Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
