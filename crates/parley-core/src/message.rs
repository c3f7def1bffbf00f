//! Backplane message type.
//!
//! A `Message` is what a channel hands to each subscriber's mailbox. The
//! payload is an encoded `ChannelEvent` and is shared between all
//! subscribers of one publish.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sequence number of a published message.
pub type Sequence = u64;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> Sequence {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A message published to a channel.
#[derive(Debug, Clone)]
pub struct Message {
    /// Process-wide publish sequence number.
    pub id: Sequence,
    /// Channel the message was published to.
    pub channel: String,
    /// Encoded payload (cheap to clone).
    pub payload: Bytes,
    /// Timestamp when the message was created (ms since epoch).
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: next_sequence(),
            channel: channel.into(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }
}
