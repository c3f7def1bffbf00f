//! Channel abstraction for the backplane.
//!
//! A channel is a named fan-out destination: `group_{id}` for a group's
//! live sessions, `user_{id}` for one user's personal notifications.

use crate::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Receiving end of a connection's delivery queue.
pub type Mailbox = mpsc::Receiver<Arc<Message>>;

/// Sending end of a connection's delivery queue.
pub(crate) type MailboxSender = mpsc::Sender<Arc<Message>>;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Mailboxes that accepted the message.
    pub delivered: usize,
    /// Mailboxes that were full or already closed.
    pub dropped: usize,
}

/// A channel for pub/sub messaging.
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: ChannelId,
    /// Subscribed connections and their mailboxes.
    subscribers: HashMap<String, MailboxSender>,
}

impl Channel {
    /// Create a new, empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashMap::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &str) -> bool {
        self.subscribers.contains_key(connection_id)
    }

    /// Subscribe a connection's mailbox to this channel.
    ///
    /// Returns `true` if the connection was not subscribed before.
    pub(crate) fn subscribe(&mut self, connection_id: impl Into<String>, mailbox: MailboxSender) -> bool {
        let conn_id = connection_id.into();
        debug!(channel = %self.name, connection = %conn_id, "Connection subscribed");
        self.subscribers.insert(conn_id, mailbox).is_none()
    }

    /// Unsubscribe a connection from this channel.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, connection_id: &str) -> bool {
        let removed = self.subscribers.remove(connection_id).is_some();
        if removed {
            debug!(channel = %self.name, connection = %connection_id, "Connection unsubscribed");
        }
        removed
    }

    /// Deliver a message to every current subscriber.
    ///
    /// Each mailbox is tried independently and never awaited; a full or
    /// closed mailbox only affects its own connection.
    pub fn publish(&self, message: Message) -> PublishReport {
        let msg = Arc::new(message);
        let mut report = PublishReport::default();

        for (connection_id, mailbox) in &self.subscribers {
            match mailbox.try_send(Arc::clone(&msg)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(channel = %self.name, connection = %connection_id, "Mailbox full, dropping message");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(channel = %self.name, connection = %connection_id, "Mailbox closed");
                    report.dropped += 1;
                }
            }
        }

        trace!(channel = %self.name, delivered = report.delivered, "Publishing message");
        report
    }

    /// Check if the channel is empty (no subscribers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let channel = Channel::new("group_1");
        assert_eq!(channel.name(), "group_1");
        assert_eq!(channel.subscriber_count(), 0);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_channel_subscribe_unsubscribe() {
        let mut channel = Channel::new("group_1");
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        assert!(channel.subscribe("conn-1", tx1.clone()));
        assert!(!channel.subscribe("conn-1", tx1));
        assert!(channel.subscribe("conn-2", tx2));
        assert_eq!(channel.subscriber_count(), 2);

        assert!(channel.unsubscribe("conn-1"));
        assert!(!channel.is_subscribed("conn-1"));
        assert!(!channel.unsubscribe("conn-1"));
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("user_42").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("$system").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[tokio::test]
    async fn test_channel_publish() {
        let mut channel = Channel::new("group_1");
        let (tx, mut rx) = mpsc::channel(4);
        channel.subscribe("conn-1", tx);

        let report = channel.publish(Message::new("group_1", b"hello".to_vec()));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 0 });

        let msg = rx.recv().await.unwrap();
        assert_eq!(&msg.payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_full_mailbox_does_not_block_others() {
        let mut channel = Channel::new("group_1");
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        channel.subscribe("slow", slow_tx);
        channel.subscribe("fast", fast_tx);

        channel.publish(Message::new("group_1", b"one".to_vec()));
        let report = channel.publish(Message::new("group_1", b"two".to_vec()));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });

        assert_eq!(&fast_rx.recv().await.unwrap().payload[..], b"one");
        assert_eq!(&fast_rx.recv().await.unwrap().payload[..], b"two");
    }
}
