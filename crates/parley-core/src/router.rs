//! In-process broadcast backplane.
//!
//! The router owns the channel -> subscriber registry for every live
//! connection in this process. Each connection registers once and receives
//! a bounded mailbox; every channel it joins delivers into that mailbox.

use crate::channel::{validate_channel_name, Channel, ChannelId, Mailbox, MailboxSender};
pub use crate::channel::PublishReport;
use crate::message::Message;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Connection has no mailbox.
    #[error("Connection not registered: {0}")]
    NotRegistered(String),

    /// Connection already has a mailbox.
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(String),

    /// Not subscribed to channel.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// Payload could not be encoded.
    #[error("Payload encoding failed: {0}")]
    Encode(#[from] parley_protocol::ProtocolError),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Per-connection mailbox capacity.
    pub mailbox_capacity: usize,
    /// Whether to auto-delete empty channels.
    pub auto_delete_empty_channels: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_connection: 100,
            mailbox_capacity: 1024,
            auto_delete_empty_channels: true,
        }
    }
}

/// A registered connection.
struct ConnectionEntry {
    mailbox: MailboxSender,
    channels: HashSet<ChannelId>,
}

/// The in-process message router.
///
/// Lock order is always connection entry, then channel entry. Publishing
/// only touches the channel entry, so it never waits on a connection.
pub struct Router {
    /// Channels indexed by name.
    channels: DashMap<ChannelId, Channel>,
    /// Registered connections (connection_id -> mailbox and joined channels).
    connections: DashMap<String, ConnectionEntry>,
    /// Deliveries dropped because a mailbox was full or closed.
    dropped: AtomicU64,
    /// Configuration.
    config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            connections: DashMap::new(),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            channel_count: self.channels.len(),
            connection_count: self.connections.len(),
            total_subscriptions: self.connections.iter().map(|c| c.channels.len()).sum(),
            dropped_deliveries: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Register a connection and return its mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already registered.
    pub fn register(&self, connection_id: &str) -> Result<Mailbox, RouterError> {
        match self.connections.entry(connection_id.to_string()) {
            Entry::Occupied(_) => Err(RouterError::AlreadyRegistered(connection_id.to_string())),
            Entry::Vacant(slot) => {
                let (mailbox, receiver) = mpsc::channel(self.config.mailbox_capacity.max(1));
                slot.insert(ConnectionEntry {
                    mailbox,
                    channels: HashSet::new(),
                });
                debug!(connection = %connection_id, "Registered connection");
                Ok(receiver)
            }
        }
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Subscribe a connection to a channel.
    ///
    /// Subscribing to a channel the connection already joined is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid, the connection is not
    /// registered, or limits are exceeded.
    pub fn subscribe(&self, connection_id: &str, channel_name: &str) -> Result<(), RouterError> {
        validate_channel_name(channel_name).map_err(RouterError::InvalidChannel)?;

        // Held for the whole call so a concurrent release cannot leave an
        // orphaned channel subscription behind.
        let mut conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RouterError::NotRegistered(connection_id.to_string()))?;

        if conn.channels.contains(channel_name) {
            return Ok(());
        }

        if conn.channels.len() >= self.config.max_subscriptions_per_connection {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        if !self.channels.contains_key(channel_name)
            && self.channels.len() >= self.config.max_channels
        {
            return Err(RouterError::MaxChannelsReached);
        }

        let mut entry = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_name, "Creating new channel");
                Channel::new(channel_name)
            });

        entry.subscribe(connection_id, conn.mailbox.clone());
        conn.channels.insert(channel_name.to_string());

        debug!(
            channel = %channel_name,
            connection = %connection_id,
            subscribers = entry.subscriber_count(),
            "Subscribed"
        );

        Ok(())
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(&self, connection_id: &str, channel_name: &str) -> Result<(), RouterError> {
        let mut conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RouterError::NotSubscribed(channel_name.to_string()))?;

        if !conn.channels.remove(channel_name) {
            return Err(RouterError::NotSubscribed(channel_name.to_string()));
        }

        self.detach(connection_id, channel_name);
        drop(conn);

        Ok(())
    }

    /// Drop a connection's mailbox and every subscription it holds.
    ///
    /// Returns the number of channels the connection was removed from.
    pub fn release(&self, connection_id: &str) -> usize {
        let Some((_, entry)) = self.connections.remove(connection_id) else {
            return 0;
        };

        for channel_name in &entry.channels {
            self.detach(connection_id, channel_name);
        }

        debug!(
            connection = %connection_id,
            channels = entry.channels.len(),
            "Released connection"
        );
        entry.channels.len()
    }

    fn detach(&self, connection_id: &str, channel_name: &str) {
        let Some(mut entry) = self.channels.get_mut(channel_name) else {
            return;
        };

        entry.unsubscribe(connection_id);
        let empty = entry.is_empty();
        drop(entry);

        if self.config.auto_delete_empty_channels && empty {
            // Re-checked under the lock in case someone joined meanwhile.
            if self
                .channels
                .remove_if(channel_name, |_, channel| channel.is_empty())
                .is_some()
            {
                debug!(channel = %channel_name, "Deleted empty channel");
            }
        }
    }

    /// Publish a message to its channel.
    ///
    /// Publishing to a channel without subscribers is a no-op.
    pub fn publish(&self, message: Message) -> PublishReport {
        let channel_name = message.channel.clone();

        let Some(entry) = self.channels.get(&channel_name) else {
            trace!(channel = %channel_name, "Publish to channel without subscribers");
            return PublishReport::default();
        };

        let report = entry.publish(message);
        drop(entry);

        if report.dropped > 0 {
            self.dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        trace!(channel = %channel_name, recipients = report.delivered, "Published message");
        report
    }

    /// Publish raw payload to a channel.
    pub fn publish_to(&self, channel_name: &str, payload: impl Into<Bytes>) -> PublishReport {
        self.publish(Message::new(channel_name, payload))
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.channels
            .get(channel_name)
            .map(|c| c.subscriber_count())
            .unwrap_or(0)
    }

    /// Get the channels a connection is subscribed to.
    #[must_use]
    pub fn connection_channels(&self, connection_id: &str) -> Vec<String> {
        self.connections
            .get(connection_id)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of active channels.
    pub channel_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
    /// Deliveries dropped since start.
    pub dropped_deliveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_subscribe_unsubscribe() {
        let router = Router::new();
        let _mailbox = router.register("conn-1").unwrap();

        router.subscribe("conn-1", "group_1").unwrap();
        assert!(router.channel_exists("group_1"));
        assert_eq!(router.subscriber_count("group_1"), 1);

        router.unsubscribe("conn-1", "group_1").unwrap();
        // Channel should be auto-deleted
        assert!(!router.channel_exists("group_1"));
        assert!(matches!(
            router.unsubscribe("conn-1", "group_1"),
            Err(RouterError::NotSubscribed(_))
        ));
    }

    #[test]
    fn test_subscribe_requires_registration() {
        let router = Router::new();
        assert!(matches!(
            router.subscribe("ghost", "group_1"),
            Err(RouterError::NotRegistered(_))
        ));
        assert!(!router.channel_exists("group_1"));
    }

    #[test]
    fn test_register_twice() {
        let router = Router::new();
        let _mailbox = router.register("conn-1").unwrap();
        assert!(matches!(
            router.register("conn-1"),
            Err(RouterError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let router = Router::new();
        let _mailbox = router.register("conn-1").unwrap();

        router.subscribe("conn-1", "user_1").unwrap();
        router.subscribe("conn-1", "user_1").unwrap();
        assert_eq!(router.subscriber_count("user_1"), 1);
        assert_eq!(router.stats().total_subscriptions, 1);
    }

    #[tokio::test]
    async fn test_router_publish() {
        let router = Router::new();
        let mut rx1 = router.register("conn-1").unwrap();
        let mut rx2 = router.register("conn-2").unwrap();
        let mut rx3 = router.register("conn-3").unwrap();

        router.subscribe("conn-1", "group_1").unwrap();
        router.subscribe("conn-2", "group_1").unwrap();
        router.subscribe("conn-3", "group_2").unwrap();

        let report = router.publish_to("group_1", b"hello".to_vec());
        assert_eq!(report.delivered, 2);

        assert_eq!(&rx1.recv().await.unwrap().payload[..], b"hello");
        assert_eq!(&rx2.recv().await.unwrap().payload[..], b"hello");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let router = Router::new();
        let report = router.publish_to("user_9", b"nobody".to_vec());
        assert_eq!(report, PublishReport::default());
        assert!(!router.channel_exists("user_9"));
    }

    #[test]
    fn test_late_subscriber_gets_no_backlog() {
        let router = Router::new();
        let _rx1 = router.register("conn-1").unwrap();
        let mut rx2 = router.register("conn-2").unwrap();
        router.subscribe("conn-1", "group_1").unwrap();

        router.publish_to("group_1", b"early".to_vec());
        router.subscribe("conn-2", "group_1").unwrap();

        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_router_invalid_channel() {
        let router = Router::new();
        let _rx = router.register("conn-1").unwrap();

        assert!(router.subscribe("conn-1", "").is_err());
        assert!(router.subscribe("conn-1", "$system").is_err());
    }

    #[test]
    fn test_release_removes_every_subscription() {
        let router = Router::new();
        let mut rx = router.register("conn-1").unwrap();
        let _other = router.register("conn-2").unwrap();

        router.subscribe("conn-1", "user_1").unwrap();
        router.subscribe("conn-1", "group_1").unwrap();
        router.subscribe("conn-2", "group_1").unwrap();

        assert_eq!(router.release("conn-1"), 2);
        assert_eq!(router.release("conn-1"), 0);

        assert!(!router.is_registered("conn-1"));
        assert!(!router.channel_exists("user_1"));
        assert_eq!(router.subscriber_count("group_1"), 1);
        assert!(router.connection_channels("conn-1").is_empty());

        router.publish_to("group_1", b"after".to_vec());
        // Mailbox sender is gone: the queue reports closed, not a message.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_subscription_limit() {
        let router = Router::with_config(RouterConfig {
            max_subscriptions_per_connection: 1,
            ..Default::default()
        });
        let _rx = router.register("conn-1").unwrap();

        router.subscribe("conn-1", "user_1").unwrap();
        assert!(matches!(
            router.subscribe("conn-1", "group_1"),
            Err(RouterError::MaxSubscriptionsReached)
        ));
    }

    #[test]
    fn test_channel_limit() {
        let router = Router::with_config(RouterConfig {
            max_channels: 1,
            ..Default::default()
        });
        let _rx1 = router.register("conn-1").unwrap();
        let _rx2 = router.register("conn-2").unwrap();

        router.subscribe("conn-1", "group_1").unwrap();
        // Joining an existing channel does not count against the limit.
        router.subscribe("conn-2", "group_1").unwrap();
        assert!(matches!(
            router.subscribe("conn-2", "group_2"),
            Err(RouterError::MaxChannelsReached)
        ));
    }

    #[test]
    fn test_dropped_deliveries_are_counted() {
        let router = Router::with_config(RouterConfig {
            mailbox_capacity: 1,
            ..Default::default()
        });
        let _rx = router.register("conn-1").unwrap();
        router.subscribe("conn-1", "group_1").unwrap();

        router.publish_to("group_1", b"one".to_vec());
        router.publish_to("group_1", b"two".to_vec());

        assert_eq!(router.stats().dropped_deliveries, 1);
    }

    #[test]
    fn test_router_stats() {
        let router = Router::new();
        let _rx1 = router.register("conn-1").unwrap();
        let _rx2 = router.register("conn-2").unwrap();

        router.subscribe("conn-1", "user_1").unwrap();
        router.subscribe("conn-1", "group_1").unwrap();
        router.subscribe("conn-2", "group_1").unwrap();

        let stats = router.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }

    #[test]
    fn test_concurrent_subscribe_and_release() {
        use std::sync::Arc;

        let router = Arc::new(Router::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = Arc::clone(&router);
                std::thread::spawn(move || {
                    let id = format!("conn-{i}");
                    for _ in 0..200 {
                        let _rx = router.register(&id).unwrap();
                        router.subscribe(&id, "group_1").unwrap();
                        router.publish_to("group_1", b"x".to_vec());
                        router.release(&id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(router.stats().total_subscriptions, 0);
        assert!(!router.channel_exists("group_1"));
    }
}
