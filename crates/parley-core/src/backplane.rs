//! Broadcast backplane abstraction.
//!
//! Sessions and the notification relay only talk to channels through this
//! trait, so the in-process `Router` can be swapped for a shared pub/sub
//! service without touching them.

use crate::channel::Mailbox;
use crate::router::{Router, RouterError};
use async_trait::async_trait;
use bytes::Bytes;
use parley_protocol::{codec, ChannelEvent};

/// A publish/subscribe substrate keyed by channel name.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Create the delivery queue for a connection.
    async fn register(&self, connection_id: &str) -> Result<Mailbox, RouterError>;

    /// Add a registered connection to a channel.
    async fn subscribe(&self, channel: &str, connection_id: &str) -> Result<(), RouterError>;

    /// Remove a connection from a channel.
    async fn unsubscribe(&self, channel: &str, connection_id: &str) -> Result<(), RouterError>;

    /// Deliver a payload to every connection subscribed right now.
    ///
    /// Returns the number of connections that received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, RouterError>;

    /// Remove the connection from every channel and close its queue.
    async fn release(&self, connection_id: &str);

    /// Current number of subscribers on a channel.
    fn subscriber_count(&self, channel: &str) -> usize;
}

#[async_trait]
impl Backplane for Router {
    async fn register(&self, connection_id: &str) -> Result<Mailbox, RouterError> {
        Router::register(self, connection_id)
    }

    async fn subscribe(&self, channel: &str, connection_id: &str) -> Result<(), RouterError> {
        Router::subscribe(self, connection_id, channel)
    }

    async fn unsubscribe(&self, channel: &str, connection_id: &str) -> Result<(), RouterError> {
        Router::unsubscribe(self, connection_id, channel)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, RouterError> {
        Ok(self.publish_to(channel, payload).delivered)
    }

    async fn release(&self, connection_id: &str) {
        Router::release(self, connection_id);
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        Router::subscriber_count(self, channel)
    }
}

/// Encode a channel event and publish it.
///
/// # Errors
///
/// Returns an error if encoding or publishing fails.
pub async fn publish_event(
    backplane: &dyn Backplane,
    channel: &str,
    event: &ChannelEvent,
) -> Result<usize, RouterError> {
    let payload = codec::encode_bytes(event)?;
    backplane.publish(channel, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_event_through_trait_object() {
        let backplane: Arc<dyn Backplane> = Arc::new(Router::new());
        let mut mailbox = backplane.register("conn-1").await.unwrap();
        backplane.subscribe("group_1", "conn-1").await.unwrap();
        assert_eq!(backplane.subscriber_count("group_1"), 1);

        let delivered = publish_event(&*backplane, "group_1", &ChannelEvent::chat("user1", "hi"))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let message = mailbox.recv().await.unwrap();
        let event: ChannelEvent = codec::decode(&message.payload).unwrap();
        assert_eq!(event, ChannelEvent::chat("user1", "hi"));

        backplane.release("conn-1").await;
        assert_eq!(backplane.subscriber_count("group_1"), 0);
    }
}
