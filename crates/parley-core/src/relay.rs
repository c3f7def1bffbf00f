//! Notification relay.
//!
//! Turns committed domain events into `send.notice` publishes on the
//! affected users' personal channels. Delivery is best-effort: a user with
//! no live connection simply has no subscribers on `user_{id}`.

use crate::backplane::{publish_event, Backplane};
use crate::events::DomainEvent;
use crate::model::{user_channel, ChatMessage, Group, Membership};
use crate::router::RouterError;
use crate::store::{Store, StoreError};
use parley_protocol::frames::notices;
use parley_protocol::{ChannelEvent, GroupId, MessageId};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Member lookup failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Publishing failed.
    #[error("Backplane error: {0}")]
    Backplane(#[from] RouterError),

    /// The notice body could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Body of a `new.message` notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessageNotice {
    pub id: MessageId,
    pub group_id: GroupId,
    pub name: String,
    pub message: String,
}

/// Republishes domain events to personal notification channels.
#[derive(Clone)]
pub struct NotificationRelay {
    store: Arc<dyn Store>,
    backplane: Arc<dyn Backplane>,
}

impl NotificationRelay {
    /// Create a relay.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, backplane: Arc<dyn Backplane>) -> Self {
        Self { store, backplane }
    }

    /// React to one domain event.
    ///
    /// Returns the number of personal channels a notice was published to.
    ///
    /// # Errors
    ///
    /// Returns an error if the event's recipients cannot be resolved or the
    /// notice cannot be published.
    pub async fn handle(&self, event: &DomainEvent) -> Result<usize, RelayError> {
        match event {
            DomainEvent::MembershipCreated {
                group,
                membership,
                first_participant,
            } => self.membership_created(group, membership, *first_participant).await,
            DomainEvent::MessageCreated { group, message } => {
                self.message_created(group, message).await
            }
        }
    }

    async fn membership_created(
        &self,
        group: &Group,
        membership: &Membership,
        first_participant: bool,
    ) -> Result<usize, RelayError> {
        // The creator does not need to hear about their own group.
        if first_participant {
            return Ok(0);
        }

        let notice = ChannelEvent::notice(notices::NEW_GROUP, json_value(&group.descriptor())?);
        let channel = user_channel(membership.user_id);
        let delivered = publish_event(&*self.backplane, &channel, &notice).await?;

        debug!(
            group = group.id,
            user = membership.user_id,
            delivered,
            "Published new.group notice"
        );
        Ok(1)
    }

    async fn message_created(
        &self,
        group: &Group,
        message: &ChatMessage,
    ) -> Result<usize, RelayError> {
        let body = NewMessageNotice {
            id: message.id,
            group_id: group.id,
            name: group.name.clone(),
            message: message.text.clone(),
        };
        let notice = ChannelEvent::notice(notices::NEW_MESSAGE, json_value(&body)?);

        let members = self.store.list_memberships(group.id).await?;
        let mut published = 0;

        for user_id in members.into_iter().filter(|id| *id != message.author_id) {
            let channel = user_channel(user_id);
            match publish_event(&*self.backplane, &channel, &notice).await {
                Ok(_) => published += 1,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to publish new.message notice")
                }
            }
        }

        debug!(group = group.id, message = message.id, published, "Published new.message notices");
        Ok(published)
    }
}

fn json_value<T: Serialize>(value: &T) -> Result<serde_json::Value, RelayError> {
    Ok(serde_json::to_value(value)?)
}
