//! Write-through facade over the store.
//!
//! Sessions use the `Gateway` instead of the raw store so that every
//! committed write reaches the notification relay before the caller
//! continues.

use crate::backplane::Backplane;
use crate::events::Recorded;
use crate::model::{ChatMessage, Group, Membership, User};
use crate::relay::NotificationRelay;
use crate::store::{Store, StoreResult};
use parley_protocol::{GroupId, UserId};
use std::sync::Arc;
use tracing::warn;

/// Store access with domain event dispatch.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn Store>,
    relay: NotificationRelay,
}

impl Gateway {
    /// Create a gateway whose relay publishes on `backplane`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, backplane: Arc<dyn Backplane>) -> Self {
        let relay = NotificationRelay::new(Arc::clone(&store), backplane);
        Self { store, relay }
    }

    /// Look up a user.
    pub async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.store.get_user(id).await
    }

    /// Look up a group.
    pub async fn get_group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.store.get_group(id).await
    }

    /// Member user ids of a group.
    pub async fn list_memberships(&self, group_id: GroupId) -> StoreResult<Vec<UserId>> {
        self.store.list_memberships(group_id).await
    }

    /// Groups the user belongs to.
    pub async fn list_groups_for_user(&self, user_id: UserId) -> StoreResult<Vec<Group>> {
        self.store.list_groups_for_user(user_id).await
    }

    /// Every other user.
    pub async fn list_users_except(&self, user_id: UserId) -> StoreResult<Vec<User>> {
        self.store.list_users_except(user_id).await
    }

    /// Message history of a group.
    pub async fn list_messages(&self, group_id: GroupId) -> StoreResult<Vec<ChatMessage>> {
        self.store.list_messages(group_id).await
    }

    /// Add a member and notify them.
    pub async fn add_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> StoreResult<Membership> {
        let recorded = self.store.add_membership(group_id, user_id).await?;
        Ok(self.dispatch(recorded).await)
    }

    /// Create a group owned by `creator`.
    pub async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Group> {
        let recorded = self.store.create_group(name, creator).await?;
        Ok(self.dispatch(recorded).await)
    }

    /// Store a message and notify the other members.
    pub async fn save_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        text: &str,
    ) -> StoreResult<ChatMessage> {
        let recorded = self.store.save_message(group_id, user_id, text).await?;
        Ok(self.dispatch(recorded).await)
    }

    /// Hand committed events to the relay. Relay failures never undo a write.
    async fn dispatch<T>(&self, recorded: Recorded<T>) -> T {
        for event in &recorded.events {
            if let Err(e) = self.relay.handle(event).await {
                warn!(event = event.name(), error = %e, "Notification relay failed");
            }
        }
        recorded.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user_channel;
    use crate::router::Router;
    use crate::store::MemoryStore;

    fn user(id: i64) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
        }
    }

    #[tokio::test]
    async fn test_writes_reach_the_relay() {
        let store = Arc::new(MemoryStore::with_users([user(1), user(2)]));
        let router = Arc::new(Router::new());
        let gateway = Gateway::new(store, router.clone());

        let mut invitee = router.register("conn-2").unwrap();
        router.subscribe("conn-2", &user_channel(2)).unwrap();

        let group = gateway.create_group("Team", 1).await.unwrap();
        gateway.add_membership(group.id, 2).await.unwrap();
        // Second add is a no-op and must not notify again.
        gateway.add_membership(group.id, 2).await.unwrap();

        assert!(invitee.try_recv().is_ok());
        assert!(invitee.try_recv().is_err());

        gateway.save_message(group.id, 1, "hi").await.unwrap();
        assert!(invitee.try_recv().is_ok());
    }
}
