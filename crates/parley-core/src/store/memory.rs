//! In-memory store.

use super::{Store, StoreError, StoreResult};
use crate::events::{DomainEvent, Recorded};
use crate::model::{ChatMessage, Group, Membership, User};
use async_trait::async_trait;
use parley_protocol::{GroupId, UserId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    groups: BTreeMap<GroupId, Group>,
    /// Ordered by membership id.
    memberships: Vec<Membership>,
    /// Ordered by message id.
    messages: Vec<ChatMessage>,
    next_group_id: GroupId,
    next_membership_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn user(&self, id: UserId) -> StoreResult<&User> {
        self.users.get(&id).ok_or(StoreError::UserNotFound(id))
    }

    fn group(&self, id: GroupId) -> StoreResult<&Group> {
        self.groups.get(&id).ok_or(StoreError::GroupNotFound(id))
    }

    fn members(&self, group_id: GroupId) -> impl Iterator<Item = &Membership> {
        self.memberships
            .iter()
            .filter(move |m| m.group_id == group_id)
    }

    /// Insert a membership unless the pair exists. Caller holds the write lock.
    fn insert_membership(&mut self, group: &Group, user_id: UserId) -> Recorded<Membership> {
        if let Some(existing) = self.members(group.id).find(|m| m.user_id == user_id) {
            return Recorded::quiet(*existing);
        }

        let first_participant = self.members(group.id).next().is_none();
        self.next_membership_id += 1;
        let membership = Membership {
            id: self.next_membership_id,
            group_id: group.id,
            user_id,
        };
        self.memberships.push(membership);

        Recorded::with_event(
            membership,
            DomainEvent::MembershipCreated {
                group: group.clone(),
                membership,
                first_participant,
            },
        )
    }
}

/// A store that keeps everything in process memory.
///
/// Every write runs under one lock, which makes group creation and
/// membership de-duplication atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with users.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let tables = Tables {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            ..Default::default()
        };
        Self {
            tables: RwLock::new(tables),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with a backend error, or recover.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Number of membership rows for a (group, user) pair.
    pub async fn membership_rows(&self, group_id: GroupId, user_id: UserId) -> usize {
        self.tables
            .read()
            .await
            .members(group_id)
            .filter(|m| m.user_id == user_id)
            .count()
    }

    /// Number of stored messages in a group.
    pub async fn message_count(&self, group_id: GroupId) -> usize {
        self.tables
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.group_id == group_id)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.check_available()?;
        Ok(self.tables.read().await.groups.get(&id).cloned())
    }

    async fn list_memberships(&self, group_id: GroupId) -> StoreResult<Vec<UserId>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables.members(group_id).map(|m| m.user_id).collect())
    }

    async fn add_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> StoreResult<Recorded<Membership>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let group = tables.group(group_id)?.clone();
        tables.user(user_id)?;

        let recorded = tables.insert_membership(&group, user_id);
        debug!(
            group = group_id,
            user = user_id,
            created = !recorded.events.is_empty(),
            "Membership stored"
        );
        Ok(recorded)
    }

    async fn list_groups_for_user(&self, user_id: UserId) -> StoreResult<Vec<Group>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .filter(|g| tables.members(g.id).any(|m| m.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn list_users_except(&self, user_id: UserId) -> StoreResult<Vec<User>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.id != user_id)
            .cloned()
            .collect())
    }

    async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Recorded<Group>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        tables.user(creator)?;

        tables.next_group_id += 1;
        let group = Group {
            id: tables.next_group_id,
            name: name.to_string(),
        };
        tables.groups.insert(group.id, group.clone());

        let membership = tables.insert_membership(&group, creator);
        debug!(group = group.id, creator, "Group created");
        Ok(Recorded {
            record: group,
            events: membership.events,
        })
    }

    async fn save_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        text: &str,
    ) -> StoreResult<Recorded<ChatMessage>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let group = tables.group(group_id)?.clone();
        let username = tables.user(user_id)?.username.clone();

        tables.next_message_id += 1;
        let message = ChatMessage {
            id: tables.next_message_id,
            group_id,
            author_id: user_id,
            username,
            text: text.to_string(),
        };
        tables.messages.push(message.clone());

        Ok(Recorded::with_event(
            message.clone(),
            DomainEvent::MessageCreated { group, message },
        ))
    }

    async fn list_messages(&self, group_id: GroupId) -> StoreResult<Vec<ChatMessage>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }
}
