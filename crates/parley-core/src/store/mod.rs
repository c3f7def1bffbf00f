//! Persistence gateway.
//!
//! The store is plain CRUD over users, groups, memberships and messages.
//! Writes that other users must hear about return `Recorded` values carrying
//! the domain events they produced.

mod memory;

pub use memory::MemoryStore;

use crate::events::Recorded;
use crate::model::{ChatMessage, Group, Membership, User};
use async_trait::async_trait;
use parley_protocol::{GroupId, UserId};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The referenced group does not exist.
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract storage of users, groups, memberships and messages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a user.
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Look up a group.
    async fn get_group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Member user ids of a group, in the order they joined.
    async fn list_memberships(&self, group_id: GroupId) -> StoreResult<Vec<UserId>>;

    /// Add a user to a group.
    ///
    /// Adding an existing pair returns the existing row and emits nothing.
    async fn add_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> StoreResult<Recorded<Membership>>;

    /// Groups the user is a member of, by id.
    async fn list_groups_for_user(&self, user_id: UserId) -> StoreResult<Vec<Group>>;

    /// Every user except the given one, by id.
    async fn list_users_except(&self, user_id: UserId) -> StoreResult<Vec<User>>;

    /// Create a group and the creator's membership in one step.
    async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Recorded<Group>>;

    /// Store a message written by `user_id` in `group_id`.
    async fn save_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        text: &str,
    ) -> StoreResult<Recorded<ChatMessage>>;

    /// Messages of a group in creation order.
    async fn list_messages(&self, group_id: GroupId) -> StoreResult<Vec<ChatMessage>>;
}
