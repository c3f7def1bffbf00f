//! Domain entities and their external shapes.

use parley_protocol::{GroupId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Channel name of a group's live sessions.
#[must_use]
pub fn group_channel(group_id: GroupId) -> String {
    format!("group_{group_id}")
}

/// Channel name of a user's personal notifications.
#[must_use]
pub fn user_channel(user_id: UserId) -> String {
    format!("user_{user_id}")
}

/// Connection path of a group's chat session.
#[must_use]
pub fn group_link(group_id: GroupId) -> String {
    format!("/ws/chat/{group_id}/")
}

/// A user, owned by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

/// A named chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

impl Group {
    /// Backplane channel of this group.
    #[must_use]
    pub fn channel_name(&self) -> String {
        group_channel(self.id)
    }

    /// Connection path of this group.
    #[must_use]
    pub fn link(&self) -> String {
        group_link(self.id)
    }

    /// The `{id, name, link}` shape clients see.
    #[must_use]
    pub fn descriptor(&self) -> GroupDescriptor {
        GroupDescriptor {
            id: self.id,
            name: self.name.clone(),
            link: self.link(),
        }
    }
}

/// External shape of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub id: GroupId,
    pub name: String,
    pub link: String,
}

/// A user's membership in a group. Unique per (group, user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub group_id: GroupId,
    pub user_id: UserId,
}

/// A persisted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub author_id: UserId,
    /// Author display name at the time of writing.
    pub username: String,
    pub text: String,
}

impl ChatMessage {
    /// The `{id, username, message}` shape returned by `list.messages`.
    #[must_use]
    pub fn view(&self) -> MessageView {
        MessageView {
            id: self.id,
            username: self.username.clone(),
            message: self.text.clone(),
        }
    }
}

/// External shape of a chat message in history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub username: String,
    pub message: String,
}
