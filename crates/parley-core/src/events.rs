//! Domain events emitted by persistence writes.
//!
//! Store write operations return the committed record together with the
//! events it produced. Nothing reacts to a write implicitly; the `Gateway`
//! hands these events to the notification relay.

use crate::model::{ChatMessage, Group, Membership};

/// Something that happened in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A user became a member of a group.
    MembershipCreated {
        group: Group,
        membership: Membership,
        /// The group had no members before this one.
        first_participant: bool,
    },

    /// A message was stored in a group.
    MessageCreated { group: Group, message: ChatMessage },
}

impl DomainEvent {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::MembershipCreated { .. } => "membership_created",
            DomainEvent::MessageCreated { .. } => "message_created",
        }
    }
}

/// The result of a write plus the events it emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded<T> {
    pub record: T,
    pub events: Vec<DomainEvent>,
}

impl<T> Recorded<T> {
    /// A write that emitted no events.
    #[must_use]
    pub fn quiet(record: T) -> Self {
        Self {
            record,
            events: Vec::new(),
        }
    }

    /// A write that emitted one event.
    #[must_use]
    pub fn with_event(record: T, event: DomainEvent) -> Self {
        Self {
            record,
            events: vec![event],
        }
    }
}
