//! # parley-core
//!
//! Core types and services for the Parley group chat service.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Router** - In-process broadcast backplane (channel -> connections)
//! - **Store** - Persistence gateway over users, groups, memberships, messages
//! - **NotificationRelay** - Republishes domain events to personal channels
//! - **Gateway** - Store facade that feeds every committed write to the relay
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Gateway   │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │ DomainEvent
//!        │                   ▼
//!        │            ┌─────────────┐
//!        │            │    Relay    │
//!        │            └─────────────┘
//!        ▼                   │
//! ┌─────────────────────────────────┐
//! │      Backplane (Router)         │
//! └─────────────────────────────────┘
//! ```

pub mod backplane;
pub mod channel;
pub mod events;
pub mod gateway;
pub mod message;
pub mod model;
pub mod relay;
pub mod router;
pub mod store;

pub use backplane::{publish_event, Backplane};
pub use channel::{Channel, ChannelId, Mailbox};
pub use events::{DomainEvent, Recorded};
pub use gateway::Gateway;
pub use message::Message;
pub use model::{
    group_channel, group_link, user_channel, ChatMessage, Group, GroupDescriptor, Membership,
    MessageView, User,
};
pub use parley_protocol::{GroupId, MessageId, UserId};
pub use relay::{NotificationRelay, RelayError};
pub use router::{PublishReport, Router, RouterConfig, RouterError, RouterStats};
pub use store::{MemoryStore, Store, StoreError, StoreResult};
