//! # parley-protocol
//!
//! Wire protocol definitions for the Parley group chat service.
//!
//! Clients speak JSON text frames over a persistent connection:
//!
//! - `ClientEnvelope` - `{"event": "<name>", "data": {...}}` commands
//! - `ServerFrame` - replies, error reports and chat broadcasts
//! - `ChannelEvent` - payloads carried over the broadcast backplane
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, GroupCommand, Command};
//!
//! let envelope = codec::decode_envelope(br#"{"event":"send.message","data":{"message":"hi"}}"#).unwrap();
//! let command = GroupCommand::parse(envelope).unwrap();
//! assert_eq!(command.event(), "send.message");
//! ```

pub mod codec;
pub mod commands;
pub mod frames;

pub use codec::{decode, decode_envelope, encode, ProtocolError};
pub use commands::{
    AddParticipant, Command, CommandError, CreateGroup, DirectoryCommand, GroupCommand,
    SendMessage,
};
pub use frames::{ChannelEvent, ChatPayload, ClientEnvelope, Notice, ServerFrame};

/// Identifier of a user.
pub type UserId = i64;

/// Identifier of a group.
pub type GroupId = i64;

/// Identifier of a persisted chat message.
pub type MessageId = i64;
