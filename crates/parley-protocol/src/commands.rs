//! Client commands.
//!
//! Each session kind accepts a closed set of commands. An inbound
//! `ClientEnvelope` is mapped to a variant by its event name; names that are
//! not in the set produce `CommandError::UnknownEvent` instead of being
//! ignored.

use crate::frames::ClientEnvelope;
use crate::UserId;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Command event names.
pub mod events {
    pub const ADD_PARTICIPANT: &str = "add.participant";
    pub const SEND_MESSAGE: &str = "send.message";
    pub const LIST_MESSAGES: &str = "list.messages";
    pub const GROUP_LIST: &str = "group.list";
    pub const USER_LIST: &str = "user.list";
    pub const GROUP_CREATE: &str = "group.create";
}

/// Errors raised while mapping an envelope to a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The event name is not handled by this session kind.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The event is known but its data could not be decoded.
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// The offending event name.
        event: String,
        /// Decoder message.
        reason: String,
    },
}

impl CommandError {
    /// The event name the error refers to.
    #[must_use]
    pub fn event(&self) -> &str {
        match self {
            CommandError::UnknownEvent(event) => event,
            CommandError::InvalidPayload { event, .. } => event,
        }
    }
}

/// A closed set of commands handled by one kind of session.
pub trait Command: Sized + Send {
    /// Every event name this command set accepts.
    const EVENTS: &'static [&'static str];

    /// Map an envelope to a command.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown event names or undecodable data.
    fn parse(envelope: ClientEnvelope) -> Result<Self, CommandError>;

    /// The event name of this command.
    fn event(&self) -> &'static str;
}

/// Arguments of `add.participant`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AddParticipant {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Arguments of `send.message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub message: Option<String>,
}

/// Arguments of `group.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateGroup {
    #[serde(default)]
    pub name: Option<String>,
}

/// Commands accepted inside a group session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCommand {
    AddParticipant(AddParticipant),
    SendMessage(SendMessage),
    ListMessages,
}

impl Command for GroupCommand {
    const EVENTS: &'static [&'static str] = &[
        events::ADD_PARTICIPANT,
        events::SEND_MESSAGE,
        events::LIST_MESSAGES,
    ];

    fn parse(envelope: ClientEnvelope) -> Result<Self, CommandError> {
        let ClientEnvelope { event, data } = envelope;
        match event.as_str() {
            events::ADD_PARTICIPANT => decode_data(&event, data).map(GroupCommand::AddParticipant),
            events::SEND_MESSAGE => decode_data(&event, data).map(GroupCommand::SendMessage),
            events::LIST_MESSAGES => Ok(GroupCommand::ListMessages),
            _ => Err(CommandError::UnknownEvent(event)),
        }
    }

    fn event(&self) -> &'static str {
        match self {
            GroupCommand::AddParticipant(_) => events::ADD_PARTICIPANT,
            GroupCommand::SendMessage(_) => events::SEND_MESSAGE,
            GroupCommand::ListMessages => events::LIST_MESSAGES,
        }
    }
}

/// Commands accepted by the group directory session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCommand {
    GroupList,
    UserList,
    GroupCreate(CreateGroup),
}

impl Command for DirectoryCommand {
    const EVENTS: &'static [&'static str] =
        &[events::GROUP_LIST, events::USER_LIST, events::GROUP_CREATE];

    fn parse(envelope: ClientEnvelope) -> Result<Self, CommandError> {
        let ClientEnvelope { event, data } = envelope;
        match event.as_str() {
            events::GROUP_LIST => Ok(DirectoryCommand::GroupList),
            events::USER_LIST => Ok(DirectoryCommand::UserList),
            events::GROUP_CREATE => decode_data(&event, data).map(DirectoryCommand::GroupCreate),
            _ => Err(CommandError::UnknownEvent(event)),
        }
    }

    fn event(&self) -> &'static str {
        match self {
            DirectoryCommand::GroupList => events::GROUP_LIST,
            DirectoryCommand::UserList => events::USER_LIST,
            DirectoryCommand::GroupCreate(_) => events::GROUP_CREATE,
        }
    }
}

/// Decode command arguments, treating absent data as an empty object.
fn decode_data<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, CommandError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };

    serde_json::from_value(data).map_err(|e| CommandError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}
