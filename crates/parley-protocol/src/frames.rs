//! Frame types for the Parley protocol.
//!
//! Client frames are JSON objects tagged by an `event` name. Server frames
//! are written back to a single connection, while `ChannelEvent`s travel
//! over the broadcast backplane and are turned into server frames by each
//! receiving session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notice event names published on personal channels.
pub mod notices {
    /// The user was added to a group.
    pub const NEW_GROUP: &str = "new.group";
    /// A message was posted in one of the user's groups.
    pub const NEW_MESSAGE: &str = "new.message";
}

/// A command sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Command name, e.g. `send.message`.
    pub event: String,
    /// Command arguments.
    #[serde(default)]
    pub data: Value,
}

impl ClientEnvelope {
    /// Create a new client envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// The chat payload broadcast to every subscriber of a group channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Author display name.
    pub username: String,
    /// Message body.
    pub message: String,
}

/// An out-of-band notification for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Notice name (`new.group` or `new.message`).
    pub event: String,
    /// Notice body.
    pub data: Value,
}

/// A frame written to a single client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Direct reply to a command.
    Reply {
        /// The command this replies to.
        event: String,
        /// Result of the command.
        data: Value,
    },

    /// Error report, sent to the requester only.
    Error {
        /// Human-readable error.
        detail: String,
        /// The command that failed, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },

    /// Raw chat broadcast, no outer event wrapper.
    Chat(ChatPayload),

    /// Notice forwarded verbatim from a personal channel.
    Notice(Notice),
}

impl ServerFrame {
    /// Create a reply frame.
    #[must_use]
    pub fn reply(event: impl Into<String>, data: Value) -> Self {
        ServerFrame::Reply {
            event: event.into(),
            data,
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(detail: impl Into<String>, event: Option<&str>) -> Self {
        ServerFrame::Error {
            detail: detail.into(),
            event: event.map(str::to_string),
        }
    }
}

/// A payload published to a backplane channel.
///
/// The `type` tag names the handler a receiving session runs for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    /// Chat message for every member connected to a group.
    #[serde(rename = "chat.message")]
    ChatMessage(ChatPayload),

    /// Notification for one user's personal channel.
    #[serde(rename = "send.notice")]
    SendNotice {
        /// The notice to forward to the client.
        data: Notice,
    },
}

impl ChannelEvent {
    /// Create a chat message event.
    #[must_use]
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        ChannelEvent::ChatMessage(ChatPayload {
            username: username.into(),
            message: message.into(),
        })
    }

    /// Create a notice event.
    #[must_use]
    pub fn notice(event: impl Into<String>, data: Value) -> Self {
        ChannelEvent::SendNotice {
            data: Notice {
                event: event.into(),
                data,
            },
        }
    }

    /// The handler tag of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::ChatMessage(_) => "chat.message",
            ChannelEvent::SendNotice { .. } => "send.notice",
        }
    }

    /// Turn the event into the frame the client sees.
    #[must_use]
    pub fn into_frame(self) -> ServerFrame {
        match self {
            ChannelEvent::ChatMessage(chat) => ServerFrame::Chat(chat),
            ChannelEvent::SendNotice { data } => ServerFrame::Notice(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_frame_shape() {
        let frame = ServerFrame::error("Missing message", Some("send.message"));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"detail": "Missing message", "event": "send.message"})
        );

        let untagged = ServerFrame::error("Access denied", None);
        assert_eq!(
            serde_json::to_value(&untagged).unwrap(),
            json!({"detail": "Access denied"})
        );
    }

    #[test]
    fn test_chat_frame_has_no_wrapper() {
        let frame = ChannelEvent::chat("user2", "hi").into_frame();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"username": "user2", "message": "hi"})
        );
    }

    #[test]
    fn test_notice_envelope_shape() {
        let event = ChannelEvent::notice(notices::NEW_GROUP, json!({"id": 1}));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "send.notice",
                "data": {"event": "new.group", "data": {"id": 1}}
            })
        );

        // The client only sees the embedded notice.
        assert_eq!(
            serde_json::to_value(event.into_frame()).unwrap(),
            json!({"event": "new.group", "data": {"id": 1}})
        );
    }

    #[test]
    fn test_channel_event_kind() {
        let parsed: ChannelEvent =
            serde_json::from_value(json!({"type": "chat.message", "username": "a", "message": "b"}))
                .unwrap();
        assert_eq!(parsed.kind(), "chat.message");
        assert_eq!(parsed, ChannelEvent::chat("a", "b"));
    }

    #[test]
    fn test_envelope_data_defaults_to_null() {
        let envelope: ClientEnvelope = serde_json::from_str(r#"{"event":"group.list"}"#).unwrap();
        assert_eq!(envelope.event, "group.list");
        assert!(envelope.data.is_null());
    }
}
