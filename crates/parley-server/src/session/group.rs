//! Group chat consumer, served at `/ws/chat/{group_id}/`.

use super::{details, Consumer, SessionContext, SessionError};
use async_trait::async_trait;
use parley_core::{group_channel, ChatMessage, Group, MessageView, StoreError};
use parley_protocol::commands::events;
use parley_protocol::{AddParticipant, ChannelEvent, GroupCommand, GroupId, SendMessage, UserId};
use tracing::debug;

/// A session bound to one group.
///
/// The connection is admitted only if the group exists and the user is a
/// member. Until then the group channel is not joined.
#[derive(Debug)]
pub struct GroupConsumer {
    group_id: GroupId,
    group: Option<Group>,
    participants: Vec<UserId>,
    subscribed: bool,
}

impl GroupConsumer {
    /// Bind to a group id taken from the connection request.
    #[must_use]
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            group: None,
            participants: Vec::new(),
            subscribed: false,
        }
    }

    async fn reject(&self, ctx: &mut SessionContext, detail: &str) -> Result<(), SessionError> {
        debug!(
            connection = %ctx.connection_id(),
            user = ctx.user().id(),
            group = self.group_id,
            detail,
            "Group session rejected"
        );
        ctx.report_error(detail, None).await?;
        ctx.close().await
    }

    async fn add_participant(
        &mut self,
        ctx: &mut SessionContext,
        args: AddParticipant,
    ) -> Result<(), SessionError> {
        let Some(user_id) = args.user_id.filter(|id| *id != 0) else {
            return ctx
                .report_error(details::MISSING_USER_ID, Some(events::ADD_PARTICIPANT))
                .await;
        };

        match ctx.gateway().add_membership(self.group_id, user_id).await {
            Ok(_) => {}
            // Membership stays as it is; the caller still gets the list.
            Err(StoreError::UserNotFound(_)) => {
                debug!(group = self.group_id, user = user_id, "Ignoring unknown participant");
            }
            Err(e) => return Err(e.into()),
        }

        self.participants = ctx.gateway().list_memberships(self.group_id).await?;
        ctx.reply(events::ADD_PARTICIPANT, &self.participants).await
    }

    async fn send_message(
        &mut self,
        ctx: &mut SessionContext,
        args: SendMessage,
    ) -> Result<(), SessionError> {
        let Some(text) = args.message.filter(|m| !m.is_empty()) else {
            return ctx
                .report_error(details::MISSING_MESSAGE, Some(events::SEND_MESSAGE))
                .await;
        };

        let author = ctx.user().id();
        let message = ctx.gateway().save_message(self.group_id, author, &text).await?;

        let event = ChannelEvent::chat(message.username, message.text);
        let delivered = ctx.group_send(&group_channel(self.group_id), &event).await?;
        debug!(group = self.group_id, message = message.id, delivered, "Chat message sent");
        Ok(())
    }

    async fn list_messages(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let history: Vec<MessageView> = ctx
            .gateway()
            .list_messages(self.group_id)
            .await?
            .iter()
            .map(ChatMessage::view)
            .collect();
        ctx.reply(events::LIST_MESSAGES, &history).await
    }
}

#[async_trait]
impl Consumer for GroupConsumer {
    type Command = GroupCommand;

    async fn connect(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let Some(group) = ctx.gateway().get_group(self.group_id).await? else {
            return self.reject(ctx, details::GROUP_NOT_FOUND).await;
        };

        self.participants = ctx.gateway().list_memberships(group.id).await?;
        if !self.participants.contains(&ctx.user().id()) {
            return self.reject(ctx, details::ACCESS_DENIED).await;
        }

        ctx.join(&group.channel_name()).await?;
        self.subscribed = true;
        debug!(
            connection = %ctx.connection_id(),
            user = ctx.user().id(),
            group = group.id,
            "Group session active"
        );
        self.group = Some(group);
        Ok(())
    }

    async fn handle(
        &mut self,
        ctx: &mut SessionContext,
        command: GroupCommand,
    ) -> Result<(), SessionError> {
        match command {
            GroupCommand::AddParticipant(args) => self.add_participant(ctx, args).await,
            GroupCommand::SendMessage(args) => self.send_message(ctx, args).await,
            GroupCommand::ListMessages => self.list_messages(ctx).await,
        }
    }

    async fn disconnect(&mut self, ctx: &mut SessionContext) {
        if !self.subscribed {
            return;
        }
        self.subscribed = false;

        if let Err(e) = ctx.leave(&group_channel(self.group_id)).await {
            debug!(connection = %ctx.connection_id(), error = %e, "Group channel already gone");
        }
        if let Some(group) = self.group.take() {
            debug!(connection = %ctx.connection_id(), group = group.id, name = %group.name, "Left group");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use serde_json::json;

    async fn team(h: &Harness) {
        h.services.gateway.create_group("Team", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_member_is_denied_without_subscription() {
        let mut h = Harness::new();
        team(&h).await;
        let before = h.router.subscriber_count("group_1");

        let mut intruder = h.open(2, super::GroupConsumer::new(1)).await;
        assert_eq!(intruder.next().await, json!({"detail": "Access denied"}));
        intruder.expect_closed().await;
        let id = intruder.id.clone();
        intruder.finished().await;

        assert_eq!(h.router.subscriber_count("group_1"), before);
        assert!(!h.router.is_registered(id.as_str()));
    }

    #[tokio::test]
    async fn test_missing_group_is_rejected() {
        let mut h = Harness::new();

        let mut client = h.open(1, super::GroupConsumer::new(99)).await;
        assert_eq!(client.next().await, json!({"detail": "Group not found"}));
        client.expect_closed().await;
        client.finished().await;

        assert!(!h.router.channel_exists("group_99"));
        assert_eq!(h.router.stats().connection_count, 0);
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let mut h = Harness::new();
        team(&h).await;
        let mut chat = h.group(1, 1).await;

        for _ in 0..2 {
            assert_eq!(
                chat.request("add.participant", json!({"user_id": 2})).await,
                json!({"event": "add.participant", "data": [1, 2]})
            );
        }
        assert_eq!(h.store.membership_rows(1, 2).await, 1);
    }

    #[tokio::test]
    async fn test_add_participant_validation() {
        let mut h = Harness::new();
        team(&h).await;
        let mut chat = h.group(1, 1).await;

        let missing = json!({"detail": "Missing user id", "event": "add.participant"});
        assert_eq!(chat.request("add.participant", json!({})).await, missing);
        assert_eq!(chat.request("add.participant", json!({"user_id": 0})).await, missing);

        // Unknown users leave the group unchanged.
        assert_eq!(
            chat.request("add.participant", json!({"user_id": 99})).await,
            json!({"event": "add.participant", "data": [1]})
        );
    }

    #[tokio::test]
    async fn test_second_member_is_notified_once() {
        let mut h = Harness::new();
        team(&h).await;
        let mut creator_dir = h.directory(1).await;
        let mut invitee_dir = h.directory(2).await;
        let mut chat = h.group(1, 1).await;

        chat.request("add.participant", json!({"user_id": 2})).await;
        chat.request("add.participant", json!({"user_id": 2})).await;

        assert_eq!(
            invitee_dir.next().await,
            json!({"event": "new.group", "data": {"id": 1, "name": "Team", "link": "/ws/chat/1/"}})
        );
        invitee_dir.expect_silence().await;
        creator_dir.expect_silence().await;
    }

    #[tokio::test]
    async fn test_messages_listed_in_send_order() {
        let mut h = Harness::new();
        team(&h).await;
        let mut chat = h.group(1, 1).await;

        for text in ["one", "two", "three"] {
            assert_eq!(
                chat.request("send.message", json!({"message": text})).await,
                json!({"username": "user1", "message": text})
            );
        }

        assert_eq!(
            chat.request("list.messages", json!({})).await,
            json!({"event": "list.messages", "data": [
                {"id": 1, "username": "user1", "message": "one"},
                {"id": 2, "username": "user1", "message": "two"},
                {"id": 3, "username": "user1", "message": "three"},
            ]})
        );
    }

    #[tokio::test]
    async fn test_fan_out_stays_inside_the_group() {
        let mut h = Harness::new();
        team(&h).await;
        h.services.gateway.add_membership(1, 2).await.unwrap();
        h.services.gateway.create_group("Other", 3).await.unwrap();

        let mut alice = h.group(1, 1).await;
        let mut bob = h.group(2, 1).await;
        let mut carol = h.group(3, 2).await;

        bob.send("send.message", json!({"message": "hi"}));

        let chat = json!({"username": "user2", "message": "hi"});
        assert_eq!(bob.next().await, chat);
        assert_eq!(alice.next().await["event"], "new.message");
        assert_eq!(alice.next().await, chat);
        bob.expect_silence().await;
        carol.expect_silence().await;
    }

    #[tokio::test]
    async fn test_missing_message_is_not_stored_or_sent() {
        let mut h = Harness::new();
        team(&h).await;
        h.services.gateway.add_membership(1, 2).await.unwrap();
        let mut alice = h.group(1, 1).await;
        let mut bob = h.group(2, 1).await;

        let missing = json!({"detail": "Missing message", "event": "send.message"});
        assert_eq!(alice.request("send.message", json!({})).await, missing);
        assert_eq!(alice.request("send.message", json!({"message": ""})).await, missing);

        assert_eq!(h.store.message_count(1).await, 0);
        bob.expect_silence().await;
        alice.expect_silence().await;
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_session_alive() {
        let mut h = Harness::new();
        team(&h).await;
        let mut chat = h.group(1, 1).await;

        h.store.set_unavailable(true);
        assert_eq!(
            chat.request("send.message", json!({"message": "lost"})).await,
            json!({"detail": "Internal error", "event": "send.message"})
        );

        h.store.set_unavailable(false);
        assert_eq!(
            chat.request("list.messages", json!({})).await,
            json!({"event": "list.messages", "data": []})
        );
    }

    #[tokio::test]
    async fn test_storage_failure_on_connect_closes_and_releases() {
        let mut h = Harness::new();
        team(&h).await;
        let user = h.user(1).await;

        h.store.set_unavailable(true);
        let mut client = h.open_as(user, super::GroupConsumer::new(1)).await;
        assert_eq!(client.next().await, json!({"detail": "Internal error"}));
        client.expect_closed().await;
        client.finished().await;

        assert_eq!(h.router.stats().connection_count, 0);
        assert!(!h.router.channel_exists("user_1"));
        assert!(!h.router.channel_exists("group_1"));
    }

    #[tokio::test]
    async fn test_history_larger_than_an_inbound_frame() {
        let mut h = Harness::new();
        team(&h).await;
        let mut chat = h.group(1, 1).await;

        // Each send fits in one frame; together they exceed the inbound cap.
        let text = "x".repeat(60 * 1024);
        for _ in 0..20 {
            let echoed = chat.request("send.message", json!({"message": text})).await;
            assert_eq!(echoed["message"], text.as_str());
        }

        let history = chat.request("list.messages", json!({})).await;
        assert_eq!(history["event"], "list.messages");
        let entries = history["data"].as_array().unwrap();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[19]["id"], 20);

        // The session keeps serving afterwards.
        assert_eq!(
            chat.request("list.messages", json!({})).await["data"][0]["id"],
            1
        );
        assert!(h.router.is_registered(chat.id.as_str()));
    }
}

