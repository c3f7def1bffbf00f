//! Group directory consumer, served at `/ws/groups/`.

use super::{details, Consumer, SessionContext, SessionError};
use async_trait::async_trait;
use parley_core::GroupDescriptor;
use parley_protocol::commands::events;
use parley_protocol::{CreateGroup, DirectoryCommand};
use tracing::debug;

/// Group discovery and creation for the authenticated user.
#[derive(Debug, Default)]
pub struct DirectoryConsumer;

impl DirectoryConsumer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn group_list(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let groups: Vec<GroupDescriptor> = ctx
            .gateway()
            .list_groups_for_user(ctx.user().id())
            .await?
            .iter()
            .map(|g| g.descriptor())
            .collect();
        ctx.reply(events::GROUP_LIST, &groups).await
    }

    async fn user_list(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        let users = ctx.gateway().list_users_except(ctx.user().id()).await?;
        ctx.reply(events::USER_LIST, &users).await
    }

    async fn group_create(
        &self,
        ctx: &mut SessionContext,
        args: CreateGroup,
    ) -> Result<(), SessionError> {
        let Some(name) = args.name.filter(|n| !n.is_empty()) else {
            return ctx
                .report_error(details::MISSING_GROUP_NAME, Some(events::GROUP_CREATE))
                .await;
        };

        let group = ctx.gateway().create_group(&name, ctx.user().id()).await?;
        debug!(user = ctx.user().id(), group = group.id, "Group created");
        ctx.reply(events::GROUP_CREATE, &group.descriptor()).await
    }
}

#[async_trait]
impl Consumer for DirectoryConsumer {
    type Command = DirectoryCommand;

    async fn connect(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        debug!(
            connection = %ctx.connection_id(),
            user = ctx.user().id(),
            "Directory session active"
        );
        Ok(())
    }

    async fn handle(
        &mut self,
        ctx: &mut SessionContext,
        command: DirectoryCommand,
    ) -> Result<(), SessionError> {
        match command {
            DirectoryCommand::GroupList => self.group_list(ctx).await,
            DirectoryCommand::UserList => self.user_list(ctx).await,
            DirectoryCommand::GroupCreate(args) => self.group_create(ctx, args).await,
        }
    }
}
