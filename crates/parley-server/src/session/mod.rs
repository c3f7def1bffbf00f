//! Connection sessions.
//!
//! A `Session` drives one authenticated connection through
//! `Connecting -> Active -> Closed`. The generic part owns the personal
//! notification channel, delivery of backplane messages, command decoding
//! and cleanup; a `Consumer` adds the behavior of one endpoint.
//!
//! A connection is admitted to the backplane before its transport is
//! accepted: `Admission` registers the mailbox and joins `user_{id}`, then
//! the upgraded connection is bound to it with `Session::new`.
//!
//! Cleanup runs exactly once. A session that finishes normally releases its
//! subscriptions in `shutdown`; one whose task is cancelled releases them
//! from `Drop`. An admission that never becomes a session releases itself.

mod directory;
mod group;

#[cfg(test)]
pub(crate) mod testing;

pub use directory::DirectoryConsumer;
pub use group::GroupConsumer;

use crate::auth::AuthenticatedUser;
use crate::metrics::{self, ConnectionMetricsGuard};
use async_trait::async_trait;
use parley_core::{
    publish_event, user_channel, Backplane, Gateway, Mailbox, Message, RouterError, Store,
    StoreError,
};
use parley_protocol::{
    codec, ChannelEvent, ClientEnvelope, Command, CommandError, ProtocolError, ServerFrame,
};
use parley_transport::{Connection, ConnectionId, TransportError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Error details sent to clients.
pub mod details {
    pub const GROUP_NOT_FOUND: &str = "Group not found";
    pub const ACCESS_DENIED: &str = "Access denied";
    pub const MISSING_USER_ID: &str = "Missing user id";
    pub const MISSING_MESSAGE: &str = "Missing message";
    pub const MISSING_GROUP_NAME: &str = "Missing group name";
    pub const UNKNOWN_EVENT: &str = "Unknown event";
    pub const INVALID_PAYLOAD: &str = "Invalid payload";
    pub const INTERNAL_ERROR: &str = "Internal error";
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An outbound frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistence failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The backplane refused an operation.
    #[error("Backplane error: {0}")]
    Backplane(#[from] RouterError),
}

impl SessionError {
    /// Whether the session can keep serving commands after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::Store(_) | SessionError::Backplane(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            SessionError::Transport(_) => "transport",
            SessionError::Protocol(_) => "protocol",
            SessionError::Store(_) => "store",
            SessionError::Backplane(_) => "backplane",
        }
    }
}

/// Shared services every session uses.
#[derive(Clone)]
pub struct Services {
    pub backplane: Arc<dyn Backplane>,
    pub gateway: Arc<Gateway>,
}

impl Services {
    /// Wire a store and a backplane together.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, backplane: Arc<dyn Backplane>) -> Self {
        let gateway = Arc::new(Gateway::new(store, Arc::clone(&backplane)));
        Self { backplane, gateway }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// The per-connection state a consumer works with.
pub struct SessionContext {
    connection_id: ConnectionId,
    user: AuthenticatedUser,
    conn: Box<dyn Connection>,
    backplane: Arc<dyn Backplane>,
    gateway: Arc<Gateway>,
    closing: bool,
}

impl SessionContext {
    /// This connection's id.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The authenticated user behind the connection.
    #[must_use]
    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    /// Store access.
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Whether a handler asked to close the connection.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Send a frame to this connection only.
    pub async fn send(&mut self, frame: &ServerFrame) -> Result<(), SessionError> {
        let text = codec::encode(frame)?;
        self.conn.send_raw(text).await?;
        Ok(())
    }

    /// Reply to a command with `{"event": .., "data": ..}`.
    pub async fn reply<T>(&mut self, event: &str, data: &T) -> Result<(), SessionError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let data = serde_json::to_value(data).map_err(ProtocolError::from)?;
        self.send(&ServerFrame::reply(event, data)).await
    }

    /// Send an error report to this connection only. Does not close it.
    pub async fn report_error(
        &mut self,
        detail: &str,
        event: Option<&str>,
    ) -> Result<(), SessionError> {
        self.send(&ServerFrame::error(detail, event)).await
    }

    /// Close the connection. The session stops reading and cleans up.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.closing = true;
        self.conn.close().await?;
        Ok(())
    }

    /// Subscribe this connection to a channel.
    pub async fn join(&mut self, channel: &str) -> Result<(), SessionError> {
        self.backplane
            .subscribe(channel, self.connection_id.as_str())
            .await?;
        metrics::record_subscription();
        debug!(connection = %self.connection_id, channel, "Joined channel");
        Ok(())
    }

    /// Unsubscribe this connection from a channel.
    pub async fn leave(&mut self, channel: &str) -> Result<(), SessionError> {
        self.backplane
            .unsubscribe(channel, self.connection_id.as_str())
            .await?;
        debug!(connection = %self.connection_id, channel, "Left channel");
        Ok(())
    }

    /// Publish an event to every subscriber of a channel, this connection
    /// included if it is subscribed.
    pub async fn group_send(
        &self,
        channel: &str,
        event: &ChannelEvent,
    ) -> Result<usize, SessionError> {
        Ok(publish_event(&*self.backplane, channel, event).await?)
    }

    /// Forward one backplane delivery to the client.
    async fn deliver(&mut self, message: &Message) -> Result<(), SessionError> {
        let event: ChannelEvent = match codec::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    connection = %self.connection_id,
                    channel = %message.channel,
                    error = %e,
                    "Dropping undecodable delivery"
                );
                return Ok(());
            }
        };

        metrics::record_delivery(event.kind());
        self.send(&event.into_frame()).await
    }
}

/// Endpoint-specific behavior plugged into a `Session`.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Commands this endpoint accepts.
    type Command: Command;

    /// Runs once the personal channel is joined. A consumer that rejects
    /// the connection reports the reason and calls `ctx.close()`.
    async fn connect(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError>;

    /// Handle one decoded command.
    async fn handle(
        &mut self,
        ctx: &mut SessionContext,
        command: Self::Command,
    ) -> Result<(), SessionError>;

    /// Release endpoint-specific resources. Runs even if `connect` stopped
    /// partway.
    async fn disconnect(&mut self, _ctx: &mut SessionContext) {}
}

/// Releases a connection's backplane registration when dropped, unless
/// disarmed first.
struct ReleaseGuard {
    backplane: Arc<dyn Backplane>,
    connection_id: ConnectionId,
    armed: bool,
}

impl ReleaseGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let backplane = Arc::clone(&self.backplane);
        let connection_id = self.connection_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    backplane.release(connection_id.as_str()).await;
                    debug!(connection = %connection_id, "Released abandoned connection");
                });
            }
            Err(_) => {
                warn!(connection = %connection_id, "No runtime to release abandoned connection");
            }
        }
    }
}

/// A connection registered on the backplane and subscribed to its user's
/// notification channel, waiting for its transport.
pub struct Admission {
    connection_id: ConnectionId,
    user: AuthenticatedUser,
    mailbox: Mailbox,
    guard: ReleaseGuard,
}

impl Admission {
    /// Register `connection_id` and join `user_{id}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backplane refuses the registration or the
    /// subscription. Nothing stays registered in that case.
    pub async fn new(
        connection_id: ConnectionId,
        user: AuthenticatedUser,
        services: &Services,
    ) -> Result<Self, SessionError> {
        let backplane = Arc::clone(&services.backplane);
        let mailbox = backplane.register(connection_id.as_str()).await?;
        let guard = ReleaseGuard {
            backplane: Arc::clone(&backplane),
            connection_id: connection_id.clone(),
            armed: true,
        };

        let personal = user_channel(user.id());
        backplane.subscribe(&personal, connection_id.as_str()).await?;
        metrics::record_subscription();
        debug!(connection = %connection_id, channel = %personal, "Joined channel");

        Ok(Self {
            connection_id,
            user,
            mailbox,
            guard,
        })
    }

    /// The id the transport connection must carry.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }
}

enum Inbound {
    Delivery(Arc<Message>),
    Released,
    Frame(Result<Option<ClientEnvelope>, TransportError>),
}

/// One live connection.
pub struct Session<C: Consumer> {
    ctx: SessionContext,
    consumer: C,
    mailbox: Option<Mailbox>,
    state: SessionState,
}

impl<C: Consumer> Session<C> {
    /// Bind a consumer and an accepted connection to an admission.
    #[must_use]
    pub fn new(
        conn: Box<dyn Connection>,
        admission: Admission,
        services: &Services,
        consumer: C,
    ) -> Self {
        let Admission {
            connection_id,
            user,
            mailbox,
            mut guard,
        } = admission;
        // From here on the session's own shutdown or `Drop` releases it.
        guard.disarm();

        if conn.id() != &connection_id {
            warn!(
                connection = %connection_id,
                transport = %conn.id(),
                "Transport id differs from admission"
            );
        }

        let ctx = SessionContext {
            connection_id,
            user,
            conn,
            backplane: Arc::clone(&services.backplane),
            gateway: Arc::clone(&services.gateway),
            closing: false,
        };
        Self {
            ctx,
            consumer,
            mailbox: Some(mailbox),
            state: SessionState::Connecting,
        }
    }

    /// Current lifecycle state.
    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the connection ends.
    pub async fn run(mut self) {
        let _metrics_guard = ConnectionMetricsGuard::new();
        debug!(
            connection = %self.ctx.connection_id,
            user = self.ctx.user.id(),
            username = self.ctx.user.username(),
            remote = ?self.ctx.conn.remote_addr(),
            "Session connecting"
        );

        match self.start().await {
            Ok(()) => {
                if let Some(mailbox) = self.mailbox.take() {
                    self.serve(mailbox).await;
                }
            }
            Err(e) => {
                warn!(connection = %self.ctx.connection_id, error = %e, "Session failed to start");
                metrics::record_error(e.kind());
                if e.is_recoverable() {
                    if let Err(e) = self.ctx.report_error(details::INTERNAL_ERROR, None).await {
                        debug!(connection = %self.ctx.connection_id, error = %e, "Failed to report start failure");
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Active;
        self.consumer.connect(&mut self.ctx).await
    }

    async fn serve(&mut self, mut mailbox: Mailbox) {
        while !self.ctx.is_closing() {
            // Unbiased, so steady group traffic cannot starve client commands.
            let inbound = tokio::select! {
                delivery = mailbox.recv() => match delivery {
                    Some(message) => Inbound::Delivery(message),
                    None => Inbound::Released,
                },
                frame = self.ctx.conn.recv() => Inbound::Frame(frame),
            };

            let outcome = match inbound {
                Inbound::Delivery(message) => self.ctx.deliver(&message).await,
                Inbound::Frame(Ok(Some(envelope))) => self.dispatch(envelope).await,
                Inbound::Frame(Ok(None)) => {
                    debug!(connection = %self.ctx.connection_id, "Client closed connection");
                    break;
                }
                Inbound::Frame(Err(e)) => {
                    warn!(connection = %self.ctx.connection_id, error = %e, "Dropping connection");
                    metrics::record_error("transport");
                    break;
                }
                Inbound::Released => {
                    debug!(connection = %self.ctx.connection_id, "Mailbox released");
                    break;
                }
            };

            if let Err(e) = outcome {
                warn!(connection = %self.ctx.connection_id, error = %e, "Session aborted");
                metrics::record_error(e.kind());
                break;
            }
        }
    }

    async fn dispatch(&mut self, envelope: ClientEnvelope) -> Result<(), SessionError> {
        let command = match <C::Command as Command>::parse(envelope) {
            Ok(command) => command,
            Err(CommandError::UnknownEvent(event)) => {
                debug!(connection = %self.ctx.connection_id, event = %event, "Unknown event");
                return self
                    .ctx
                    .report_error(details::UNKNOWN_EVENT, Some(event.as_str()))
                    .await;
            }
            Err(e) => {
                debug!(connection = %self.ctx.connection_id, error = %e, "Invalid payload");
                return self
                    .ctx
                    .report_error(details::INVALID_PAYLOAD, Some(e.event()))
                    .await;
            }
        };

        let event = command.event();
        let started = Instant::now();
        let result = self.consumer.handle(&mut self.ctx, command).await;
        metrics::record_command(event, started.elapsed().as_secs_f64());

        match result {
            Err(e) if e.is_recoverable() => {
                error!(connection = %self.ctx.connection_id, event, error = %e, "Command failed");
                metrics::record_error(e.kind());
                self.ctx
                    .report_error(details::INTERNAL_ERROR, Some(event))
                    .await
            }
            other => other,
        }
    }

    async fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.state == SessionState::Active {
            self.consumer.disconnect(&mut self.ctx).await;
        }
        self.ctx
            .backplane
            .release(self.ctx.connection_id.as_str())
            .await;
        self.state = SessionState::Closed;

        if let Err(e) = self.ctx.conn.close().await {
            debug!(connection = %self.ctx.connection_id, error = %e, "Close failed");
        }
        debug!(connection = %self.ctx.connection_id, "Session closed");
    }
}

impl<C: Consumer> Drop for Session<C> {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        // The task was cancelled before shutdown ran.
        drop(ReleaseGuard {
            backplane: Arc::clone(&self.ctx.backplane),
            connection_id: self.ctx.connection_id.clone(),
            armed: true,
        });
    }
}
