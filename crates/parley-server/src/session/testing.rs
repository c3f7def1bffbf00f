//! In-process session harness.
//!
//! Sessions run on spawned tasks over loopback connections, backed by a
//! `MemoryStore` seeded with `user1..userN` and a fresh `Router`.

use super::{Admission, Consumer, DirectoryConsumer, GroupConsumer, Services, Session};
use crate::auth::{AuthenticatedUser, PendingIdentity, TokenAuthenticator};
use parley_core::{MemoryStore, Router, User};
use parley_protocol::{GroupId, UserId};
use parley_transport::{memory, ConnectionId, MemoryClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(50);

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub router: Arc<Router>,
    pub services: Services,
    authenticator: TokenAuthenticator,
    next_connection: usize,
}

impl Harness {
    /// Three users, no groups.
    pub fn new() -> Self {
        Self::with_users(3)
    }

    pub fn with_users(count: UserId) -> Self {
        let users = (1..=count).map(|id| User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
        });
        let store = Arc::new(MemoryStore::with_users(users));
        let router = Arc::new(Router::new());
        let services = Services::new(store.clone(), router.clone());
        let authenticator = TokenAuthenticator::new(
            (1..=count).map(|id| (format!("token-{id}"), id)),
            store.clone(),
        );

        Self {
            store,
            router,
            services,
            authenticator,
            next_connection: 0,
        }
    }

    pub async fn user(&self, id: UserId) -> AuthenticatedUser {
        PendingIdentity::new(Some(format!("token-{id}")))
            .resolve(&self.authenticator)
            .await
            .expect("seeded user")
    }

    /// Start a session without waiting for it to connect.
    pub async fn open<C: Consumer>(&mut self, user_id: UserId, consumer: C) -> TestClient {
        let user = self.user(user_id).await;
        self.open_as(user, consumer).await
    }

    /// Admit an already resolved user and start a session for it.
    pub async fn open_as<C: Consumer>(
        &mut self,
        user: AuthenticatedUser,
        consumer: C,
    ) -> TestClient {
        let admission = self.admit(user).await;
        let id = admission.connection_id().clone();
        let (conn, client) = memory::pair(id.clone());

        let session = Session::new(Box::new(conn), admission, &self.services, consumer);
        let task = tokio::spawn(session.run());
        TestClient { id, client, task }
    }

    /// Register a fresh connection id for `user` on the backplane.
    pub async fn admit(&mut self, user: AuthenticatedUser) -> Admission {
        self.next_connection += 1;
        let id = ConnectionId::from(format!("conn-{}", self.next_connection));
        Admission::new(id, user, &self.services)
            .await
            .expect("admission refused")
    }

    /// Join a group and wait until the session is serving.
    pub async fn group(&mut self, user_id: UserId, group_id: GroupId) -> TestClient {
        let mut client = self.open(user_id, GroupConsumer::new(group_id)).await;
        let reply = client.request("list.messages", json!({})).await;
        assert_eq!(reply["event"], "list.messages", "group session not ready: {reply}");
        client
    }

    /// Open the directory and wait until the session is serving.
    pub async fn directory(&mut self, user_id: UserId) -> TestClient {
        let mut client = self.open(user_id, DirectoryConsumer::new()).await;
        let reply = client.request("group.list", json!({})).await;
        assert_eq!(reply["event"], "group.list", "directory session not ready: {reply}");
        client
    }
}

pub(crate) struct TestClient {
    pub id: ConnectionId,
    client: MemoryClient,
    task: JoinHandle<()>,
}

impl TestClient {
    pub fn send(&self, event: &str, data: Value) {
        assert!(self.client.send_event(event, data), "connection closed");
    }

    pub fn send_raw(&self, text: &str) {
        assert!(self.client.send_text(text), "connection closed");
    }

    pub async fn next(&mut self) -> Value {
        timeout(WAIT, self.client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    pub async fn request(&mut self, event: &str, data: Value) -> Value {
        self.send(event, data);
        self.next().await
    }

    pub async fn expect_silence(&mut self) {
        if let Ok(frame) = timeout(QUIET, self.client.recv()).await {
            panic!("unexpected frame: {frame:?}");
        }
    }

    pub async fn expect_closed(&mut self) {
        let frame = timeout(WAIT, self.client.recv())
            .await
            .expect("timed out waiting for close");
        assert!(frame.is_none(), "expected close, got {frame:?}");
    }

    /// Wait for the session task to end on its own.
    pub async fn finished(self) {
        timeout(WAIT, self.task)
            .await
            .expect("session did not finish")
            .expect("session panicked");
    }

    /// Close from the client side and wait for cleanup.
    pub async fn disconnect(mut self) {
        self.client.close();
        self.finished().await;
    }

    /// Cancel the session task without a close.
    pub async fn abort(self) {
        self.task.abort();
        let result = self.task.await;
        assert!(result.is_err_and(|e| e.is_cancelled()));
    }
}
