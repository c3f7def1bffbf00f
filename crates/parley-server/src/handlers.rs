//! HTTP routes and connection upgrade for the Parley server.
//!
//! Both WebSocket endpoints authenticate from the `?token=` query before
//! upgrading; a rejected request never gets a session.

use crate::auth::{Authenticator, PendingIdentity, TokenAuthenticator};
use crate::config::{Config, SeedUser};
use crate::metrics;
use crate::session::{Admission, Consumer, DirectoryConsumer, GroupConsumer, Services, Session};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{MemoryStore, Router as ChannelRouter, RouterConfig, Store};
use parley_protocol::GroupId;
use parley_transport::{ConnectionId, WebSocketConnection};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Store and backplane handles given to every session.
    pub services: Services,
    /// The in-process backplane, kept concrete for stats.
    pub router: Arc<ChannelRouter>,
    /// Resolves `?token=` to a user.
    pub authenticator: Arc<dyn Authenticator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with an in-memory store seeded from config.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router_config = RouterConfig {
            max_channels: config.limits.max_channels,
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
            mailbox_capacity: config.limits.mailbox_capacity,
            auto_delete_empty_channels: true,
        };
        let router = Arc::new(ChannelRouter::with_config(router_config));

        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_users(
            config.users.iter().map(SeedUser::user),
        ));
        let authenticator = Arc::new(TokenAuthenticator::new(
            config.users.iter().map(|u| (u.token.clone(), u.id)),
            Arc::clone(&store),
        ));

        Self {
            services: Services::new(store, router.clone()),
            router,
            authenticator,
            config,
        }
    }
}

/// Query parameters of a connection request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/chat/:group_id/", get(chat_handler))
        .route("/ws/groups/", get(directory_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);
    info!("Group chat endpoint: ws://{}/ws/chat/<group_id>/", addr);
    info!("Directory endpoint: ws://{}/ws/groups/", addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "channels": stats.channel_count,
    }))
}

/// Group chat upgrade handler.
async fn chat_handler(
    ws: WebSocketUpgrade,
    Path(group_id): Path<GroupId>,
    Query(params): Query<ConnectParams>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, params, remote, state, GroupConsumer::new(group_id)).await
}

/// Directory upgrade handler.
async fn directory_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, params, remote, state, DirectoryConsumer::new()).await
}

/// Authenticate, then hand the upgraded socket to a session.
async fn upgrade<C: Consumer>(
    ws: WebSocketUpgrade,
    params: ConnectParams,
    remote: SocketAddr,
    state: Arc<AppState>,
    consumer: C,
) -> Response {
    let pending = PendingIdentity::new(params.token);
    let user = match pending.resolve(&*state.authenticator).await {
        Ok(user) => user,
        Err(e) if e.is_rejection() => {
            warn!(%remote, error = %e, "Rejected connection");
            metrics::record_rejection("auth");
            return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": e.to_string() })))
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Authentication failed");
            metrics::record_error("auth");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Internal error" })),
            )
                .into_response();
        }
    };

    // Registered and subscribed to `user_{id}` before the upgrade is accepted.
    let admission = match Admission::new(ConnectionId::generate(), user, &state.services).await {
        Ok(admission) => admission,
        Err(e) => {
            error!(%remote, error = %e, "Admission failed");
            metrics::record_rejection("capacity");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "Server busy" })),
            )
                .into_response();
        }
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let id = admission.connection_id().clone();
            let conn = WebSocketConnection::new(socket, id, max_message_size)
                .with_remote_addr(remote.to_string());
            Session::new(Box::new(conn), admission, &state.services, consumer)
                .run()
                .await;
            metrics::set_active_channels(state.router.stats().channel_count);
        })
}
