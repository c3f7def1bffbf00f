//! Connection authentication.
//!
//! Identity is resolved in two phases. The upgrade handler only holds a
//! `PendingIdentity`; a session needs an `AuthenticatedUser`, and the only
//! way to obtain one is to await `PendingIdentity::resolve`.

use async_trait::async_trait;
use parley_core::{Store, StoreError, User};
use parley_protocol::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Missing token")]
    MissingToken,

    /// The token is not known.
    #[error("Invalid token")]
    InvalidToken,

    /// The token maps to a user the store does not have.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// The store could not be queried.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Whether the failure is the client's fault rather than the server's.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AuthError::Store(_))
    }
}

/// Maps credentials to users.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to a user.
    async fn authenticate(&self, token: &str) -> Result<User, AuthError>;
}

/// Static token table backed by the store.
pub struct TokenAuthenticator {
    tokens: HashMap<String, UserId>,
    store: Arc<dyn Store>,
}

impl TokenAuthenticator {
    /// Create an authenticator from `(token, user id)` pairs.
    #[must_use]
    pub fn new(
        tokens: impl IntoIterator<Item = (String, UserId)>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            store,
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let user_id = *self.tokens.get(token).ok_or(AuthError::InvalidToken)?;
        self.store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::UnknownUser(user_id))
    }
}

/// Credentials captured from the upgrade request, not yet checked.
#[derive(Debug, Clone, Default)]
pub struct PendingIdentity {
    token: Option<String>,
}

impl PendingIdentity {
    /// Capture a token.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Check the credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if no token was given, the token is unknown, or the
    /// user cannot be loaded.
    pub async fn resolve(
        self,
        authenticator: &dyn Authenticator,
    ) -> Result<AuthenticatedUser, AuthError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let user = authenticator.authenticate(&token).await?;
        Ok(AuthenticatedUser { user })
    }
}

/// A user whose credentials were checked.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    user: User,
}

impl AuthenticatedUser {
    /// User id.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.user.id
    }

    /// Display name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.user.username
    }
}
