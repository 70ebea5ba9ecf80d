//! Authentication collaborator seam
//!
//! Authentication flows (signup, login, session issuance) live outside this
//! service. The broker only needs `IsAuthenticated(token) -> Option<UserId>`,
//! expressed here as the [`Authenticator`] trait. The production
//! implementation resolves opaque session tokens against the `sessions`
//! table that the external identity system writes.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Error raised when the authentication collaborator itself is unreachable
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("session lookup failed: {0}")]
    Lookup(String),
}

/// Resolves an opaque session token to an authenticated user id
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(None)` for unknown or expired tokens
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>, AuthError>;
}

/// Session-table backed authenticator
pub struct SessionAuthenticator {
    pool: PgPool,
}

impl SessionAuthenticator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>, AuthError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM sessions WHERE token = $1 AND expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Lookup(e.to_string()))
    }
}

/// Fixed token → user map for tests
#[cfg(test)]
pub struct StaticAuthenticator {
    tokens: std::collections::HashMap<String, Uuid>,
}

#[cfg(test)]
impl StaticAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, Uuid)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>, AuthError> {
        Ok(self.tokens.get(token).copied())
    }
}
