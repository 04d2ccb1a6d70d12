//! Bearer-token acquisition seam.
//!
//! The identity provider (sign-in state, token issuance) lives outside this
//! crate. The session core only needs a fresh bearer token at every connect
//! attempt; tokens are never cached across reconnects because they expire.

/// Errors that can occur while resolving a bearer token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The identity provider has no signed-in user.
    #[error("no signed-in user")]
    NotSignedIn,

    /// Token resolution failed (provider unreachable, refresh rejected, ...).
    #[error("token resolution failed: {0}")]
    TokenUnavailable(String),
}

/// Supplies a fresh bearer token for each connection attempt.
///
/// The connection manager calls this exactly once per attempt, before the
/// WebSocket handshake. A failure here is terminal for the attempt: it is
/// surfaced as an auth failure and triggers no automatic retry.
pub trait TokenProvider: Send + Sync {
    /// Resolve a bearer token for the current user.
    fn bearer_token(&self) -> impl std::future::Future<Output = Result<String, AuthError>> + Send;
}

/// A fixed token, for development tooling and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a pre-issued token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}
