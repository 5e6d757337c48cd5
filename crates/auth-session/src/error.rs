//! Errors raised by session stores, caches and the auth state machine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The provider redirect could not be started or the server refused it.
    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// The server no longer accepts the session (revoked, expired refresh token).
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Session cache error: {0}")]
    Cache(String),

    /// The auth server did not answer in time.
    #[error("Auth server timed out")]
    Timeout,

    /// The auth server could not be reached.
    #[error("Auth server unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Classify a failed request send. Connection and timeout failures are
    /// kept apart from other transport errors so callers can retry them.
    pub(crate) fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout
        } else if err.is_connect() {
            AuthError::NetworkUnavailable(err.to_string())
        } else {
            AuthError::Http(err)
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Timeout | AuthError::NetworkUnavailable(_))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
