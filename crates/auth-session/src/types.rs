//! Session and auth event types.

use chrono::{DateTime, Duration, Utc};
use profile_sync::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens are considered expired this long before their actual expiry.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// An authenticated session.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: Identity,
}

impl Session {
    /// True if the access token expires within the safety margin of `now`.
    /// Sessions without a known expiry never expire locally.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| exp <= now + Duration::seconds(EXPIRY_MARGIN_SECS))
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("user", &self.user.id)
            .finish()
    }
}

/// Token pair delivered in the redirect fragment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionTokens([redacted])")
    }
}

/// Options for starting an OAuth sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInOptions {
    /// Where the provider sends the browser back to.
    pub redirect_to: Option<String>,
    /// Extra provider scopes, space separated.
    pub scopes: Option<String>,
}

/// Kinds of session change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::InitialSession => "INITIAL_SESSION",
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::UserUpdated => "USER_UPDATED",
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session change notification: event kind plus the session after it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChangeEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthChangeEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }

    /// Identity carried by the event's session, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.user)
    }
}
