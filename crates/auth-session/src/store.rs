//! Session store capability.

use crate::{AuthResult, Session, SessionListener, SessionTokens, SignInOptions, Subscription};
use async_trait::async_trait;
use profile_sync::Identity;

/// Holder of the canonical session.
///
/// The hosted auth service implements this in production; tests substitute
/// scripted fakes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The current session, refreshed if it has expired. `None` when signed out.
    async fn get_current_session(&self) -> AuthResult<Option<Session>>;

    /// The current user as verified by the backend. `None` when signed out.
    async fn get_user(&self) -> AuthResult<Option<Identity>>;

    /// Register a listener for session changes.
    fn on_session_change(&self, listener: SessionListener) -> Subscription;

    /// Start an OAuth sign-in with `provider`. Completion arrives later as a
    /// `SIGNED_IN` notification or through the redirect landing.
    async fn sign_in_with_provider(&self, provider: &str, options: &SignInOptions)
        -> AuthResult<()>;

    async fn sign_out(&self) -> AuthResult<()>;

    /// Install a session from a token pair.
    async fn set_session(&self, tokens: &SessionTokens) -> AuthResult<Session>;
}
