//! In-process session store for callback server tests.

use async_trait::async_trait;
use auth_session::{
    AuthChangeEvent, AuthResult, Identity, ListenerRegistry, Session, SessionListener,
    SessionStore, SessionTokens, SignInOptions, Subscription,
};
use std::sync::Mutex;

/// Accepts any token pair and never finds an existing session.
#[derive(Default)]
pub struct StaticSessionStore {
    registry: ListenerRegistry,
    current: Mutex<Option<Session>>,
}

#[async_trait]
impl SessionStore for StaticSessionStore {
    async fn get_current_session(&self) -> AuthResult<Option<Session>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn get_user(&self) -> AuthResult<Option<Identity>> {
        Ok(self.current.lock().unwrap().as_ref().map(|s| s.user.clone()))
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        self.registry.subscribe(listener)
    }

    async fn sign_in_with_provider(&self, _provider: &str, _options: &SignInOptions) -> AuthResult<()> {
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        *self.current.lock().unwrap() = None;
        self.registry.emit(&AuthChangeEvent::signed_out());
        Ok(())
    }

    async fn set_session(&self, tokens: &SessionTokens) -> AuthResult<Session> {
        let session = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: None,
            token_type: Some("bearer".to_string()),
            user: Identity::new("auth-1")
                .with_metadata("provider_id", "1")
                .with_metadata("user_name", "octocat"),
        };
        *self.current.lock().unwrap() = Some(session.clone());
        self.registry.emit(&AuthChangeEvent::signed_in(session.clone()));
        Ok(session)
    }
}
