//! Supabase (GoTrue) session store.
//!
//! Endpoints used:
//! - `GET  /auth/v1/user` to validate an access token and fetch the user
//! - `POST /auth/v1/token?grant_type=refresh_token` when the session expired
//! - `POST /auth/v1/logout`
//! - `GET  /auth/v1/authorize` (built here, opened by the redirect handler)
//!
//! The session is mirrored to a [`SessionCache`] so it survives restarts.

use crate::{
    AuthChangeEvent, AuthError, AuthEventKind, AuthResult, ListenerRegistry, Session,
    SessionCache, SessionListener, SessionStore, SessionTokens, SignInOptions, Subscription,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use profile_sync::{BearerSource, Identity};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Receives the provider authorization URL when a sign-in starts.
pub type RedirectHandler = Box<dyn Fn(&Url) -> AuthResult<()> + Send + Sync>;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Expiry encoded in a JWT's `exp` claim. The signature is not checked.
pub(crate) fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// Session store backed by Supabase Auth.
pub struct SupabaseSessionStore {
    http_client: Client,
    supabase_url: String,
    anon_key: String,
    cache: Arc<dyn SessionCache>,
    session: Mutex<Option<Session>>,
    listeners: ListenerRegistry,
    redirect_handler: RedirectHandler,
    /// Serializes refreshes so one expired session is refreshed once.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SupabaseSessionStore {
    /// Create a store, restoring any session found in `cache`.
    pub fn new(
        supabase_url: &str,
        anon_key: &str,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let restored = match cache.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached session");
                None
            }
        };
        if let Some(session) = &restored {
            debug!(user_id = %session.user.id, "Restored cached session");
        }

        Self {
            http_client: Client::new(),
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            cache,
            session: Mutex::new(restored),
            listeners: ListenerRegistry::new(),
            redirect_handler: Box::new(|url: &Url| {
                info!(url = %url, "Open the authorization URL to continue sign-in");
                Ok(())
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace what happens with the authorization URL (print it, open a
    /// browser, ...).
    pub fn with_redirect_handler(mut self, handler: RedirectHandler) -> Self {
        self.redirect_handler = handler;
        self
    }

    /// Build the provider authorization URL.
    pub fn authorize_url(&self, provider: &str, options: &SignInOptions) -> AuthResult<Url> {
        let mut url = Url::parse(&format!("{}/auth/v1/authorize", self.supabase_url))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect_to) = &options.redirect_to {
                query.append_pair("redirect_to", redirect_to);
            }
            if let Some(scopes) = &options.scopes {
                query.append_pair("scopes", scopes);
            }
        }
        Ok(url)
    }

    fn current(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    fn install(&self, session: Session, kind: AuthEventKind) {
        *self.session.lock() = Some(session.clone());
        if let Err(e) = self.cache.store(&session) {
            warn!(error = %e, "Failed to cache session");
        }
        debug!(user_id = %session.user.id, event = %kind, "Session installed");
        self.listeners.emit(&AuthChangeEvent::new(kind, Some(session)));
    }

    fn clear_local(&self) {
        *self.session.lock() = None;
        if let Err(e) = self.cache.purge() {
            warn!(error = %e, "Failed to purge cached session");
        }
    }

    /// Verify `access_token` with the server and return its user.
    async fn fetch_user(&self, access_token: &str) -> AuthResult<Identity> {
        let user_url = format!("{}/auth/v1/user", self.supabase_url);

        debug!(url = %user_url, "Fetching user from Supabase");

        let response = self
            .http_client
            .get(&user_url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(AuthError::from_send)?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Server rejected access token");
            return Err(AuthError::SessionInvalid(format!(
                "Server rejected session: HTTP {}",
                status
            )));
        }

        Ok(response.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<Session> {
        let refresh_url = format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            self.supabase_url
        );

        debug!(url = %refresh_url, "Refreshing token");

        let response = self
            .http_client
            .post(&refresh_url)
            .header("apikey", &self.anon_key)
            .header("Content-Type", "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(AuthError::from_send)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::SessionInvalid(format!(
                "Refresh token rejected: HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            warn!(status = %status, "Token refresh failed");
            return Err(AuthError::TokenRefresh(format!("HTTP {}", status)));
        }

        let data: TokenResponse = response.json().await?;
        let expires_at = data
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| data.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)))
            .or_else(|| jwt_expiry(&data.access_token));

        info!(user_id = %data.user.id, "Token refreshed successfully");

        Ok(Session {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at,
            token_type: data.token_type,
            user: data.user,
        })
    }

    async fn logout_remote(&self, access_token: &str) -> AuthResult<()> {
        let logout_url = format!("{}/auth/v1/logout", self.supabase_url);

        let response = self
            .http_client
            .post(&logout_url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(AuthError::from_send)?;

        let status = response.status();
        // Already gone server-side
        if status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(AuthError::OAuth(format!("Sign-out failed: HTTP {}", status)))
    }
}

#[async_trait]
impl SessionStore for SupabaseSessionStore {
    async fn get_current_session(&self) -> AuthResult<Option<Session>> {
        match self.current() {
            None => return Ok(None),
            Some(session) if !session.is_expired() => return Ok(Some(session)),
            Some(_) => {}
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        let session = match self.current() {
            None => return Ok(None),
            Some(session) if !session.is_expired() => return Ok(Some(session)),
            Some(session) => session,
        };

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.install(fresh.clone(), AuthEventKind::TokenRefreshed);
                Ok(Some(fresh))
            }
            Err(AuthError::SessionInvalid(reason)) => {
                warn!(reason = %reason, "Session can no longer be refreshed, signing out locally");
                self.clear_local();
                self.listeners.emit(&AuthChangeEvent::signed_out());
                Err(AuthError::SessionInvalid(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self) -> AuthResult<Option<Identity>> {
        let Some(session) = self.get_current_session().await? else {
            return Ok(None);
        };

        let user = self.fetch_user(&session.access_token).await?;
        if user != session.user {
            let mut guard = self.session.lock();
            if let Some(current) = guard.as_mut() {
                current.user = user.clone();
                if let Err(e) = self.cache.store(current) {
                    warn!(error = %e, "Failed to cache session");
                }
            }
        }
        Ok(Some(user))
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn sign_in_with_provider(
        &self,
        provider: &str,
        options: &SignInOptions,
    ) -> AuthResult<()> {
        let url = self.authorize_url(provider, options)?;
        info!(provider, "Starting OAuth sign-in");
        (self.redirect_handler)(&url)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let remote = match self.current() {
            Some(session) => self.logout_remote(&session.access_token).await,
            None => Ok(()),
        };

        self.clear_local();
        self.listeners.emit(&AuthChangeEvent::signed_out());
        info!("Signed out");
        remote
    }

    async fn set_session(&self, tokens: &SessionTokens) -> AuthResult<Session> {
        let expires_at = jwt_expiry(&tokens.access_token);
        let expired = expires_at.is_some_and(|exp| exp <= Utc::now());

        let session = if expired {
            debug!("Delivered access token already expired, refreshing");
            self.refresh(&tokens.refresh_token).await?
        } else {
            let user = self.fetch_user(&tokens.access_token).await?;
            Session {
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                expires_at,
                token_type: Some("bearer".to_string()),
                user,
            }
        };

        info!(user_id = %session.user.id, "Session established");
        self.install(session.clone(), AuthEventKind::SignedIn);
        Ok(session)
    }
}

#[async_trait]
impl BearerSource for SupabaseSessionStore {
    async fn bearer_token(&self) -> Option<String> {
        match self.get_current_session().await {
            Ok(session) => session.map(|s| s.access_token),
            Err(e) => {
                debug!(error = %e, "No bearer token available");
                None
            }
        }
    }
}
