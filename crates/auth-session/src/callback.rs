//! OAuth redirect landing.
//!
//! The provider sends the browser back to `/auth/callback` with either an
//! error in the query string or a token pair in the fragment. Sometimes
//! neither is present because the session store picked the session up on
//! its own. Resolution tries, in order:
//!
//! 1. query `error` → failure with that code, the store is not contacted
//! 2. fragment `access_token` + `refresh_token` → install the session
//! 3. an existing session in the store
//! 4. a `SIGNED_IN` / `SIGNED_OUT` notification within the timeout
//!
//! The outcome maps to a redirect: `/dashboard` on success,
//! `/login?error=<code>` otherwise.

use crate::{AuthChangeEvent, AuthEventKind, Session, SessionStore, SessionTokens};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// How long to wait for a session notification.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

const DASHBOARD_PATH: &str = "/dashboard";
const LOGIN_PATH: &str = "/login";

/// Failure codes reported in the login redirect.
pub mod codes {
    pub const SESSION_FAILED: &str = "session_failed";
    pub const GET_SESSION_FAILED: &str = "get_session_failed";
    pub const SIGNED_OUT: &str = "signed_out";
    pub const TIMEOUT: &str = "timeout";
    pub const CANCELLED: &str = "cancelled";
    pub const CALLBACK_EXCEPTION: &str = "callback_exception";
}

/// Resolution progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    Parsing,
    TokenFound,
    SessionFound,
    Waiting,
    Done,
}

/// Why resolution failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Short machine-readable code (`access_denied`, `timeout`, ...).
    pub code: String,
    pub detail: Option<String>,
}

impl CallbackFailure {
    pub fn new(code: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            code: code.into(),
            detail,
        }
    }

    /// The request never reached resolution (malformed callback).
    pub fn exception(detail: impl Into<String>) -> Self {
        Self::new(codes::CALLBACK_EXCEPTION, Some(detail.into()))
    }
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.code, detail),
            None => f.write_str(&self.code),
        }
    }
}

/// Result of resolving a redirect landing.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Success(Session),
    Failure(CallbackFailure),
}

impl CallbackOutcome {
    fn failure(code: &str, detail: Option<String>) -> Self {
        CallbackOutcome::Failure(CallbackFailure::new(code, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallbackOutcome::Success(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            CallbackOutcome::Success(session) => Some(session),
            CallbackOutcome::Failure(_) => None,
        }
    }

    pub fn failure_code(&self) -> Option<&str> {
        match self {
            CallbackOutcome::Success(_) => None,
            CallbackOutcome::Failure(f) => Some(&f.code),
        }
    }

    /// Path to continue to.
    pub fn redirect_target(&self) -> String {
        match self {
            CallbackOutcome::Success(_) => DASHBOARD_PATH.to_string(),
            CallbackOutcome::Failure(f) => {
                let code: String = url::form_urlencoded::byte_serialize(f.code.as_bytes()).collect();
                format!("{}?error={}", LOGIN_PATH, code)
            }
        }
    }
}

/// Parameters carried by the redirect URL.
#[derive(Debug, Default)]
struct CallbackParams {
    error: Option<String>,
    error_description: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl CallbackParams {
    fn parse(url: &Url) -> Self {
        let mut params = CallbackParams::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "error" => params.error = non_empty(value.into_owned()),
                "error_description" => params.error_description = non_empty(value.into_owned()),
                _ => {}
            }
        }

        if let Some(fragment) = url.fragment() {
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
                match key.as_ref() {
                    "access_token" => params.access_token = non_empty(value.into_owned()),
                    "refresh_token" => params.refresh_token = non_empty(value.into_owned()),
                    _ => {}
                }
            }
        }

        params
    }

    /// Token pair, only when both halves are present.
    fn tokens(&self) -> Option<SessionTokens> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(SessionTokens {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            }),
            _ => None,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// One-shot resolver for a redirect landing.
pub struct CallbackResolver {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    phase: Mutex<CallbackPhase>,
}

impl CallbackResolver {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_timeout(store, DEFAULT_CALLBACK_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            phase: Mutex::new(CallbackPhase::Parsing),
        }
    }

    pub fn phase(&self) -> CallbackPhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: CallbackPhase) {
        debug!(phase = ?phase, "Callback resolution");
        *self.phase.lock() = phase;
    }

    /// Resolve `url`. Cancelling `cancel` abandons the attempt with failure
    /// `cancelled`, dropping any pending wait.
    pub async fn resolve(&self, url: &Url, cancel: CancellationToken) -> CallbackOutcome {
        let outcome = tokio::select! {
            outcome = self.run(url) => outcome,
            _ = cancel.cancelled() => CallbackOutcome::failure(codes::CANCELLED, None),
        };
        self.enter(CallbackPhase::Done);

        match &outcome {
            CallbackOutcome::Success(session) => {
                info!(user_id = %session.user.id, "OAuth callback resolved")
            }
            CallbackOutcome::Failure(failure) => {
                warn!(code = %failure.code, detail = ?failure.detail, "OAuth callback failed")
            }
        }
        outcome
    }

    async fn run(&self, url: &Url) -> CallbackOutcome {
        self.enter(CallbackPhase::Parsing);
        let params = CallbackParams::parse(url);

        if let Some(error) = params.error {
            return CallbackOutcome::failure(&error, params.error_description);
        }

        if let Some(tokens) = params.tokens() {
            self.enter(CallbackPhase::TokenFound);
            return match self.store.set_session(&tokens).await {
                Ok(session) => CallbackOutcome::Success(session),
                Err(e) => CallbackOutcome::failure(codes::SESSION_FAILED, Some(e.to_string())),
            };
        }
        if params.access_token.is_some() {
            debug!("Access token without refresh token, checking existing session");
        }

        match self.store.get_current_session().await {
            Ok(Some(session)) => {
                self.enter(CallbackPhase::SessionFound);
                return CallbackOutcome::Success(session);
            }
            Ok(None) => {}
            Err(e) => {
                return CallbackOutcome::failure(codes::GET_SESSION_FAILED, Some(e.to_string()))
            }
        }

        self.enter(CallbackPhase::Waiting);
        self.wait_for_session().await
    }

    async fn wait_for_session(&self) -> CallbackOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel::<CallbackOutcome>();
        let subscription = self.store.on_session_change(Arc::new(move |event: &AuthChangeEvent| {
            match (event.kind, &event.session) {
                (AuthEventKind::SignedIn, Some(session)) => {
                    let _ = tx.send(CallbackOutcome::Success(session.clone()));
                }
                (AuthEventKind::SignedOut, _) => {
                    let _ = tx.send(CallbackOutcome::failure(codes::SIGNED_OUT, None));
                }
                _ => {}
            }
        }));

        // A sign-in that landed between the lookup and the subscription
        let outcome = match self.store.get_current_session().await {
            Ok(Some(session)) => {
                self.enter(CallbackPhase::SessionFound);
                CallbackOutcome::Success(session)
            }
            _ => {
                tokio::select! {
                    Some(outcome) = rx.recv() => outcome,
                    _ = tokio::time::sleep(self.timeout) => {
                        CallbackOutcome::failure(codes::TIMEOUT, None)
                    }
                }
            }
        };

        subscription.cancel();
        outcome
    }
}
