use super::harness::{github_identity, session_for, wait_until, FakeSessionStore};
use crate::{
    AuthEventKind, AuthOptions, AuthSession, CallbackOutcome, CallbackPhase, CallbackResolver,
};
use profile_sync::{MemoryProfileStore, ProfileReconciler, ReconcileOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

const BARE: &str = "http://localhost:54321/auth/callback";

fn callback_url(suffix: &str) -> Url {
    Url::parse(&format!("{}{}", BARE, suffix)).unwrap()
}

/// Run a resolver in the background so the test can emit notifications
/// while it waits.
fn spawn_resolve(
    store: &Arc<FakeSessionStore>,
    cancel: CancellationToken,
) -> JoinHandle<CallbackOutcome> {
    let resolver = CallbackResolver::new(store.clone());
    let url = callback_url("");
    tokio::spawn(async move { resolver.resolve(&url, cancel).await })
}

// =============================================================================
// Query errors and fragment tokens
// =============================================================================

#[tokio::test]
async fn test_provider_error_skips_store() {
    let store = FakeSessionStore::new();
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver
        .resolve(
            &callback_url("?error=access_denied&error_description=User+cancelled"),
            CancellationToken::new(),
        )
        .await;

    let CallbackOutcome::Failure(failure) = &outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(failure.code, "access_denied");
    assert_eq!(failure.detail.as_deref(), Some("User cancelled"));
    assert_eq!(outcome.redirect_target(), "/login?error=access_denied");
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_fragment_tokens_install_session() {
    let store = FakeSessionStore::new();
    store.set_user(Some(github_identity(21, "octocat")));
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver
        .resolve(
            &callback_url("#access_token=at-1&refresh_token=rt-1&expires_in=3600"),
            CancellationToken::new(),
        )
        .await;

    let session = outcome.session().unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.refresh_token, "rt-1");
    assert_eq!(session.user.id, "auth-21");
    assert_eq!(outcome.redirect_target(), "/dashboard");
    assert_eq!(store.calls(), vec!["set_session"]);
    assert_eq!(resolver.phase(), CallbackPhase::Done);
}

#[tokio::test]
async fn test_rejected_tokens_fail_with_session_failed() {
    let store = FakeSessionStore::new();
    store.reject_set_session("invalid refresh token");
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver
        .resolve(
            &callback_url("#access_token=at&refresh_token=rt"),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.failure_code(), Some("session_failed"));
    assert_eq!(outcome.redirect_target(), "/login?error=session_failed");
}

// =============================================================================
// Existing session lookup
// =============================================================================

#[tokio::test]
async fn test_existing_session_succeeds() {
    let store = FakeSessionStore::new();
    store.set_current_session(Some(session_for(github_identity(22, "already"))));
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver.resolve(&callback_url(""), CancellationToken::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.session().map(|s| s.user.id.as_str()), Some("auth-22"));
    assert_eq!(store.calls(), vec!["get_current_session"]);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn test_lookup_error_fails_with_get_session_failed() {
    let store = FakeSessionStore::new();
    store.fail_get_current_session("storage unavailable");
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver.resolve(&callback_url(""), CancellationToken::new()).await;

    assert_eq!(outcome.failure_code(), Some("get_session_failed"));
}

#[tokio::test]
async fn test_access_token_without_refresh_token_uses_lookup() {
    let store = FakeSessionStore::new();
    store.set_current_session(Some(session_for(github_identity(23, "half"))));
    let resolver = CallbackResolver::new(store.clone());

    let outcome = resolver
        .resolve(&callback_url("#access_token=at-only"), CancellationToken::new())
        .await;

    assert!(outcome.is_success());
    assert!(!store.calls().contains(&"set_session"));
}

// =============================================================================
// Waiting for a notification
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_times_out_without_notification() {
    let store = FakeSessionStore::new();
    let resolver = CallbackResolver::new(store.clone());
    let started = Instant::now();

    let outcome = resolver.resolve(&callback_url(""), CancellationToken::new()).await;

    assert_eq!(outcome.failure_code(), Some("timeout"));
    assert_eq!(outcome.redirect_target(), "/login?error=timeout");
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(store.subscriber_count(), 0);
    assert_eq!(store.cancel_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_timeout() {
    let store = FakeSessionStore::new();
    let resolver = CallbackResolver::with_timeout(store.clone(), Duration::from_millis(250));
    let started = Instant::now();

    let outcome = resolver.resolve(&callback_url(""), CancellationToken::new()).await;

    assert_eq!(outcome.failure_code(), Some("timeout"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_signed_in_notification_resolves_wait() {
    let store = FakeSessionStore::new();
    let task = spawn_resolve(&store, CancellationToken::new());
    wait_until(|| store.subscriber_count() == 1).await;

    store.emit(
        AuthEventKind::TokenRefreshed,
        Some(session_for(github_identity(24, "ignored"))),
    );
    store.emit(AuthEventKind::SignedIn, None);
    store.emit(
        AuthEventKind::SignedIn,
        Some(session_for(github_identity(25, "arrived"))),
    );
    let outcome = task.await.unwrap();

    assert_eq!(outcome.session().map(|s| s.user.id.as_str()), Some("auth-25"));
    assert_eq!(store.subscriber_count(), 0);
    assert_eq!(store.cancel_count(), 1);
}

#[tokio::test]
async fn test_signed_out_notification_fails_wait() {
    let store = FakeSessionStore::new();
    let task = spawn_resolve(&store, CancellationToken::new());
    wait_until(|| store.subscriber_count() == 1).await;

    store.emit(AuthEventKind::SignedOut, None);
    let outcome = task.await.unwrap();

    assert_eq!(outcome.failure_code(), Some("signed_out"));
    assert_eq!(store.cancel_count(), 1);
}

#[tokio::test]
async fn test_cancellation_abandons_wait() {
    let store = FakeSessionStore::new();
    let cancel = CancellationToken::new();
    let task = spawn_resolve(&store, cancel.clone());
    wait_until(|| store.subscriber_count() == 1).await;

    cancel.cancel();
    let outcome = task.await.unwrap();

    assert_eq!(outcome.failure_code(), Some("cancelled"));
    assert_eq!(store.subscriber_count(), 0);
    assert_eq!(store.cancel_count(), 1);
}

// =============================================================================
// End to end with the auth session
// =============================================================================

#[tokio::test]
async fn test_callback_sign_in_reconciles_profile() {
    let store = FakeSessionStore::new();
    store.set_user(Some(github_identity(26, "newcomer")));

    let profiles = Arc::new(MemoryProfileStore::new());
    let reconciler = Arc::new(ProfileReconciler::new(profiles.clone()));
    let options = AuthOptions {
        reconcile_on_initial_load: false,
        ..AuthOptions::default()
    };
    let auth = Arc::new(AuthSession::new(store.clone(), options).with_reconciler(reconciler));
    auth.activate().await;

    let resolver = CallbackResolver::new(store.clone());
    let outcome = resolver
        .resolve(
            &callback_url("#access_token=at&refresh_token=rt"),
            CancellationToken::new(),
        )
        .await;
    assert!(outcome.is_success());

    let outcomes = auth.drain_reconciliations().await;
    assert!(matches!(outcomes.as_slice(), [ReconcileOutcome::Upserted(_)]));

    let rows = profiles.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].external_id, 26);
    assert_eq!(auth.identity().map(|i| i.id), Some("auth-26".to_string()));
}
