//! Auth state machine for a session consumer.
//!
//! [`AuthSession`] turns the session store's asynchronous signals into one
//! observable value, [`AuthSnapshot`] `{identity, ready}`:
//!
//! - [`AuthSession::activate`] subscribes to session changes first, then
//!   looks the user up once. Lookup and notifications may settle in any
//!   order; whichever settles last decides `identity`, and `ready` becomes
//!   true on the first of them and stays true.
//! - A `SIGNED_IN` notification carrying a session spawns a profile
//!   reconciliation. The initial lookup runs the check-then-create path.
//! - [`AuthSession::teardown`] cancels the subscription exactly once.
//!
//! Lifecycle transitions go through the rust-fsm machine in
//! [`crate::auth_fsm`]; inputs the machine rejects (events after teardown,
//! repeated activation) are ignored.

use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::{
    AuthChangeEvent, AuthError, AuthEventKind, AuthResult, SessionCache, SessionListener,
    SessionStore, SignInOptions, Subscription,
};
use parking_lot::Mutex;
use profile_sync::{Identity, ProfileReconciler, ReconcileOutcome};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Observable auth state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    /// False until the first lookup or notification settles.
    pub ready: bool,
}

/// Sign-in and reconciliation settings.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// OAuth provider name.
    pub provider: String,
    /// Redirect target handed to the provider.
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
    /// Create the profile row when the initial lookup finds a user without one.
    pub reconcile_on_initial_load: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            provider: "github".to_string(),
            redirect_to: None,
            scopes: None,
            reconcile_on_initial_load: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    SignedIn,
    InitialLoad,
}

/// Session-derived auth state for one consumer.
pub struct AuthSession {
    store: Arc<dyn SessionStore>,
    reconciler: Option<Arc<ProfileReconciler>>,
    cache: Option<Arc<dyn SessionCache>>,
    options: AuthOptions,
    fsm: Mutex<SessionMachine>,
    state: watch::Sender<AuthSnapshot>,
    subscription: Mutex<Option<Subscription>>,
    runtime: Mutex<Option<Handle>>,
    tasks: Mutex<Vec<JoinHandle<ReconcileOutcome>>>,
}

impl AuthSession {
    pub fn new(store: Arc<dyn SessionStore>, options: AuthOptions) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self {
            store,
            reconciler: None,
            cache: None,
            options,
            fsm: Mutex::new(SessionMachine::new()),
            state,
            subscription: Mutex::new(None),
            runtime: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Reconcile the profile row on sign-in.
    pub fn with_reconciler(mut self, reconciler: Arc<ProfileReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Local session artifacts purged by [`AuthSession::sign_out`].
    pub fn with_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.fsm.lock().state())
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn ready(&self) -> bool {
        self.state.borrow().ready
    }

    /// Receiver that observes every snapshot change.
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionPhase> {
        let mut fsm = self.fsm.lock();
        let old = SessionPhase::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new = SessionPhase::from(fsm.state());
        if old != new {
            debug!(old_phase = ?old, new_phase = ?new, "Auth session transition");
        }
        Ok(new)
    }

    /// Start observing the session store.
    ///
    /// Only the first call does anything. Lookup failures are logged and
    /// leave `identity` empty; they never fail activation.
    pub async fn activate(self: &Arc<Self>) -> AuthSnapshot {
        if let Err(e) = self.transition(&SessionMachineInput::Activate) {
            debug!(error = %e, "Activation ignored");
            return self.snapshot();
        }
        *self.runtime.lock() = Handle::try_current().ok();

        let weak = Arc::downgrade(self);
        let listener: SessionListener = Arc::new(move |event: &AuthChangeEvent| {
            if let Some(session) = weak.upgrade() {
                session.handle_change(event);
            }
        });
        let subscription = self.store.on_session_change(listener);
        *self.subscription.lock() = Some(subscription);

        // Teardown may have run while subscribing
        if self.phase() == SessionPhase::Disposed {
            self.cancel_subscription();
            return self.snapshot();
        }

        let identity = match self.store.get_user().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Initial user lookup failed");
                None
            }
        };

        if let Err(e) = self.transition(&SessionMachineInput::LookupSettled) {
            debug!(error = %e, "Lookup result discarded");
            return self.snapshot();
        }

        self.state.send_modify(|s| {
            s.identity = identity.clone();
            s.ready = true;
        });
        info!(signed_in = identity.is_some(), "Auth session ready");

        if let Some(identity) = identity {
            if self.options.reconcile_on_initial_load {
                self.spawn_reconcile(Trigger::InitialLoad, identity);
            }
        }

        self.snapshot()
    }

    fn handle_change(&self, event: &AuthChangeEvent) {
        if let Err(e) = self.transition(&SessionMachineInput::ChangeObserved) {
            debug!(event = %event.kind, error = %e, "Session change ignored");
            return;
        }

        let identity = event.identity().cloned();
        debug!(event = %event.kind, has_session = event.session.is_some(), "Session change");
        self.state.send_modify(|s| {
            s.identity = identity.clone();
            s.ready = true;
        });

        if event.kind == AuthEventKind::SignedIn {
            if let Some(identity) = identity {
                self.spawn_reconcile(Trigger::SignedIn, identity);
            }
        }
    }

    fn spawn_reconcile(&self, trigger: Trigger, identity: Identity) {
        let Some(reconciler) = self.reconciler.clone() else {
            return;
        };
        let captured = self.runtime.lock().clone();
        let handle = match captured.or_else(|| Handle::try_current().ok()) {
            Some(handle) => handle,
            None => {
                warn!(user_id = %identity.id, "No runtime available, skipping profile reconciliation");
                return;
            }
        };

        debug!(user_id = %identity.id, trigger = ?trigger, "Scheduling profile reconciliation");
        let task = handle.spawn(async move {
            match trigger {
                Trigger::SignedIn => reconciler.reconcile(&identity).await,
                Trigger::InitialLoad => reconciler.ensure_profile(&identity).await,
            }
        });
        self.tasks.lock().push(task);
    }

    /// Wait for every reconciliation spawned so far, including ones spawned
    /// while waiting.
    pub async fn drain_reconciliations(&self) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let pending = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                return outcomes;
            }
            for task in pending {
                match task.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => warn!(error = %e, "Profile reconciliation task failed"),
                }
            }
        }
    }

    /// Start the OAuth sign-in. Failures are logged and returned.
    pub async fn sign_in(&self) -> AuthResult<()> {
        let options = SignInOptions {
            redirect_to: self.options.redirect_to.clone(),
            scopes: self.options.scopes.clone(),
        };

        self.store
            .sign_in_with_provider(&self.options.provider, &options)
            .await
            .map_err(|e| {
                error!(provider = %self.options.provider, error = %e, "Sign-in failed");
                e
            })
    }

    /// Sign out.
    ///
    /// Local state is cleared whatever the store answers: `identity` becomes
    /// empty and the session cache is purged. A store failure is returned
    /// afterwards.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let result = self.store.sign_out().await;

        self.state.send_modify(|s| s.identity = None);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.purge() {
                warn!(error = %e, "Failed to purge local session");
            }
        }

        match &result {
            Ok(()) => info!("Signed out"),
            Err(e) => error!(error = %e, "Sign-out failed remotely, local session cleared"),
        }
        result
    }

    /// Stop observing the session store. Safe to call repeatedly, before or
    /// without activation.
    pub fn teardown(&self) {
        if let Err(e) = self.transition(&SessionMachineInput::Dispose) {
            debug!(error = %e, "Teardown transition rejected");
        }
        self.cancel_subscription();
    }

    fn cancel_subscription(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            if subscription.cancel() {
                debug!("Session subscription cancelled");
            }
        }
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.cancel_subscription();
    }
}
