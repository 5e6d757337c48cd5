//! Profile reconciliation.
//!
//! Brings the profile row in line with the signed-in identity. Two entry
//! points share one outcome type:
//!
//! - [`ProfileReconciler::reconcile`] upserts on every sign-in, falling back to
//!   the privileged procedure when the table refuses the write
//! - [`ProfileReconciler::ensure_profile`] checks first and creates only when
//!   the row is missing (initial page load)
//!
//! Neither returns an error. Failures are logged and reported through
//! [`ReconcileOutcome`]; a broken profile write never affects sign-in state.

use crate::{
    derive_external_key, ExternalKey, Identity, KeyError, KeyPolicy, NewProfile, ProfileFilter,
    ProfileRecord, ProfileStore, StoreError, StoreResult,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) const DEFAULT_TABLE: &str = "users";
const DEFAULT_CONFLICT_KEY: &str = "external_id";
const DEFAULT_PROCEDURE: &str = "upsert_github_profile";

/// Where and how profile rows are written.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub table: String,
    /// Unique column used to resolve upsert conflicts.
    pub conflict_key: String,
    /// Procedure used when direct writes are denied.
    pub procedure: String,
    pub key_policy: KeyPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            conflict_key: DEFAULT_CONFLICT_KEY.to_string(),
            procedure: DEFAULT_PROCEDURE.to_string(),
            key_policy: KeyPolicy::default(),
        }
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Row written through the table upsert.
    Upserted(ProfileRecord),
    /// Row written by the privileged procedure. The procedure may not return
    /// the row.
    ViaProcedure(Option<ProfileRecord>),
    /// Missing row created by the check-then-create path.
    Created(ProfileRecord),
    /// Row already present; nothing written.
    Existing(ProfileRecord),
    /// Identity carried no usable external key.
    Skipped(KeyError),
    /// Store refused or failed; the reason is logged.
    Abandoned(String),
}

impl ReconcileOutcome {
    pub fn record(&self) -> Option<&ProfileRecord> {
        match self {
            ReconcileOutcome::Upserted(r)
            | ReconcileOutcome::Created(r)
            | ReconcileOutcome::Existing(r) => Some(r),
            ReconcileOutcome::ViaProcedure(r) => r.as_ref(),
            ReconcileOutcome::Skipped(_) | ReconcileOutcome::Abandoned(_) => None,
        }
    }

    /// True when a row for the identity is known to exist afterwards.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            ReconcileOutcome::Skipped(_) | ReconcileOutcome::Abandoned(_)
        )
    }
}

/// Keeps the profile row for an identity up to date.
pub struct ProfileReconciler {
    store: Arc<dyn ProfileStore>,
    config: ReconcilerConfig,
}

impl ProfileReconciler {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self::with_config(store, ReconcilerConfig::default())
    }

    pub fn with_config(store: Arc<dyn ProfileStore>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Upsert the row for `identity`, stamping `last_login`.
    ///
    /// A permission refusal retries through the privileged procedure once;
    /// any other failure abandons the attempt.
    pub async fn reconcile(&self, identity: &Identity) -> ReconcileOutcome {
        let key = match self.external_key(identity) {
            Ok(key) => key,
            Err(e) => return ReconcileOutcome::Skipped(e),
        };
        let profile = NewProfile::from_identity(identity, key, Utc::now());

        match self.upsert(&profile).await {
            Ok(record) => {
                info!(user_id = %identity.id, external_id = %key, "Profile reconciled");
                ReconcileOutcome::Upserted(record)
            }
            Err(StoreError::PermissionDenied(reason)) => {
                debug!(
                    external_id = %key,
                    reason = %reason,
                    "Direct profile write denied, using procedure"
                );
                self.via_procedure(&profile).await
            }
            Err(e) => self.abandon(key, "upsert", e),
        }
    }

    /// Create the row for `identity` if it does not exist yet.
    ///
    /// A concurrent writer may create the row between the check and the
    /// insert; the resulting conflict is resolved through the upsert path.
    pub async fn ensure_profile(&self, identity: &Identity) -> ReconcileOutcome {
        let key = match self.external_key(identity) {
            Ok(key) => key,
            Err(e) => return ReconcileOutcome::Skipped(e),
        };

        match self
            .store
            .select(&self.config.table, &ProfileFilter::ByExternalId(key.value()))
            .await
        {
            Ok(record) => {
                debug!(external_id = %key, "Profile already present");
                return ReconcileOutcome::Existing(record);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return self.abandon(key, "select", e),
        }

        let profile = NewProfile::from_identity(identity, key, Utc::now());
        match self.store.insert(&self.config.table, &profile).await {
            Ok(record) => {
                info!(user_id = %identity.id, external_id = %key, "Profile created");
                ReconcileOutcome::Created(record)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(external_id = %key, "Profile created concurrently, merging");
                self.reconcile(identity).await
            }
            Err(StoreError::PermissionDenied(_)) => self.via_procedure(&profile).await,
            Err(e) => self.abandon(key, "insert", e),
        }
    }

    /// Stored row for `identity`, if any.
    ///
    /// Looks up by external key, or by session user id when no key can be
    /// derived.
    pub async fn lookup(&self, identity: &Identity) -> StoreResult<Option<ProfileRecord>> {
        let filter = match self.external_key(identity) {
            Ok(key) => ProfileFilter::ByExternalId(key.value()),
            Err(_) => ProfileFilter::ByAuthUserId(identity.id.clone()),
        };

        match self.store.select(&self.config.table, &filter).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn external_key(&self, identity: &Identity) -> Result<ExternalKey, KeyError> {
        derive_external_key(&identity.user_metadata, &self.config.key_policy).map_err(|e| {
            warn!(user_id = %identity.id, error = %e, "Cannot derive profile key, skipping reconciliation");
            e
        })
    }

    async fn upsert(&self, profile: &NewProfile) -> StoreResult<ProfileRecord> {
        self.store
            .upsert(&self.config.table, profile, &self.config.conflict_key)
            .await
    }

    async fn via_procedure(&self, profile: &NewProfile) -> ReconcileOutcome {
        let key = ExternalKey::new(profile.external_id);
        let payload = serde_json::json!({ "profile": profile });

        match self.store.call_procedure(&self.config.procedure, &payload).await {
            Ok(value) => {
                info!(external_id = %key, procedure = %self.config.procedure, "Profile reconciled via procedure");
                ReconcileOutcome::ViaProcedure(record_from_value(value))
            }
            Err(e) => self.abandon(key, "procedure", e),
        }
    }

    fn abandon(&self, key: ExternalKey, step: &str, err: StoreError) -> ReconcileOutcome {
        warn!(
            external_id = %key,
            step,
            transient = err.is_transient(),
            error = %err,
            "Profile reconciliation abandoned"
        );
        ReconcileOutcome::Abandoned(format!("{}: {}", step, err))
    }
}

/// Procedures return either the row or a one-element array of it.
fn record_from_value(value: serde_json::Value) -> Option<ProfileRecord> {
    match value {
        serde_json::Value::Array(rows) => rows
            .into_iter()
            .next()
            .and_then(|row| serde_json::from_value(row).ok()),
        serde_json::Value::Null => None,
        row => serde_json::from_value(row).ok(),
    }
}
