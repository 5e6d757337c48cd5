//! In-process profile store.
//!
//! Behaves like the hosted table: one row per `external_id` (unique index),
//! upsert merges, and the `upsert_github_profile` procedure performs the same
//! upsert with elevated rights. Each operation yields to the scheduler once
//! before touching state so concurrent callers interleave the way network
//! round-trips would.

use crate::{NewProfile, ProfileFilter, ProfileRecord, ProfileStore, RowId, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

const UNIQUE_COLUMN: &str = "external_id";
const PRIVILEGED_UPSERT: &str = "upsert_github_profile";

#[derive(Default)]
struct State {
    /// table -> external_id -> row
    tables: HashMap<String, BTreeMap<i64, ProfileRecord>>,
    next_id: i64,
    operations: Vec<String>,
}

impl State {
    fn upsert(&mut self, table: &str, profile: &NewProfile) -> ProfileRecord {
        let now = Utc::now();
        let next_id = &mut self.next_id;
        let rows = self.tables.entry(table.to_string()).or_default();

        let record = rows
            .entry(profile.external_id)
            .and_modify(|row| row.merge(profile))
            .or_insert_with(|| {
                *next_id += 1;
                ProfileRecord::created(RowId::Int(*next_id), profile, now)
            });
        record.clone()
    }
}

/// Profile store kept in memory.
#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<State>,
    deny_direct_writes: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject table writes with `PermissionDenied`, as row-level security
    /// does for roles without insert rights. Procedures are unaffected.
    pub fn deny_direct_writes(&self, deny: bool) {
        self.deny_direct_writes.store(deny, Ordering::SeqCst);
    }

    /// All rows of `table`, ordered by external id.
    pub fn rows(&self, table: &str) -> Vec<ProfileRecord> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Operations performed so far, e.g. `upsert:users` or `rpc:<name>`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }

    /// Place a row directly, bypassing write checks.
    pub fn seed(&self, table: &str, profile: &NewProfile) -> ProfileRecord {
        self.state.lock().upsert(table, profile)
    }

    fn check_writes(&self) -> StoreResult<()> {
        if self.deny_direct_writes.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(
                "new row violates row-level security policy".to_string(),
            ));
        }
        Ok(())
    }

    fn record(state: &mut State, op: &str, target: &str) {
        state.operations.push(format!("{}:{}", op, target));
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn upsert(
        &self,
        table: &str,
        profile: &NewProfile,
        conflict_key: &str,
    ) -> StoreResult<ProfileRecord> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        Self::record(&mut state, "upsert", table);
        self.check_writes()?;

        if conflict_key != UNIQUE_COLUMN {
            return Err(StoreError::Rejected {
                status: 400,
                message: format!(
                    "there is no unique or exclusion constraint matching {}",
                    conflict_key
                ),
            });
        }

        Ok(state.upsert(table, profile))
    }

    async fn select(&self, table: &str, filter: &ProfileFilter) -> StoreResult<ProfileRecord> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        Self::record(&mut state, "select", table);

        state
            .tables
            .get(table)
            .and_then(|rows| rows.values().find(|row| filter.matches(row)))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert(&self, table: &str, profile: &NewProfile) -> StoreResult<ProfileRecord> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        Self::record(&mut state, "insert", table);
        self.check_writes()?;

        let exists = state
            .tables
            .get(table)
            .is_some_and(|rows| rows.contains_key(&profile.external_id));
        if exists {
            return Err(StoreError::Conflict(format!(
                "duplicate key value violates unique constraint on {}",
                UNIQUE_COLUMN
            )));
        }

        Ok(state.upsert(table, profile))
    }

    async fn call_procedure(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        Self::record(&mut state, "rpc", name);

        if name != PRIVILEGED_UPSERT {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("Could not find the function public.{}", name),
            });
        }

        let profile: NewProfile = serde_json::from_value(
            payload.get("profile").cloned().unwrap_or_default(),
        )?;
        let record = state.upsert(crate::reconciler::DEFAULT_TABLE, &profile);
        Ok(serde_json::to_value(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExternalKey, Identity};
    use chrono::{DateTime, Duration};

    fn profile(key: i64, login: DateTime<Utc>) -> NewProfile {
        let identity = Identity::new(format!("auth-{key}")).with_metadata("user_name", "octocat");
        NewProfile::from_identity(&identity, ExternalKey::new(key), login)
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        let store = MemoryProfileStore::new();
        let now = Utc::now();

        let first = store.upsert("users", &profile(1, now), "external_id").await.unwrap();
        let second = store
            .upsert("users", &profile(1, now + Duration::seconds(5)), "external_id")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.rows("users").len(), 1);
    }

    #[tokio::test]
    async fn test_last_login_never_decreases() {
        let store = MemoryProfileStore::new();
        let now = Utc::now();

        store.upsert("users", &profile(1, now), "external_id").await.unwrap();
        let stale = store
            .upsert("users", &profile(1, now - Duration::minutes(10)), "external_id")
            .await
            .unwrap();

        assert_eq!(stale.last_login, Some(now));
    }

    #[tokio::test]
    async fn test_insert_existing_key_conflicts() {
        let store = MemoryProfileStore::new();
        let now = Utc::now();

        store.insert("users", &profile(1, now)).await.unwrap();
        let err = store.insert("users", &profile(1, now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_select_not_found() {
        let store = MemoryProfileStore::new();
        let err = store
            .select("users", &ProfileFilter::ByExternalId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_select_by_auth_user_id() {
        let store = MemoryProfileStore::new();
        store.seed("users", &profile(4, Utc::now()));

        let found = store
            .select("users", &ProfileFilter::ByAuthUserId("auth-4".into()))
            .await
            .unwrap();
        assert_eq!(found.external_id, 4);
    }

    #[tokio::test]
    async fn test_denied_writes_still_allow_procedure() {
        let store = MemoryProfileStore::new();
        store.deny_direct_writes(true);
        let payload = profile(2, Utc::now());

        let err = store.upsert("users", &payload, "external_id").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        let value = store
            .call_procedure(
                "upsert_github_profile",
                &serde_json::json!({ "profile": payload }),
            )
            .await
            .unwrap();
        assert_eq!(value["external_id"], 2);
        assert_eq!(store.rows("users").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_procedure_is_rejected() {
        let store = MemoryProfileStore::new();
        let err = store
            .call_procedure("missing_fn", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_unknown_conflict_key_is_rejected() {
        let store = MemoryProfileStore::new();
        let err = store
            .upsert("users", &profile(1, Utc::now()), "username")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }
}
