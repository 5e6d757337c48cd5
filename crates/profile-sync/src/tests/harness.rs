//! Test harness for reconciler tests.

use crate::{
    Identity, MemoryProfileStore, NewProfile, ProfileFilter, ProfileReconciler, ProfileRecord,
    ProfileStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const TABLE: &str = "users";

/// Store operation a failure can be scheduled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Upsert,
    Select,
    Insert,
    Procedure,
}

/// Wraps [`MemoryProfileStore`] and fails scheduled operations.
pub struct ScriptedStore {
    pub inner: MemoryProfileStore,
    failures: Mutex<VecDeque<(Op, StoreError)>>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryProfileStore::new(),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: Op, err: StoreError) {
        self.failures.lock().push_back((op, err));
    }

    fn take_failure(&self, op: Op) -> StoreResult<()> {
        let mut failures = self.failures.lock();
        match failures.iter().position(|(o, _)| *o == op) {
            Some(idx) => match failures.remove(idx) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    pub fn rows(&self) -> Vec<ProfileRecord> {
        self.inner.rows(TABLE)
    }

    pub fn operations(&self) -> Vec<String> {
        self.inner.operations()
    }
}

#[async_trait]
impl ProfileStore for ScriptedStore {
    async fn upsert(
        &self,
        table: &str,
        profile: &NewProfile,
        conflict_key: &str,
    ) -> StoreResult<ProfileRecord> {
        self.take_failure(Op::Upsert)?;
        self.inner.upsert(table, profile, conflict_key).await
    }

    async fn select(&self, table: &str, filter: &ProfileFilter) -> StoreResult<ProfileRecord> {
        self.take_failure(Op::Select)?;
        self.inner.select(table, filter).await
    }

    async fn insert(&self, table: &str, profile: &NewProfile) -> StoreResult<ProfileRecord> {
        self.take_failure(Op::Insert)?;
        self.inner.insert(table, profile).await
    }

    async fn call_procedure(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        self.take_failure(Op::Procedure)?;
        self.inner.call_procedure(name, payload).await
    }
}

/// GitHub identity with a numeric provider id.
pub fn github_identity(provider_id: i64, login: &str) -> Identity {
    Identity::new(format!("auth-{}", provider_id))
        .with_email(format!("{}@example.com", login))
        .with_metadata("provider_id", provider_id.to_string())
        .with_metadata("user_name", login)
        .with_metadata("avatar_url", format!("https://avatars.example.com/{}", login))
        .with_metadata("full_name", "Test User")
        .with_metadata("public_repos", 3)
}

pub fn reconciler(store: &Arc<ScriptedStore>) -> ProfileReconciler {
    ProfileReconciler::new(store.clone())
}
