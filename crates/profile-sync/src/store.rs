//! Profile store capability.

use crate::{NewProfile, ProfileFilter, ProfileRecord, StoreResult};
use async_trait::async_trait;

/// Table and procedure access needed by the reconciler.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert or merge `profile`, resolving duplicates on `conflict_key`.
    async fn upsert(
        &self,
        table: &str,
        profile: &NewProfile,
        conflict_key: &str,
    ) -> StoreResult<ProfileRecord>;

    /// Fetch exactly one row. `StoreError::NotFound` when none matches.
    async fn select(&self, table: &str, filter: &ProfileFilter) -> StoreResult<ProfileRecord>;

    /// Plain insert. `StoreError::Conflict` if the key is taken.
    async fn insert(&self, table: &str, profile: &NewProfile) -> StoreResult<ProfileRecord>;

    /// Invoke a privileged stored procedure.
    async fn call_procedure(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<serde_json::Value>;
}

/// Supplies the bearer token for authenticated requests.
#[async_trait]
pub trait BearerSource: Send + Sync {
    /// Current access token, or `None` when signed out.
    async fn bearer_token(&self) -> Option<String>;
}
