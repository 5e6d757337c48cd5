//! PostgREST-backed profile store.
//!
//! Talks to `<supabase>/rest/v1`. Requests carry the public `apikey` plus a
//! bearer from the configured [`BearerSource`]; without a signed-in session
//! the public key doubles as the bearer and row-level security decides.

use crate::{
    BearerSource, NewProfile, ProfileFilter, ProfileRecord, ProfileStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, error};

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Supabase REST client for the profile table.
#[derive(Clone)]
pub struct SupabaseProfileStore {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    bearer: Option<Arc<dyn BearerSource>>,
}

impl SupabaseProfileStore {
    /// Create a store.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase public API key
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            bearer: None,
        }
    }

    /// Authenticate requests as the signed-in user.
    pub fn with_bearer(mut self, bearer: Arc<dyn BearerSource>) -> Self {
        self.bearer = Some(bearer);
        self
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.api_url, name)
    }

    async fn authorization(&self) -> String {
        let token = match &self.bearer {
            Some(source) => source.bearer_token().await,
            None => None,
        };
        format!("Bearer {}", token.as_deref().unwrap_or(&self.anon_key))
    }

    async fn send(&self, request: reqwest::RequestBuilder, op: &str) -> StoreResult<String> {
        let response = request
            .header("apikey", &self.anon_key)
            .header("Authorization", self.authorization().await)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(StoreError::from_send)?;

        let status = response.status();
        let body = response.text().await.map_err(StoreError::from_send)?;

        if !status.is_success() {
            let body_summary = summarize_response_body(&body);
            let err = StoreError::from_response(status.as_u16(), &body);
            if matches!(err, StoreError::NotFound) {
                debug!(op, "No matching profile row");
            } else {
                error!(op, status = %status, body_summary = %body_summary, error = %err, "Profile store request failed");
            }
            return Err(err);
        }

        Ok(body)
    }

    fn first_row(body: &str) -> StoreResult<ProfileRecord> {
        let rows: Vec<ProfileRecord> = serde_json::from_str(body)?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn upsert(
        &self,
        table: &str,
        profile: &NewProfile,
        conflict_key: &str,
    ) -> StoreResult<ProfileRecord> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), conflict_key);
        debug!(table, external_id = profile.external_id, "Upserting profile");

        let request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(profile);

        let body = self.send(request, "upsert").await?;
        Self::first_row(&body)
    }

    async fn select(&self, table: &str, filter: &ProfileFilter) -> StoreResult<ProfileRecord> {
        let url = format!(
            "{}?{}=eq.{}&select=*&limit=1",
            self.rest_url(table),
            filter.column(),
            filter.value()
        );
        debug!(table, column = filter.column(), "Selecting profile");

        let body = self.send(self.http_client.get(&url), "select").await?;
        Self::first_row(&body)
    }

    async fn insert(&self, table: &str, profile: &NewProfile) -> StoreResult<ProfileRecord> {
        debug!(table, external_id = profile.external_id, "Inserting profile");

        let request = self
            .http_client
            .post(self.rest_url(table))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(profile);

        let body = self.send(request, "insert").await?;
        Self::first_row(&body)
    }

    async fn call_procedure(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        debug!(procedure = name, "Calling stored procedure");

        let request = self
            .http_client
            .post(self.rpc_url(name))
            .header("Content-Type", "application/json")
            .json(payload);

        let body = self.send(request, "rpc").await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
