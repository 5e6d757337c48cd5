//! Profile row types.

use crate::{ExternalKey, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage-assigned row id. Integer in the in-process store, whatever the
/// table uses remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(id) => write!(f, "{}", id),
            RowId::Text(id) => f.write_str(id),
        }
    }
}

/// Write payload for a profile row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub external_id: i64,
    pub auth_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub twitter_username: Option<String>,
    pub public_repos: Option<i64>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub last_login: DateTime<Utc>,
}

impl NewProfile {
    /// Build the payload for `identity` stamped with `now` as last login.
    pub fn from_identity(identity: &Identity, key: ExternalKey, now: DateTime<Utc>) -> Self {
        let meta = &identity.user_metadata;
        let owned = |v: Option<&str>| v.map(str::to_string);

        Self {
            external_id: key.value(),
            auth_user_id: identity.id.clone(),
            username: owned(meta.username()),
            email: identity.email.clone(),
            avatar_url: owned(meta.avatar_url()),
            name: owned(meta.display_name()),
            bio: owned(meta.bio()),
            company: owned(meta.company()),
            location: owned(meta.location()),
            blog: owned(meta.blog()),
            twitter_username: owned(meta.twitter_username()),
            public_repos: meta.public_repos(),
            followers: meta.followers(),
            following: meta.following(),
            last_login: now,
        }
    }
}

/// A stored profile row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: RowId,
    pub external_id: i64,
    #[serde(default)]
    pub auth_user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub twitter_username: Option<String>,
    #[serde(default)]
    pub public_repos: Option<i64>,
    #[serde(default)]
    pub followers: Option<i64>,
    #[serde(default)]
    pub following: Option<i64>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Row produced by writing `profile` for the first time.
    pub(crate) fn created(id: RowId, profile: &NewProfile, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id,
            external_id: profile.external_id,
            auth_user_id: None,
            username: None,
            email: None,
            avatar_url: None,
            name: None,
            bio: None,
            company: None,
            location: None,
            blog: None,
            twitter_username: None,
            public_repos: None,
            followers: None,
            following: None,
            last_login: None,
            created_at: Some(now),
        };
        record.merge(profile);
        record
    }

    /// Apply an upsert payload. `created_at` is kept and `last_login` never
    /// moves backwards.
    pub(crate) fn merge(&mut self, profile: &NewProfile) {
        self.auth_user_id = Some(profile.auth_user_id.clone());
        self.username = profile.username.clone();
        self.email = profile.email.clone();
        self.avatar_url = profile.avatar_url.clone();
        self.name = profile.name.clone();
        self.bio = profile.bio.clone();
        self.company = profile.company.clone();
        self.location = profile.location.clone();
        self.blog = profile.blog.clone();
        self.twitter_username = profile.twitter_username.clone();
        self.public_repos = profile.public_repos;
        self.followers = profile.followers;
        self.following = profile.following;
        self.last_login = Some(match self.last_login {
            Some(previous) => previous.max(profile.last_login),
            None => profile.last_login,
        });
    }
}

/// Row selector for [`crate::ProfileStore::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileFilter {
    ByExternalId(i64),
    ByAuthUserId(String),
}

impl ProfileFilter {
    pub fn column(&self) -> &'static str {
        match self {
            ProfileFilter::ByExternalId(_) => "external_id",
            ProfileFilter::ByAuthUserId(_) => "auth_user_id",
        }
    }

    pub fn value(&self) -> String {
        match self {
            ProfileFilter::ByExternalId(id) => id.to_string(),
            ProfileFilter::ByAuthUserId(id) => id.clone(),
        }
    }

    pub(crate) fn matches(&self, record: &ProfileRecord) -> bool {
        match self {
            ProfileFilter::ByExternalId(id) => record.external_id == *id,
            ProfileFilter::ByAuthUserId(id) => record.auth_user_id.as_deref() == Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_identity() -> Identity {
        Identity::new("auth-1")
            .with_email("octo@example.com")
            .with_metadata("user_name", "octocat")
            .with_metadata("name", "Octo")
            .with_metadata("public_repos", 8)
            .with_metadata("twitter_username", "octo_tw")
    }

    #[test]
    fn test_from_identity_copies_metadata() {
        let now = Utc::now();
        let profile = NewProfile::from_identity(&sample_identity(), ExternalKey::new(5), now);

        assert_eq!(profile.external_id, 5);
        assert_eq!(profile.auth_user_id, "auth-1");
        assert_eq!(profile.username.as_deref(), Some("octocat"));
        assert_eq!(profile.name.as_deref(), Some("Octo"));
        assert_eq!(profile.public_repos, Some(8));
        assert_eq!(profile.twitter_username.as_deref(), Some("octo_tw"));
        assert_eq!(profile.last_login, now);
    }

    #[test]
    fn test_merge_keeps_created_at_and_latest_login() {
        let first_login = Utc::now();
        let profile = NewProfile::from_identity(&sample_identity(), ExternalKey::new(5), first_login);
        let mut record = ProfileRecord::created(RowId::Int(1), &profile, first_login);

        let mut stale = profile.clone();
        stale.last_login = first_login - Duration::hours(1);
        stale.followers = Some(3);
        record.merge(&stale);

        assert_eq!(record.created_at, Some(first_login));
        assert_eq!(record.last_login, Some(first_login));
        assert_eq!(record.followers, Some(3));
    }

    #[test]
    fn test_record_accepts_text_ids_and_sparse_rows() {
        let record: ProfileRecord = serde_json::from_value(json!({
            "id": "0b6c-uuid",
            "external_id": 583231,
            "username": "octocat",
            "last_login": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(record.id, RowId::Text("0b6c-uuid".to_string()));
        assert_eq!(record.id.to_string(), "0b6c-uuid");
        assert!(record.created_at.is_none());
        assert!(record.last_login.is_some());
    }

    #[test]
    fn test_filter_columns() {
        assert_eq!(ProfileFilter::ByExternalId(9).column(), "external_id");
        assert_eq!(ProfileFilter::ByExternalId(9).value(), "9");
        assert_eq!(
            ProfileFilter::ByAuthUserId("a".into()).column(),
            "auth_user_id"
        );
    }
}
