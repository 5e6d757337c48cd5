//! Authenticated identity as reported by the session store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The signed-in user.
///
/// Produced by the session store and never modified here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Session store user id (opaque).
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Fields copied from the GitHub account by the identity provider.
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            user_metadata: UserMetadata::default(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.user_metadata.0.insert(key.to_string(), value.into());
        self
    }

    /// Best display handle for logs and the dashboard.
    pub fn handle(&self) -> &str {
        self.user_metadata
            .username()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Provider metadata mapping.
///
/// Values arrive loosely typed (counts are sometimes strings), so every
/// accessor normalizes and treats empty strings as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserMetadata(pub Map<String, Value>);

impl UserMetadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty string value of `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Integer value of `key`, accepting numeric strings.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// GitHub login (`user_name`, else `preferred_username`).
    pub fn username(&self) -> Option<&str> {
        self.text("user_name")
            .or_else(|| self.text("preferred_username"))
    }

    pub fn display_name(&self) -> Option<&str> {
        self.text("full_name").or_else(|| self.text("name"))
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.text("avatar_url")
    }

    pub fn bio(&self) -> Option<&str> {
        self.text("bio")
    }

    pub fn company(&self) -> Option<&str> {
        self.text("company")
    }

    pub fn location(&self) -> Option<&str> {
        self.text("location")
    }

    pub fn blog(&self) -> Option<&str> {
        self.text("blog")
    }

    pub fn twitter_username(&self) -> Option<&str> {
        self.text("twitter_username")
    }

    pub fn public_repos(&self) -> Option<i64> {
        self.integer("public_repos")
    }

    pub fn followers(&self) -> Option<i64> {
        self.integer("followers")
    }

    pub fn following(&self) -> Option<i64> {
        self.integer("following")
    }
}
