//! Configuration management.
//!
//! Values come from `config.json` under the base directory and are then
//! overridden from the environment. The Supabase URL and public key have no
//! usable default: [`Config::validate`] rejects a configuration without them.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default origin the OAuth provider redirects back to.
pub const DEFAULT_SITE_URL: &str = "http://localhost:54321";

/// Default port for the local callback server.
pub const DEFAULT_CALLBACK_PORT: u16 = 54321;

/// How long the callback resolver waits for a session to show up.
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 5_000;

/// Table holding one profile row per GitHub account.
pub const DEFAULT_PROFILE_TABLE: &str = "users";

/// Privileged procedure used when direct writes are rejected.
pub const DEFAULT_PROFILE_PROCEDURE: &str = "upsert_github_profile";

const URL_ENV_VARS: &[&str] = &["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
const KEY_ENV_VARS: &[&str] = &[
    "SUPABASE_ANON_KEY",
    "NEXT_PUBLIC_SUPABASE_ANON_KEY",
    "SUPABASE_PUBLISHABLE_KEY",
];

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default)]
    pub supabase_url: String,
    /// Supabase anon/publishable key (public, safe to expose).
    #[serde(default)]
    pub supabase_anon_key: String,
    /// Origin used to build the OAuth redirect target.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Extra OAuth scopes requested from GitHub.
    #[serde(default)]
    pub oauth_scopes: Option<String>,
    /// Callback resolver wait window in milliseconds.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
    /// Profile table name.
    #[serde(default = "default_profile_table")]
    pub profile_table: String,
    /// Privileged upsert procedure name.
    #[serde(default = "default_profile_procedure")]
    pub profile_procedure: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_callback_timeout_ms() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_MS
}

fn default_profile_table() -> String {
    DEFAULT_PROFILE_TABLE.to_string()
}

fn default_profile_procedure() -> String {
    DEFAULT_PROFILE_PROCEDURE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            site_url: default_site_url(),
            oauth_scopes: None,
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT_MS,
            profile_table: default_profile_table(),
            profile_procedure: default_profile_procedure(),
        }
    }
}

impl Config {
    /// Load from `config.json` (if present), then apply the process environment.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from environment variables read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        if let Some(url) = first(URL_ENV_VARS) {
            self.supabase_url = url;
        }
        if let Some(key) = first(KEY_ENV_VARS) {
            self.supabase_anon_key = key;
        }
        if let Some(site) = first(&["PROFILE_SYNC_SITE_URL"]) {
            self.site_url = site;
        }
        if let Some(level) = first(&["PROFILE_SYNC_LOG_LEVEL"]) {
            self.log_level = level;
        }
        if let Some(timeout) = first(&["PROFILE_SYNC_CALLBACK_TIMEOUT_MS"]) {
            match timeout.parse() {
                Ok(ms) => self.callback_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid callback timeout"),
            }
        }
    }

    /// Check that the backend endpoint and public key are usable.
    ///
    /// Startup must stop on error: nothing works without the backend.
    pub fn validate(&self) -> CoreResult<()> {
        if self.supabase_url.trim().is_empty() {
            return Err(CoreError::Config(format!(
                "Supabase URL is not set (set one of {})",
                URL_ENV_VARS.join(", ")
            )));
        }
        if self.supabase_anon_key.trim().is_empty() {
            return Err(CoreError::Config(format!(
                "Supabase public key is not set (set one of {})",
                KEY_ENV_VARS.join(", ")
            )));
        }
        self.supabase_url()?;
        self.site_url()?;
        if self.callback_timeout_ms == 0 {
            return Err(CoreError::Config(
                "callback_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The Supabase URL without a trailing slash, parsed.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(self.supabase_url.trim_end_matches('/')).map_err(CoreError::from)
    }

    pub fn site_url(&self) -> CoreResult<Url> {
        Url::parse(&self.site_url).map_err(CoreError::from)
    }

    /// Redirect target handed to the OAuth provider (`<site>/auth/callback`).
    pub fn callback_url(&self) -> CoreResult<Url> {
        Ok(self.site_url()?.join("/auth/callback")?)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}
