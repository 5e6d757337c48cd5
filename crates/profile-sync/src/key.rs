//! External key derivation.
//!
//! Profile rows are keyed by the numeric GitHub account id. Providers do not
//! always report it in the same field, so the key is taken from the first
//! usable source in priority order:
//!
//! 1. `provider_id` (number or numeric string)
//! 2. `sub` (numeric)
//! 3. SHA-256 of the username, folded into a positive 63-bit integer
//!
//! The third source is stable across sessions but collides with nothing only
//! in practice, so it can be switched off through [`KeyPolicy`].

use crate::UserMetadata;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Numeric GitHub identity used as the profile row's unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalKey(i64);

impl ExternalKey {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which fallbacks are acceptable when deriving a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Allow the username hash when no numeric id is present.
    pub allow_username_hash: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            allow_username_hash: true,
        }
    }
}

/// Why no key could be derived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("identity metadata has no provider id, numeric subject or username")]
    Missing,

    #[error("identity has no numeric id and username-derived keys are disabled")]
    HashDisabled,
}

/// Derive the external key for an identity's metadata.
pub fn derive_external_key(
    meta: &UserMetadata,
    policy: &KeyPolicy,
) -> Result<ExternalKey, KeyError> {
    if let Some(id) = numeric_id(meta, "provider_id") {
        return Ok(ExternalKey(id));
    }
    if let Some(id) = numeric_id(meta, "sub") {
        return Ok(ExternalKey(id));
    }

    let username = meta.username().ok_or(KeyError::Missing)?;
    if !policy.allow_username_hash {
        return Err(KeyError::HashDisabled);
    }

    let key = username_hash(username);
    warn!(
        username = %username,
        external_id = key.0,
        "No numeric provider id in identity, using username-derived key"
    );
    Ok(key)
}

fn numeric_id(meta: &UserMetadata, field: &str) -> Option<i64> {
    meta.integer(field).filter(|id| *id > 0)
}

fn username_hash(username: &str) -> ExternalKey {
    let digest = Sha256::digest(username.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let folded = u64::from_be_bytes(prefix) & 0x7FFF_FFFF_FFFF_FFFF;
    ExternalKey(folded as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;

    fn meta(pairs: &[(&str, serde_json::Value)]) -> UserMetadata {
        pairs
            .iter()
            .fold(Identity::new("u"), |id, (k, v)| id.with_metadata(k, v.clone()))
            .user_metadata
    }

    #[test]
    fn test_provider_id_string() {
        let key = derive_external_key(
            &meta(&[("provider_id", "123".into())]),
            &KeyPolicy::default(),
        );
        assert_eq!(key, Ok(ExternalKey::new(123)));
    }

    #[test]
    fn test_provider_id_wins_over_sub() {
        let key = derive_external_key(
            &meta(&[("provider_id", 7.into()), ("sub", "9".into())]),
            &KeyPolicy::default(),
        );
        assert_eq!(key.unwrap().value(), 7);
    }

    #[test]
    fn test_numeric_sub_used_when_provider_id_missing() {
        let key = derive_external_key(
            &meta(&[("sub", "583231".into()), ("user_name", "octocat".into())]),
            &KeyPolicy::default(),
        );
        assert_eq!(key.unwrap().value(), 583231);
    }

    #[test]
    fn test_non_numeric_sub_falls_through_to_username() {
        let key = derive_external_key(
            &meta(&[("sub", "f1d2-uuid".into()), ("user_name", "abc".into())]),
            &KeyPolicy::default(),
        )
        .unwrap();
        assert_eq!(key, username_hash("abc"));
    }

    #[test]
    fn test_username_hash_is_deterministic_and_positive() {
        let policy = KeyPolicy::default();
        let first = derive_external_key(&meta(&[("user_name", "abc".into())]), &policy).unwrap();
        let second = derive_external_key(&meta(&[("user_name", "abc".into())]), &policy).unwrap();
        let other = derive_external_key(&meta(&[("user_name", "abd".into())]), &policy).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.value() >= 0);
    }

    #[test]
    fn test_preferred_username_is_hashed_when_user_name_missing() {
        let key = derive_external_key(
            &meta(&[("preferred_username", "abc".into())]),
            &KeyPolicy::default(),
        )
        .unwrap();
        assert_eq!(key, username_hash("abc"));
    }

    #[test]
    fn test_no_usable_field() {
        let key = derive_external_key(&meta(&[("avatar_url", "x".into())]), &KeyPolicy::default());
        assert_eq!(key, Err(KeyError::Missing));
    }

    #[test]
    fn test_hash_disabled_by_policy() {
        let policy = KeyPolicy {
            allow_username_hash: false,
        };
        let key = derive_external_key(&meta(&[("user_name", "abc".into())]), &policy);
        assert_eq!(key, Err(KeyError::HashDisabled));
    }

    #[test]
    fn test_zero_and_negative_ids_are_ignored() {
        let key = derive_external_key(
            &meta(&[("provider_id", 0.into()), ("sub", "-4".into())]),
            &KeyPolicy::default(),
        );
        assert_eq!(key, Err(KeyError::Missing));
    }
}
