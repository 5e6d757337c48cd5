//! Profile store error types.

use serde::Deserialize;
use thiserror::Error;

/// Outcome classes a profile store can report.
///
/// Callers branch on the variant; backend error codes never leak past the
/// store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No row matched the filter.
    #[error("Record not found")]
    NotFound,

    /// A row with the same unique key already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row-level security or role policy refused the write.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Backend unavailable or overloaded; the operation can be retried.
    #[error("Backend temporarily unavailable: {0}")]
    Transient(String),

    /// Any other refusal from the backend.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            StoreError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    /// Classify a non-success PostgREST response.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("status {}", status));

        match parsed.code.as_deref() {
            Some("PGRST116") => return StoreError::NotFound,
            Some("23505") => return StoreError::Conflict(message),
            Some("42501") => return StoreError::PermissionDenied(message),
            _ => {}
        }

        match status {
            409 => StoreError::Conflict(message),
            401 | 403 => StoreError::PermissionDenied(message),
            s if s >= 500 => StoreError::Transient(message),
            _ => StoreError::Rejected { status, message },
        }
    }

    /// Map a transport failure; connect and timeout errors are transient.
    pub(crate) fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Http(err)
        }
    }
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row_not_found() {
        let body = r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned"}"#;
        assert!(matches!(
            StoreError::from_response(406, body),
            StoreError::NotFound
        ));
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        match StoreError::from_response(409, body) {
            StoreError::Conflict(msg) => assert!(msg.contains("duplicate key")),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(matches!(
            StoreError::from_response(409, ""),
            StoreError::Conflict(_)
        ));
    }

    #[test]
    fn test_rls_violation_is_permission_denied() {
        let body = r#"{"code":"42501","message":"new row violates row-level security policy"}"#;
        assert!(matches!(
            StoreError::from_response(403, body),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            StoreError::from_response(401, "not json"),
            StoreError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = StoreError::from_response(503, "");
        assert!(matches!(err, StoreError::Transient(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_client_errors_are_rejected() {
        let body = r#"{"code":"PGRST204","message":"Could not find the 'bogus' column"}"#;
        match StoreError::from_response(400, body) {
            StoreError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("bogus"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_is_transient_only_for_retryable() {
        assert!(!StoreError::NotFound.is_transient());
        assert!(!StoreError::Conflict("dup".into()).is_transient());
        assert!(!StoreError::PermissionDenied("rls".into()).is_transient());
    }
}
