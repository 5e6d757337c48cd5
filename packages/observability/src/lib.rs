//! # Observability
//!
//! Logging setup shared by the profile-sync crates.
//!
//! Library crates only emit `tracing` events. Binaries call
//! [`init_with_config`] once at startup and decide where the events go:
//!
//! - a compact stderr stream for interactive use
//! - a structured JSONL file (`~/.profile-sync/logs/dev.jsonl` by default)
//!   when the `dev` feature is enabled
//!
//! Field values whose names look like credentials (`access_token`,
//! `refresh_token`, `apikey`, ...) are redacted before they reach the file.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "profile-sync".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

use std::path::PathBuf;

pub use json_layer::{is_sensitive_field, LogEntry, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the emitting program, written into every JSONL line.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Custom JSONL file path. Defaults to `~/.profile-sync/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this twice is harmless: the second global subscriber install is
/// rejected and ignored.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};
pub use tracing::Level;
