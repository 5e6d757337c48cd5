//! Logging initialization.
//!
//! Wraps the observability crate so binaries only pass a level and a log
//! file location.

use crate::Paths;

/// Initialize tracing for the CLI.
///
/// JSONL goes to `paths.log_file()`; stderr output is enabled when
/// `verbose` is set. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, paths: &Paths, verbose: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: "profile-sync".into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: verbose,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
