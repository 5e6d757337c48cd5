//! Configuration, file system paths and logging bootstrap for profile-sync.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_CALLBACK_PORT, DEFAULT_CALLBACK_TIMEOUT_MS, DEFAULT_LOG_LEVEL,
    DEFAULT_PROFILE_PROCEDURE, DEFAULT_PROFILE_TABLE, DEFAULT_SITE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
