//! Local session cache.
//!
//! The session outlives the process in `session.json` under the base
//! directory. Signing out purges it.

use crate::{AuthError, AuthResult, Session};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persistence for the local copy of the session.
pub trait SessionCache: Send + Sync {
    fn load(&self) -> AuthResult<Option<Session>>;

    fn store(&self, session: &Session) -> AuthResult<()>;

    /// Remove every locally persisted session artifact.
    fn purge(&self) -> AuthResult<()>;
}

/// Session cache backed by a JSON file.
pub struct FileSessionCache {
    path: PathBuf,
}

impl FileSessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self) -> AuthResult<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => Err(AuthError::Cache(format!(
                "unreadable session file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn store(&self, session: &Session) -> AuthResult<()> {
        let content = serde_json::to_string_pretty(session)?;
        write_private_atomic(&self.path, content.as_bytes())?;
        debug!(path = %self.path.display(), "Session cached");
        Ok(())
    }

    fn purge(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Session cache purged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Replace `path` with `content` through a sibling temp file, so readers
/// see either the old or the new session. The temp file is created
/// owner-only on unix.
fn write_private_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    // Left behind by an interrupted write; create_new below needs it gone
    let _ = std::fs::remove_file(&tmp_path);

    let result = (|| -> std::io::Result<()> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Session cache kept in memory.
#[derive(Default)]
pub struct MemorySessionCache {
    session: Mutex<Option<Session>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn load(&self) -> AuthResult<Option<Session>> {
        Ok(self.session.lock().clone())
    }

    fn store(&self, session: &Session) -> AuthResult<()> {
        *self.session.lock() = Some(session.clone());
        Ok(())
    }

    fn purge(&self) -> AuthResult<()> {
        *self.session.lock() = None;
        Ok(())
    }
}
