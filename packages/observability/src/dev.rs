//! File sink for structured JSONL logs.
//!
//! Lines are appended and flushed one at a time so concurrent CLI runs can
//! share the same file.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `~/.profile-sync/logs/dev.jsonl`, or `None` without a home directory.
fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".profile-sync").join("logs").join("dev.jsonl"))
}

/// Append-only writer shared by every log line.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let result = guard.write(buf);
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

/// Install the registry with the JSONL layer and the optional stderr layer.
///
/// If the log file cannot be opened, logging degrades to stderr only instead
/// of aborting the program.
pub fn init_dev_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let json_layer = log_path.as_ref().and_then(|path| {
        match CentralLogWriter::new(path) {
            Ok(writer) => Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory { writer },
            )),
            Err(e) => {
                eprintln!("failed to open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let also_stderr = config.also_stderr || json_layer.is_none();
    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
    });

    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter())))
        .with(stderr_layer.map(|l| l.with_filter(env_filter())))
        .try_init()
        .is_ok();

    if installed {
        if let Some(path) = log_path {
            tracing::debug!(log_path = %path.display(), "observability initialized");
        }
    }
}
