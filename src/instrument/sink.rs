//! Append-only diagnostic log.
//!
//! One CSV row per instrumented request that ran a pass. The file is opened
//! on the first record, not at construction, and a header row is written
//! only when the file is new. If the file cannot be opened or written, the
//! sink logs once and drops further rows; the request path never sees the
//! error.

use crate::context::WorkerId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One diagnostic row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// RFC 3339 timestamp of the pass.
    pub timestamp: String,
    /// Worker that served the request.
    pub worker: String,
    /// Request path.
    pub path: String,
    /// Endpoint identity.
    pub endpoint: String,
    /// After-reclaim objects minus before-request objects.
    pub delta_objects: i64,
    /// Live objects before the handler ran.
    pub objects_before: u64,
    /// Live objects after the handler ran.
    pub objects_after_handler: u64,
    /// Live objects after the pass.
    pub objects_after_reclaim: u64,
    /// Passes recorded by the profiler.
    pub profiler_invocations: Option<u64>,
    /// Bytes in use before the request.
    pub use_bytes_before: Option<u64>,
    /// Bytes in use after the pass.
    pub use_bytes_after: Option<u64>,
    /// Total bytes before the request.
    pub total_bytes_before: Option<u64>,
    /// Total bytes after the pass.
    pub total_bytes_after: Option<u64>,
    /// Total objects before the request.
    pub total_objects_before: Option<u64>,
    /// Total objects after the pass.
    pub total_objects_after: Option<u64>,
    /// Duration of the pass in milliseconds.
    pub reclaim_ms: f64,
}

/// Returns the log file path for a worker.
#[must_use]
pub fn log_path(dir: &Path, worker: &WorkerId) -> PathBuf {
    let name: String = worker
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("oobgc-worker-{name}.csv"))
}

enum SinkState {
    Unopened,
    Open(csv::Writer<File>),
    Disabled,
}

/// Lazily opened CSV writer.
pub struct DiagnosticSink {
    path: PathBuf,
    state: SinkState,
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SinkState::Unopened => "unopened",
            SinkState::Open(_) => "open",
            SinkState::Disabled => "disabled",
        };
        f.debug_struct("DiagnosticSink")
            .field("path", &self.path)
            .field("state", &state)
            .finish()
    }
}

impl DiagnosticSink {
    /// Creates a sink writing to `<dir>/oobgc-worker-<id>.csv`.
    #[must_use]
    pub fn new(dir: &Path, worker: &WorkerId) -> Self {
        Self {
            path: log_path(dir, worker),
            state: SinkState::Unopened,
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `false` once the sink gave up.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self.state, SinkState::Disabled)
    }

    /// Appends a row. Failures disable the sink.
    pub fn write(&mut self, record: &DiagnosticRecord) {
        if matches!(self.state, SinkState::Unopened) {
            self.state = match open_writer(&self.path) {
                Ok(writer) => SinkState::Open(writer),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Diagnostic log unavailable, disabling");
                    SinkState::Disabled
                },
            };
        }

        let SinkState::Open(writer) = &mut self.state else {
            return;
        };

        let written = writer
            .serialize(record)
            .map_err(|e| e.to_string())
            .and_then(|()| writer.flush().map_err(|e| e.to_string()));
        if let Err(cause) = written {
            warn!(path = %self.path.display(), error = %cause, "Diagnostic log write failed, disabling");
            self.state = SinkState::Disabled;
        }
    }
}

/// Opens `path` for appending, creating parent directories.
fn open_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: e.to_string(),
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

    let is_new = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
    Ok(csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file))
}

/// Reads every row of a diagnostic log.
pub fn read_records(path: &Path) -> Result<Vec<DiagnosticRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| Error::OperationFailed {
        operation: "open_diagnostic_log".to_string(),
        cause: format!("{}: {}", path.display(), e),
    })?;

    reader
        .deserialize()
        .map(|row| {
            row.map_err(|e| Error::OperationFailed {
                operation: "read_diagnostic_log".to_string(),
                cause: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(delta: i64) -> DiagnosticRecord {
        DiagnosticRecord {
            timestamp: "2026-10-16T00:00:00Z".to_string(),
            worker: "1".to_string(),
            path: "/reports".to_string(),
            endpoint: "reports#index".to_string(),
            delta_objects: delta,
            objects_before: 1000,
            objects_after_handler: 1200,
            objects_after_reclaim: 900,
            profiler_invocations: Some(3),
            use_bytes_before: None,
            use_bytes_after: Some(512),
            total_bytes_before: None,
            total_bytes_after: Some(4096),
            total_objects_before: None,
            total_objects_after: Some(40),
            reclaim_ms: 0.5,
        }
    }

    #[test]
    fn test_log_path_sanitizes_worker() {
        let path = log_path(Path::new("log"), &WorkerId::new("web/1"));
        assert_eq!(path, Path::new("log").join("oobgc-worker-web_1.csv"));
    }

    #[test]
    fn test_sink_is_lazy_and_appends() {
        let dir = TempDir::new().expect("temp dir");
        let log_dir = dir.path().join("nested");
        let worker = WorkerId::new("1");

        let mut sink = DiagnosticSink::new(&log_dir, &worker);
        assert!(!sink.path().exists());

        sink.write(&record(-100));
        drop(sink);

        let mut sink = DiagnosticSink::new(&log_dir, &worker);
        sink.write(&record(5));

        let rows = read_records(&log_path(&log_dir, &worker)).expect("read log");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], record(-100));
        assert_eq!(rows[1].delta_objects, 5);
    }

    #[test]
    fn test_unwritable_dir_disables_sink() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let mut sink = DiagnosticSink::new(&blocker, &WorkerId::new("1"));
        sink.write(&record(1));
        assert!(!sink.is_enabled());
        sink.write(&record(2));
    }
}
