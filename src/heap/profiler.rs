//! Per-pass profiling records and their textual report.
//!
//! The report layout is a count line, a header line, then one line per
//! recorded pass. Columns are separated by at least two spaces so that
//! column names may contain single spaces:
//!
//! ```text
//! GC 2 invokes.
//! Index  Invoke Time(sec)  Use Size(byte)  Total Size(byte)  Total Object  GC Time(ms)
//!     1             0.013            4096              8192            12     0.051000
//!     2             0.520             512              8192            14     0.008000
//! ```

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Duration;

/// Column names of the profiler report, in order.
pub const REPORT_COLUMNS: [&str; 6] = [
    "Index",
    "Invoke Time(sec)",
    "Use Size(byte)",
    "Total Size(byte)",
    "Total Object",
    "GC Time(ms)",
];

/// Measurements for one reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRecord {
    /// Time since the heap was created.
    pub invoked_at: Duration,
    /// Bytes pending reclamation when the pass started.
    pub use_bytes: u64,
    /// Pending bytes plus bookkeeping capacity when the pass started.
    pub total_bytes: u64,
    /// Objects ever handed to the heap.
    pub total_objects: u64,
    /// Wall time spent in the pass.
    pub duration: Duration,
}

/// Bounded record buffer. Active only between `start` and `stop`.
#[derive(Debug)]
pub(crate) struct Profiler {
    enabled: bool,
    invocations: u64,
    records: VecDeque<ProfileRecord>,
    capacity: usize,
}

impl Profiler {
    pub(crate) const fn new(capacity: usize) -> Self {
        Self {
            enabled: false,
            invocations: 0,
            records: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) const fn start(&mut self) {
        self.enabled = true;
    }

    pub(crate) const fn stop(&mut self) {
        self.enabled = false;
    }

    pub(crate) const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn clear(&mut self) {
        self.invocations = 0;
        self.records.clear();
    }

    pub(crate) fn record(&mut self, record: ProfileRecord) {
        if !self.enabled {
            return;
        }
        self.invocations += 1;
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Renders the textual report. Empty when nothing was recorded.
    pub(crate) fn report(&self) -> String {
        if self.invocations == 0 {
            return String::new();
        }

        let mut out = String::new();
        let _ = writeln!(out, "GC {} invokes.", self.invocations);
        let _ = writeln!(out, "{}", REPORT_COLUMNS.join("  "));

        // Index keeps counting across evicted records.
        let first_index = self.invocations - self.records.len() as u64 + 1;
        for (offset, record) in self.records.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>5}  {:>16.3}  {:>14}  {:>16}  {:>12}  {:>11.6}",
                first_index + offset as u64,
                record.invoked_at.as_secs_f64(),
                record.use_bytes,
                record.total_bytes,
                record.total_objects,
                record.duration.as_secs_f64() * 1000.0,
            );
        }
        out
    }
}
