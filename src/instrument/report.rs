//! Profiler report parsing.
//!
//! Reports are a `GC <n> invokes.` line, a header line starting with
//! `Index`, and data lines. Columns are separated by two or more spaces.
//! Only the last data line is kept: it describes the most recent pass.

use std::collections::HashMap;

const INVOKE_TIME: &str = "Invoke Time(sec)";
const USE_SIZE: &str = "Use Size(byte)";
const TOTAL_SIZE: &str = "Total Size(byte)";
const TOTAL_OBJECT: &str = "Total Object";
const GC_TIME: &str = "GC Time(ms)";

/// Splits a report line into columns separated by runs of two or more spaces.
fn split_columns(line: &str) -> Vec<&str> {
    line.split("  ")
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .collect()
}

/// Builds a column name → value map from the header and the last data line.
///
/// Returns an empty map for an empty or header-less report.
#[must_use]
pub fn parse_report(report: &str) -> HashMap<String, String> {
    let mut lines = report.lines().map(str::trim_end);
    let Some(header) = lines.by_ref().find(|line| line.trim_start().starts_with("Index")) else {
        return HashMap::new();
    };
    let Some(last) = lines.filter(|line| !line.trim().is_empty()).last() else {
        return HashMap::new();
    };

    split_columns(header)
        .into_iter()
        .zip(split_columns(last))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Reads the invocation count from the `GC <n> invokes.` line.
#[must_use]
pub fn parse_invocations(report: &str) -> Option<u64> {
    report.lines().find_map(|line| {
        line.trim()
            .strip_prefix("GC ")?
            .strip_suffix(" invokes.")?
            .parse()
            .ok()
    })
}

/// Profiler state at one point of the request cycle.
///
/// Every field is absent when the profiler had nothing to report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfilerSnapshot {
    /// Passes recorded since the profiler started.
    pub invocations: Option<u64>,
    /// Seconds since the heap was created when the last pass ran.
    pub invoked_at_secs: Option<f64>,
    /// Bytes in use at the last pass.
    pub use_bytes: Option<u64>,
    /// Total bytes at the last pass.
    pub total_bytes: Option<u64>,
    /// Total objects at the last pass.
    pub total_objects: Option<u64>,
    /// Duration of the last pass in milliseconds.
    pub elapsed_ms: Option<f64>,
}

impl ProfilerSnapshot {
    /// Parses a textual profiler report.
    #[must_use]
    pub fn from_report(report: &str) -> Self {
        let columns = parse_report(report);
        let field = |name: &str| columns.get(name).map(String::as_str);

        Self {
            invocations: parse_invocations(report),
            invoked_at_secs: field(INVOKE_TIME).and_then(|v| v.parse().ok()),
            use_bytes: field(USE_SIZE).and_then(|v| v.parse().ok()),
            total_bytes: field(TOTAL_SIZE).and_then(|v| v.parse().ok()),
            total_objects: field(TOTAL_OBJECT).and_then(|v| v.parse().ok()),
            elapsed_ms: field(GC_TIME).and_then(|v| v.parse().ok()),
        }
    }

    /// Returns `true` if the report carried no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "GC 2 invokes.\n\
Index  Invoke Time(sec)  Use Size(byte)  Total Size(byte)  Total Object  GC Time(ms)\n\
    1             0.013            4096              8192            12     0.051000\n\
    2             0.520             512              9216            14     0.008000\n";

    #[test]
    fn test_parse_report_uses_last_line() {
        let columns = parse_report(REPORT);
        assert_eq!(columns.get("Index").map(String::as_str), Some("2"));
        assert_eq!(columns.get("Use Size(byte)").map(String::as_str), Some("512"));
        assert_eq!(columns.get("GC Time(ms)").map(String::as_str), Some("0.008000"));
    }

    #[test]
    fn test_snapshot_from_report() {
        let snapshot = ProfilerSnapshot::from_report(REPORT);
        assert_eq!(snapshot.invocations, Some(2));
        assert_eq!(snapshot.use_bytes, Some(512));
        assert_eq!(snapshot.total_bytes, Some(9216));
        assert_eq!(snapshot.total_objects, Some(14));
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_empty_report_is_no_data() {
        assert!(parse_report("").is_empty());
        assert!(ProfilerSnapshot::from_report("").is_empty());
    }

    #[test]
    fn test_header_without_data() {
        let report = "GC 0 invokes.\nIndex  Invoke Time(sec)\n";
        assert!(parse_report(report).is_empty());
        assert_eq!(ProfilerSnapshot::from_report(report).invocations, Some(0));
    }

    #[test]
    fn test_round_trip_with_heap_report() {
        use crate::heap::{DeferredHeap, ReclamationController};

        let heap = DeferredHeap::default();
        heap.start_profiler();
        heap.defer_sized(vec![0_u8; 64], 64);
        heap.run().expect("run");

        let snapshot = ProfilerSnapshot::from_report(&heap.profiler_report());
        assert_eq!(snapshot.invocations, Some(1));
        assert_eq!(snapshot.use_bytes, Some(64));
        assert_eq!(snapshot.total_objects, Some(1));
        assert!(snapshot.elapsed_ms.is_some());
    }
}
