//! Reclamation effectiveness instrumentation.
//!
//! A [`MetricsCollector`] rides along with the request cycle on one selected
//! worker. It snapshots the live-object count before the handler, after the
//! handler and after the reclamation pass, and records the net change per
//! endpoint. Collectors on unselected workers do nothing, so enabling
//! instrumentation cluster-wide costs one worker's overhead.
//!
//! # Record fields
//!
//! | Field | Source |
//! |-------|--------|
//! | `delta_objects` | after-reclaim minus before-request object count |
//! | `objects_*` | [`ReclamationController::live_objects`] at each phase |
//! | `profiler_invocations` | `GC <n> invokes.` line of the profiler report |
//! | `use_bytes_*`, `total_bytes_*`, `total_objects_*` | last profiler data line |
//! | `reclaim_ms` | duration of the pass |

mod report;
mod sink;

pub use report::{ProfilerSnapshot, parse_invocations, parse_report};
pub use sink::{DiagnosticRecord, DiagnosticSink, log_path, read_records};

use crate::context::{RequestContext, WorkerId};
use crate::heap::{ReclaimOutcome, ReclamationController};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Endpoint key used when the handler did not set route parameters.
pub const UNKNOWN_ENDPOINT: &str = "unknown";

/// Computes `after - before` as a signed value, saturating at the `i64` range.
#[inline]
fn signed_delta(after: u64, before: u64) -> i64 {
    let delta = i128::from(after) - i128::from(before);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

/// Chooses which workers run instrumentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSelector {
    /// Every worker.
    All,
    /// A single worker.
    Only(WorkerId),
}

impl WorkerSelector {
    /// Parses `*` as [`WorkerSelector::All`] and anything else as a worker id.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "*" | "all" => Self::All,
            id => Self::Only(WorkerId::new(id)),
        }
    }

    /// Returns `true` if `worker` is selected.
    #[must_use]
    pub fn matches(&self, worker: &WorkerId) -> bool {
        match self {
            Self::All => true,
            Self::Only(id) => id == worker,
        }
    }
}

impl Default for WorkerSelector {
    fn default() -> Self {
        Self::Only(WorkerId::new("1"))
    }
}

/// Object-count deltas per endpoint, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct EndpointHistory {
    samples: HashMap<String, Vec<i64>>,
}

impl EndpointHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta for `endpoint`.
    pub fn record(&mut self, endpoint: &str, delta: i64) {
        self.samples
            .entry(endpoint.to_string())
            .or_default()
            .push(delta);
    }

    /// Deltas recorded for `endpoint`.
    #[must_use]
    pub fn samples(&self, endpoint: &str) -> &[i64] {
        self.samples.get(endpoint).map_or(&[], Vec::as_slice)
    }

    /// Endpoints with at least one sample, sorted.
    #[must_use]
    pub fn endpoints(&self) -> Vec<&str> {
        let mut endpoints: Vec<&str> = self.samples.keys().map(String::as_str).collect();
        endpoints.sort_unstable();
        endpoints
    }

    /// Total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Measurements for the request in flight.
#[derive(Debug, Clone, Default)]
struct CycleSample {
    objects_before: u64,
    profile_before: ProfilerSnapshot,
    objects_after_handler: u64,
    endpoint: Option<String>,
}

/// Per-worker instrumentation of the request cycle.
#[derive(Debug)]
pub struct MetricsCollector {
    worker: WorkerId,
    active: bool,
    history: EndpointHistory,
    sink: Option<DiagnosticSink>,
    current: Option<CycleSample>,
    last_record: Option<DiagnosticRecord>,
}

impl MetricsCollector {
    /// Creates a collector for `worker`, active only if `selector` matches.
    #[must_use]
    pub fn new(selector: &WorkerSelector, worker: WorkerId) -> Self {
        let active = selector.matches(&worker);
        Self {
            worker,
            active,
            history: EndpointHistory::new(),
            sink: None,
            current: None,
            last_record: None,
        }
    }

    /// Writes records to `<dir>/oobgc-worker-<id>.csv`.
    #[must_use]
    pub fn with_log_dir(mut self, dir: &Path) -> Self {
        self.sink = Some(DiagnosticSink::new(dir, &self.worker));
        self
    }

    /// Whether this worker is instrumented.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Recorded history.
    #[must_use]
    pub const fn history(&self) -> &EndpointHistory {
        &self.history
    }

    /// Most recent diagnostic record.
    #[must_use]
    pub const fn last_record(&self) -> Option<&DiagnosticRecord> {
        self.last_record.as_ref()
    }

    /// Diagnostic sink, if configured.
    #[must_use]
    pub const fn sink(&self) -> Option<&DiagnosticSink> {
        self.sink.as_ref()
    }

    /// Phase 1: start profiling and snapshot the heap.
    pub fn on_begin<C: ReclamationController + ?Sized>(&mut self, controller: &C) {
        if !self.active {
            return;
        }
        controller.start_profiler();
        self.current = Some(CycleSample {
            objects_before: controller.live_objects(),
            profile_before: ProfilerSnapshot::from_report(&controller.profiler_report()),
            ..CycleSample::default()
        });
    }

    /// Phase 3: snapshot after the handler and resolve the endpoint.
    pub fn on_response<C: ReclamationController + ?Sized>(
        &mut self,
        ctx: &RequestContext,
        controller: &C,
    ) {
        let Some(sample) = self.current.as_mut() else {
            return;
        };
        sample.objects_after_handler = controller.live_objects();
        sample.endpoint = ctx.params().endpoint();
    }

    /// Phase 4, after a pass: record the delta and emit the record.
    pub fn on_reclaimed<C: ReclamationController + ?Sized>(
        &mut self,
        ctx: &RequestContext,
        controller: &C,
        outcome: &ReclaimOutcome,
    ) {
        let Some(sample) = self.current.take() else {
            return;
        };

        let objects_after_reclaim = controller.live_objects();
        let profile_after = ProfilerSnapshot::from_report(&controller.profiler_report());
        let endpoint = sample
            .endpoint
            .unwrap_or_else(|| UNKNOWN_ENDPOINT.to_string());
        let delta = signed_delta(objects_after_reclaim, sample.objects_before);

        self.history.record(&endpoint, delta);

        let record = DiagnosticRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            worker: self.worker.to_string(),
            path: ctx.path().to_string(),
            endpoint,
            delta_objects: delta,
            objects_before: sample.objects_before,
            objects_after_handler: sample.objects_after_handler,
            objects_after_reclaim,
            profiler_invocations: profile_after.invocations,
            use_bytes_before: sample.profile_before.use_bytes,
            use_bytes_after: profile_after.use_bytes,
            total_bytes_before: sample.profile_before.total_bytes,
            total_bytes_after: profile_after.total_bytes,
            total_objects_before: sample.profile_before.total_objects,
            total_objects_after: profile_after.total_objects,
            reclaim_ms: outcome.duration_ms(),
        };

        info!(
            target: "oobgc::diagnostic",
            worker = %record.worker,
            path = %record.path,
            endpoint = %record.endpoint,
            delta_objects = record.delta_objects,
            objects_before = record.objects_before,
            objects_after_handler = record.objects_after_handler,
            objects_after_reclaim = record.objects_after_reclaim,
            profiler_invocations = ?record.profiler_invocations,
            use_bytes_before = ?record.use_bytes_before,
            use_bytes_after = ?record.use_bytes_after,
            total_bytes_before = ?record.total_bytes_before,
            total_bytes_after = ?record.total_bytes_after,
            total_objects_before = ?record.total_objects_before,
            total_objects_after = ?record.total_objects_after,
            reclaim_ms = record.reclaim_ms,
            "Reclamation sample"
        );

        if let Some(sink) = self.sink.as_mut() {
            sink.write(&record);
        }
        self.last_record = Some(record);
    }

    /// Phase 4 without a pass: discard the sample.
    pub fn on_skipped(&mut self) {
        self.current = None;
    }
}
