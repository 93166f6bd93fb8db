//! Reclamation mechanism.
//!
//! [`ReclamationController`] is the seam between the request cycle and
//! whatever actually reclaims memory. The cycle only needs to suspend it,
//! resume it, force a synchronous pass, and (for instrumentation) read a
//! live-object count and a profiler report.
//!
//! [`DeferredHeap`] is the built-in mechanism: handlers move expensive
//! values into the heap instead of dropping them inline, and the heap
//! destroys them during a pass.
//!
//! # Implicit passes
//!
//! While enabled, `defer` runs a pass on its own once pending bytes exceed
//! [`HeapConfig::implicit_threshold_bytes`]. The request cycle keeps the heap
//! disabled for the whole request, so implicit passes only happen outside
//! of it (for example on background threads deferring into a shared heap).
//!
//! # Example
//!
//! ```rust
//! use oobgc::{DeferredHeap, ReclamationController};
//!
//! let heap = DeferredHeap::default();
//! heap.disable();
//! heap.defer(vec![0_u8; 4096]);
//! assert_eq!(heap.live_objects(), 1);
//!
//! let outcome = heap.run().unwrap();
//! assert_eq!(outcome.objects_reclaimed, 1);
//! assert_eq!(heap.live_objects(), 0);
//! ```

mod profiler;

pub use profiler::{ProfileRecord, REPORT_COLUMNS};

use crate::Result;
use profiler::Profiler;
use std::any::Any;
use std::mem::size_of;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default pending-byte threshold for implicit passes (64 MiB).
pub const DEFAULT_IMPLICIT_THRESHOLD_BYTES: usize = 64 * 1024 * 1024;

/// Default number of per-pass records the profiler keeps.
pub const DEFAULT_PROFILER_CAPACITY: usize = 256;

/// Converts a Duration to milliseconds as f64 for metrics.
#[inline]
fn duration_to_ms_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Converts u64 to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn u64_to_f64(value: u64) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Control surface over a reclamation mechanism.
///
/// Implementations use interior mutability: the controller is shared between
/// the request cycle and the handler that feeds it.
pub trait ReclamationController: Send + Sync {
    /// Suspends implicit reclamation.
    fn disable(&self);

    /// Resumes implicit reclamation.
    fn enable(&self);

    /// Returns `true` while implicit reclamation is allowed.
    fn is_enabled(&self) -> bool;

    /// Runs a synchronous reclamation pass.
    fn run(&self) -> Result<ReclaimOutcome>;

    /// Number of objects currently held by the mechanism.
    fn live_objects(&self) -> u64;

    /// Starts recording per-pass profile data.
    fn start_profiler(&self) {}

    /// Textual profiler report; empty when nothing was recorded.
    fn profiler_report(&self) -> String {
        String::new()
    }
}

/// Result of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Objects destroyed by the pass.
    pub objects_reclaimed: u64,
    /// Estimated bytes released by the pass.
    pub bytes_reclaimed: u64,
    /// Wall time spent in the pass.
    pub duration: Duration,
}

impl ReclaimOutcome {
    /// Duration in milliseconds as a float.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_to_ms_f64(self.duration)
    }
}

/// Heap configuration.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Pending bytes above which an enabled heap reclaims on its own.
    pub implicit_threshold_bytes: usize,
    /// Per-pass records kept by the profiler.
    pub profiler_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            implicit_threshold_bytes: DEFAULT_IMPLICIT_THRESHOLD_BYTES,
            profiler_capacity: DEFAULT_PROFILER_CAPACITY,
        }
    }
}

impl HeapConfig {
    /// Creates a heap config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the implicit pass threshold.
    #[must_use]
    pub const fn with_implicit_threshold_bytes(mut self, bytes: usize) -> Self {
        self.implicit_threshold_bytes = bytes;
        self
    }

    /// Sets the profiler record capacity.
    #[must_use]
    pub const fn with_profiler_capacity(mut self, capacity: usize) -> Self {
        self.profiler_capacity = capacity;
        self
    }
}

/// Point-in-time heap counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects waiting for a pass.
    pub live_objects: u64,
    /// Estimated bytes waiting for a pass.
    pub pending_bytes: u64,
    /// Pending bytes plus the bookkeeping buffer.
    pub capacity_bytes: u64,
    /// Objects ever handed to the heap.
    pub total_objects: u64,
    /// Passes run, forced and implicit.
    pub collections: u64,
    /// Passes the heap started on its own.
    pub implicit_collections: u64,
    /// Objects destroyed across all passes.
    pub objects_reclaimed: u64,
    /// Bytes released across all passes.
    pub bytes_reclaimed: u64,
}

/// A value waiting to be destroyed.
type Garbage = Box<dyn Any + Send>;

struct HeapState {
    pending: Vec<Garbage>,
    pending_bytes: usize,
    enabled: bool,
    total_objects: u64,
    collections: u64,
    implicit_collections: u64,
    objects_reclaimed: u64,
    bytes_reclaimed: u64,
    profiler: Profiler,
}

impl HeapState {
    fn capacity_bytes(&self) -> u64 {
        let bookkeeping = self.pending.capacity().saturating_mul(size_of::<Garbage>());
        (self.pending_bytes.saturating_add(bookkeeping)) as u64
    }
}

/// Deferred-drop heap.
pub struct DeferredHeap {
    state: Mutex<HeapState>,
    config: HeapConfig,
    created_at: Instant,
}

impl std::fmt::Debug for DeferredHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredHeap")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for DeferredHeap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

/// Which side started a pass.
#[derive(Debug, Clone, Copy)]
enum PassKind {
    Forced,
    Implicit,
}

impl PassKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Implicit => "implicit",
        }
    }
}

impl DeferredHeap {
    /// Creates an enabled heap.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        let profiler = Profiler::new(config.profiler_capacity);
        Self {
            state: Mutex::new(HeapState {
                pending: Vec::new(),
                pending_bytes: 0,
                enabled: true,
                total_objects: 0,
                collections: 0,
                implicit_collections: 0,
                objects_reclaimed: 0,
                bytes_reclaimed: 0,
                profiler,
            }),
            config,
            created_at: Instant::now(),
        }
    }

    /// Heap configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Hands `value` to the heap, estimating its size as `size_of::<T>()`.
    pub fn defer<T: Send + 'static>(&self, value: T) {
        self.defer_sized(value, size_of::<T>());
    }

    /// Hands `value` to the heap with an explicit byte estimate.
    ///
    /// Use this for values owning heap allocations (`Vec`, `String`, maps),
    /// whose `size_of` only covers the handle.
    pub fn defer_sized<T: Send + 'static>(&self, value: T, bytes: usize) {
        let should_collect = {
            let mut state = self.lock();
            state.pending.push(Box::new(value));
            state.pending_bytes = state.pending_bytes.saturating_add(bytes);
            state.total_objects += 1;
            state.enabled && state.pending_bytes > self.config.implicit_threshold_bytes
        };

        if should_collect {
            self.collect(PassKind::Implicit);
        }
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let state = self.lock();
        HeapStats {
            live_objects: state.pending.len() as u64,
            pending_bytes: state.pending_bytes as u64,
            capacity_bytes: state.capacity_bytes(),
            total_objects: state.total_objects,
            collections: state.collections,
            implicit_collections: state.implicit_collections,
            objects_reclaimed: state.objects_reclaimed,
            bytes_reclaimed: state.bytes_reclaimed,
        }
    }

    /// Stops recording profile data.
    pub fn stop_profiler(&self) {
        self.lock().profiler.stop();
    }

    /// Whether passes are being profiled.
    #[must_use]
    pub fn is_profiling(&self) -> bool {
        self.lock().profiler.is_enabled()
    }

    /// Drops recorded profile data.
    pub fn clear_profiler(&self) {
        self.lock().profiler.clear();
    }

    fn lock(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a pass. Values are destroyed outside the lock so their
    /// destructors may defer into the heap again.
    #[instrument(name = "oobgc.heap.collect", skip(self, kind), fields(kind = kind.as_str()))]
    fn collect(&self, kind: PassKind) -> ReclaimOutcome {
        let invoked_at = self.created_at.elapsed();
        let (garbage, bytes, total_bytes, total_objects) = {
            let mut state = self.lock();
            let total_bytes = state.capacity_bytes();
            let bytes = std::mem::take(&mut state.pending_bytes);
            let garbage = std::mem::take(&mut state.pending);
            (garbage, bytes, total_bytes, state.total_objects)
        };

        let objects = garbage.len() as u64;
        let start = Instant::now();
        drop(garbage);
        let duration = start.elapsed();

        let outcome = ReclaimOutcome {
            objects_reclaimed: objects,
            bytes_reclaimed: bytes as u64,
            duration,
        };

        {
            let mut state = self.lock();
            state.collections += 1;
            if matches!(kind, PassKind::Implicit) {
                state.implicit_collections += 1;
            }
            state.objects_reclaimed += outcome.objects_reclaimed;
            state.bytes_reclaimed += outcome.bytes_reclaimed;
            state.profiler.record(ProfileRecord {
                invoked_at,
                use_bytes: bytes as u64,
                total_bytes,
                total_objects,
                duration,
            });
        }

        metrics::counter!("oobgc_reclaim_runs_total", "kind" => kind.as_str()).increment(1);
        metrics::histogram!("oobgc_reclaim_duration_ms").record(outcome.duration_ms());
        metrics::histogram!("oobgc_reclaimed_objects").record(u64_to_f64(objects));

        debug!(
            objects_reclaimed = outcome.objects_reclaimed,
            bytes_reclaimed = outcome.bytes_reclaimed,
            duration_ms = outcome.duration_ms(),
            "Reclamation pass finished"
        );

        outcome
    }
}

impl ReclamationController for DeferredHeap {
    fn disable(&self) {
        self.lock().enabled = false;
    }

    /// Re-allows implicit passes. A backlog above the threshold is left for
    /// the next forced pass or the next `defer` while enabled.
    fn enable(&self) {
        self.lock().enabled = true;
    }

    fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    fn run(&self) -> Result<ReclaimOutcome> {
        Ok(self.collect(PassKind::Forced))
    }

    fn live_objects(&self) -> u64 {
        self.lock().pending.len() as u64
    }

    fn start_profiler(&self) {
        self.lock().profiler.start();
    }

    fn profiler_report(&self) -> String {
        self.lock().profiler.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_disabled_heap_accumulates() {
        let heap = DeferredHeap::new(HeapConfig::new().with_implicit_threshold_bytes(8));
        heap.disable();
        let dropped = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            heap.defer_sized(DropCounter(Arc::clone(&dropped)), 16);
        }

        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(heap.live_objects(), 4);
        assert_eq!(heap.stats().pending_bytes, 64);
    }

    #[test]
    fn test_run_destroys_pending_values() {
        let heap = DeferredHeap::default();
        heap.disable();
        let dropped = Arc::new(AtomicUsize::new(0));
        heap.defer_sized(DropCounter(Arc::clone(&dropped)), 100);
        heap.defer_sized(DropCounter(Arc::clone(&dropped)), 50);

        let outcome = heap.run().expect("run");
        assert_eq!(outcome.objects_reclaimed, 2);
        assert_eq!(outcome.bytes_reclaimed, 150);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);

        let stats = heap.stats();
        assert_eq!(stats.live_objects, 0);
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.implicit_collections, 0);
        assert_eq!(stats.total_objects, 2);
        assert!(!heap.is_enabled(), "run must not change enabled state");
    }

    #[test]
    fn test_enabled_heap_collects_implicitly_over_threshold() {
        let heap = DeferredHeap::new(HeapConfig::new().with_implicit_threshold_bytes(100));
        heap.defer_sized(1_u8, 60);
        assert_eq!(heap.live_objects(), 1);

        heap.defer_sized(2_u8, 60);
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 0);
        assert_eq!(stats.implicit_collections, 1);
    }

    #[test]
    fn test_enable_leaves_backlog_for_next_pass() {
        let heap = DeferredHeap::new(HeapConfig::new().with_implicit_threshold_bytes(100));
        heap.disable();
        heap.defer_sized(1_u8, 500);
        assert_eq!(heap.live_objects(), 1);

        heap.enable();
        assert_eq!(heap.live_objects(), 1);
        assert_eq!(heap.stats().collections, 0);

        heap.defer_sized(2_u8, 1);
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 0);
        assert_eq!(stats.implicit_collections, 1);
    }

    #[test]
    fn test_destructor_may_defer_during_pass() {
        struct Reenter(Arc<DeferredHeap>);
        impl Drop for Reenter {
            fn drop(&mut self) {
                self.0.defer(7_u32);
            }
        }

        let heap = Arc::new(DeferredHeap::default());
        heap.disable();
        heap.defer(Reenter(Arc::clone(&heap)));
        let outcome = heap.run().expect("run");

        assert_eq!(outcome.objects_reclaimed, 1);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_profiler_report_only_when_started() {
        let heap = DeferredHeap::default();
        heap.run().expect("run");
        assert!(heap.profiler_report().is_empty());

        heap.start_profiler();
        heap.defer(0_u64);
        heap.run().expect("run");
        let report = heap.profiler_report();
        assert!(report.starts_with("GC 1 invokes."));

        heap.clear_profiler();
        assert!(heap.profiler_report().is_empty());
        assert!(heap.is_profiling());
        heap.stop_profiler();
        heap.run().expect("run");
        assert!(heap.profiler_report().is_empty());
    }
}
