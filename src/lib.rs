//! # oobgc
//!
//! Out-of-band reclamation scheduling for request-serving processes.
//!
//! Expensive reclamation work (destroying large request-scoped values) is
//! kept out of the client-visible request path. Around every request the
//! host calls into a [`RequestCycle`]; once the response body has been
//! written, a [`TriggerPolicy`] decides whether a synchronous reclamation
//! pass runs before the next request is accepted.
//!
//! ## Features
//!
//! - Composable trigger policies (interval, path match, memory threshold with
//!   fallback degradation, composite)
//! - A deferred-drop heap that reclaims only when asked to
//! - Optional per-endpoint instrumentation with a diagnostic CSV log
//!
//! ## Example
//!
//! ```rust,ignore
//! use oobgc::{DeferredHeap, IntervalTrigger, RequestCycle, TriggerPolicy, WorkerId};
//! use std::sync::Arc;
//!
//! let heap = Arc::new(DeferredHeap::default());
//! let policy = TriggerPolicy::Interval(IntervalTrigger::new(10)?);
//! let mut cycle = RequestCycle::new(handler, policy, Arc::clone(&heap), WorkerId::new("1"));
//!
//! let in_flight = cycle.call(&request);
//! write_to_socket(in_flight.response())?;
//! let outcome = in_flight.close();
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod context;
pub mod heap;
pub mod instrument;
pub mod middleware;
pub mod observability;
pub mod policy;
pub mod probe;

pub use config::{OobGcConfig, PolicyConfig};
pub use context::{RequestContext, RouteParams, WorkerId};
pub use heap::{DeferredHeap, HeapStats, ReclaimOutcome, ReclamationController};
pub use instrument::{EndpointHistory, MetricsCollector, ProfilerSnapshot, WorkerSelector};
pub use middleware::{CycleOutcome, Handler, InFlight, RequestCycle, ResponseBody};
pub use policy::{
    CompositePolicy, IntervalTrigger, MemoryThresholdTrigger, PathTrigger, TriggerPolicy,
};
pub use probe::{MemoryProbe, ProcessMemoryProbe, ScriptedProbe};

/// Error type for oobgc operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Zero intervals, malformed path patterns, bad config values |
/// | `OperationFailed` | Probe reads, config and log file I/O, subscriber init |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An interval of zero is configured
    /// - A path pattern is not a valid regex
    /// - A config file names an unknown policy kind
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The process memory accounting source cannot be read or parsed
    /// - Config or diagnostic log files cannot be read, created or written
    /// - The tracing subscriber is already installed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for oobgc operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("interval must be positive".to_string());
        assert_eq!(err.to_string(), "invalid input: interval must be positive");

        let err = Error::OperationFailed {
            operation: "read_proc_status".to_string(),
            cause: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'read_proc_status' failed: permission denied"
        );
    }
}
