//! Trigger policies.
//!
//! A [`TriggerPolicy`] decides, once per request and after the handler has
//! produced its response, whether a reclamation pass should run before the
//! next request is accepted. Variants own their state for the life of the
//! process; `decide` is the only place that state advances.
//!
//! | Variant | Fires when | State |
//! |---------|------------|-------|
//! | `Always` | every request | none |
//! | `Interval` | every N-th request | countdown |
//! | `Path` | the path matches a regex | none |
//! | `MemoryThreshold` | resident memory is above a limit | success flag, fallback countdown |
//! | `Composite` | any child fires | children |
//!
//! # Example
//!
//! ```rust,ignore
//! use oobgc::{CompositePolicy, IntervalTrigger, PathTrigger, TriggerPolicy};
//!
//! let policy = TriggerPolicy::Composite(
//!     CompositePolicy::default()
//!         .with(TriggerPolicy::Path(PathTrigger::new("^/reports/")?))
//!         .with(TriggerPolicy::Interval(IntervalTrigger::new(50)?)),
//! );
//! ```

mod composite;
mod interval;
mod memory;
mod path;

pub use composite::CompositePolicy;
pub use interval::IntervalTrigger;
pub use memory::MemoryThresholdTrigger;
pub use path::PathTrigger;

use crate::context::RequestContext;
use tracing::debug;

/// Closed set of reclamation trigger strategies.
#[derive(Debug)]
pub enum TriggerPolicy {
    /// Reclaim after every request.
    Always,
    /// Reclaim every N requests.
    Interval(IntervalTrigger),
    /// Reclaim when the path matches.
    Path(PathTrigger),
    /// Reclaim while memory is over a limit, degrading to an interval.
    MemoryThreshold(MemoryThresholdTrigger),
    /// Reclaim when any child policy fires.
    Composite(CompositePolicy),
}

impl TriggerPolicy {
    /// Decides whether this request is followed by a reclamation pass.
    ///
    /// Must be called exactly once per request.
    pub fn decide(&mut self, ctx: &RequestContext) -> bool {
        let triggered = match self {
            Self::Always => true,
            Self::Interval(trigger) => trigger.decide(),
            Self::Path(trigger) => trigger.decide(ctx.path()),
            Self::MemoryThreshold(trigger) => trigger.decide(),
            Self::Composite(composite) => composite.decide(ctx),
        };
        debug!(policy = %self.describe(), path = ctx.path(), triggered, "Trigger decision");
        triggered
    }

    /// Hook invoked after a pass actually ran.
    pub fn after_reclaim(&mut self, ctx: &RequestContext) {
        match self {
            Self::MemoryThreshold(trigger) => trigger.after_reclaim(),
            Self::Composite(composite) => composite.after_reclaim(ctx),
            Self::Always | Self::Interval(_) | Self::Path(_) => {},
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Always => "always".to_string(),
            Self::Interval(trigger) => format!("interval({})", trigger.interval()),
            Self::Path(trigger) => format!("path({})", trigger.pattern()),
            Self::MemoryThreshold(trigger) => format!(
                "memory(max={}, fallback={}{})",
                trigger.max_bytes(),
                trigger.fallback().interval(),
                if trigger.is_successful() {
                    ""
                } else {
                    ", degraded"
                }
            ),
            Self::Composite(composite) => {
                let parts: Vec<String> = composite
                    .policies()
                    .iter()
                    .map(Self::describe)
                    .collect();
                format!("any[{}]", parts.join(", "))
            },
        }
    }
}
