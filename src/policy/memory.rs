//! Memory-threshold trigger with interval fallback.

use super::IntervalTrigger;
use crate::Result;
use crate::probe::MemoryProbe;
use tracing::{debug, warn};

/// Fires while resident memory is above `max_bytes`.
///
/// After every pass the trigger re-reads memory. If the pass did not bring
/// usage back under the limit, the threshold strategy is considered
/// ineffective and every later decision uses the fallback interval instead.
/// The degrade is permanent for the life of the trigger.
pub struct MemoryThresholdTrigger {
    max_bytes: u64,
    successful: bool,
    fallback: IntervalTrigger,
    probe: Box<dyn MemoryProbe>,
}

impl std::fmt::Debug for MemoryThresholdTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryThresholdTrigger")
            .field("max_bytes", &self.max_bytes)
            .field("successful", &self.successful)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl MemoryThresholdTrigger {
    /// Creates a threshold trigger.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when `fallback_interval` is zero.
    pub fn new(
        max_bytes: u64,
        fallback_interval: u32,
        probe: impl MemoryProbe + 'static,
    ) -> Result<Self> {
        Ok(Self {
            max_bytes,
            successful: true,
            fallback: IntervalTrigger::new(fallback_interval)?,
            probe: Box::new(probe),
        })
    }

    /// Decides for the current request.
    ///
    /// Memory is only read while the threshold strategy is still trusted. A
    /// failed read falls through to the fallback interval.
    pub fn decide(&mut self) -> bool {
        if self.successful {
            match self.probe.resident_bytes() {
                Ok(usage) if usage > self.max_bytes => {
                    debug!(usage, max_bytes = self.max_bytes, "Memory above threshold");
                    return true;
                },
                Ok(_) => {},
                Err(e) => debug!(error = %e, "Memory probe failed, using fallback interval"),
            }
        }
        self.fallback.decide()
    }

    /// Re-measures memory after a pass.
    pub fn after_reclaim(&mut self) {
        if !self.successful {
            return;
        }
        match self.probe.resident_bytes() {
            Ok(usage) => {
                self.successful = usage < self.max_bytes;
                if !self.successful {
                    warn!(
                        usage,
                        max_bytes = self.max_bytes,
                        fallback_interval = self.fallback.interval(),
                        "Reclamation left memory above threshold, degrading to interval trigger"
                    );
                }
            },
            Err(e) => warn!(error = %e, "Memory probe failed after reclamation"),
        }
    }

    /// Whether the threshold strategy is still in use.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        self.successful
    }

    /// Configured limit in bytes.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// The fallback interval trigger.
    #[must_use]
    pub const fn fallback(&self) -> &IntervalTrigger {
        &self.fallback
    }
}
