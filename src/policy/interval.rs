//! Fixed-cadence trigger.

use crate::{Error, Result};

/// Fires on every `interval`-th decision.
///
/// The countdown starts at `interval`, drops by one per decision and is
/// reset to `interval` when it reaches zero, so the first `true` comes at
/// exactly the `interval`-th call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTrigger {
    interval: u32,
    countdown: u32,
}

impl IntervalTrigger {
    /// Creates an interval trigger.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when `interval` is zero.
    pub fn new(interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(Error::InvalidInput(
                "interval must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            interval,
            countdown: interval,
        })
    }

    /// Advances the countdown and reports whether this request should reclaim.
    pub const fn decide(&mut self) -> bool {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.countdown = self.interval;
            true
        } else {
            false
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// Decisions left until the next `true`.
    #[must_use]
    pub const fn countdown(&self) -> u32 {
        self.countdown
    }
}
