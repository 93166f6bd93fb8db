//! Ordered combination of policies.

use super::TriggerPolicy;
use crate::context::RequestContext;

/// Fires when any child policy fires.
///
/// Every child is evaluated on every call, in order, so stateful children
/// (interval countdowns) advance exactly once per request regardless of
/// which child fired. Callers conventionally list the most restrictive
/// condition first; the order is kept but not enforced.
#[derive(Debug, Default)]
pub struct CompositePolicy {
    policies: Vec<TriggerPolicy>,
}

impl CompositePolicy {
    /// Creates a composite from an ordered list.
    #[must_use]
    pub const fn new(policies: Vec<TriggerPolicy>) -> Self {
        Self { policies }
    }

    /// Appends a policy.
    #[must_use]
    pub fn with(mut self, policy: TriggerPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Evaluates every child; `true` if any returned `true`.
    pub fn decide(&mut self, ctx: &RequestContext) -> bool {
        self.policies
            .iter_mut()
            .fold(false, |triggered, policy| policy.decide(ctx) | triggered)
    }

    /// Forwards the post-pass hook to every child.
    pub fn after_reclaim(&mut self, ctx: &RequestContext) {
        for policy in &mut self.policies {
            policy.after_reclaim(ctx);
        }
    }

    /// Child policies in evaluation order.
    #[must_use]
    pub fn policies(&self) -> &[TriggerPolicy] {
        &self.policies
    }

    /// Number of child policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if there are no child policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
