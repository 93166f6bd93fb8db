//! Property-based tests for trigger policies.
//!
//! Uses proptest to verify decision invariants across random inputs:
//! - Interval fires exactly on multiples of N
//! - Path decisions depend only on the path
//! - Composite is the OR of its children, each advanced once per call
//! - Memory threshold never degrades while readings stay below the limit

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use oobgc::{
    CompositePolicy, IntervalTrigger, MemoryThresholdTrigger, PathTrigger, RequestContext,
    ScriptedProbe, TriggerPolicy, WorkerId,
};
use proptest::prelude::*;
use regex::Regex;

fn ctx(path: &str) -> RequestContext {
    RequestContext::new(path, WorkerId::new("1"))
}

fn interval(n: u32) -> TriggerPolicy {
    TriggerPolicy::Interval(IntervalTrigger::new(n).expect("positive interval"))
}

proptest! {
    /// Property: interval N fires first on call N, then every N calls.
    #[test]
    fn prop_interval_fires_on_multiples(n in 1_u32..20, calls in 1_usize..200) {
        let mut policy = interval(n);
        for call in 1..=calls {
            let expected = call % n as usize == 0;
            prop_assert_eq!(policy.decide(&ctx("/")), expected, "call {}", call);
        }
    }

    /// Property: path decisions equal the regex match, whatever came before.
    #[test]
    fn prop_path_matches_regex(
        paths in prop::collection::vec("/[a-z]{0,3}(/[a-z]{0,3}){0,2}", 1..30),
    ) {
        let pattern = "^/a";
        let regex = Regex::new(pattern).unwrap();
        let mut policy = TriggerPolicy::Path(PathTrigger::new(pattern).unwrap());
        for path in &paths {
            prop_assert_eq!(policy.decide(&ctx(path)), regex.is_match(path));
        }
    }

    /// Property: composite of two intervals is the OR of standalone twins.
    #[test]
    fn prop_composite_is_or_of_children(a in 1_u32..10, b in 1_u32..10, calls in 1_usize..100) {
        let mut composite = TriggerPolicy::Composite(CompositePolicy::new(vec![interval(a), interval(b)]));
        let mut left = interval(a);
        let mut right = interval(b);

        for _ in 0..calls {
            let expected = left.decide(&ctx("/")) | right.decide(&ctx("/"));
            prop_assert_eq!(composite.decide(&ctx("/")), expected);
        }
    }

    /// Property: readings below the limit never degrade the trigger.
    #[test]
    fn prop_memory_stays_successful_below_limit(
        readings in prop::collection::vec(0_u64..1000, 1..50),
    ) {
        let probe = ScriptedProbe::from_readings(readings.clone());
        let mut trigger = MemoryThresholdTrigger::new(1000, 3, probe).unwrap();
        for _ in &readings {
            trigger.decide();
            trigger.after_reclaim();
        }
        prop_assert!(trigger.is_successful());
    }

    /// Property: once degraded, a memory trigger follows its fallback cadence.
    #[test]
    fn prop_memory_degrade_is_permanent(fallback in 1_u32..10, calls in 1_usize..60) {
        let probe = ScriptedProbe::from_readings([2000, 2000, 0]);
        let mut trigger = MemoryThresholdTrigger::new(1000, fallback, probe).unwrap();

        prop_assert!(trigger.decide());
        trigger.after_reclaim();
        prop_assert!(!trigger.is_successful());

        for call in 1..=calls {
            let fired = trigger.decide();
            if fired {
                trigger.after_reclaim();
            }
            prop_assert_eq!(fired, call % fallback as usize == 0);
        }
        prop_assert!(!trigger.is_successful());
    }
}
