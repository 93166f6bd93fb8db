//! Simulate CLI command.
//!
//! Replays a stream of request paths through a [`RequestCycle`] backed by a
//! [`DeferredHeap`]. Each simulated handler defers a payload into the heap
//! and names its endpoint after the first two path segments.

use crate::config::OobGcConfig;
use crate::context::{ACTION_PARAM, CONTROLLER_PARAM, RequestContext, WorkerId};
use crate::heap::{DeferredHeap, ReclamationController};
use crate::middleware::RequestCycle;
use crate::probe::{MemoryProbe, ScriptedProbe};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::BufRead;
use std::sync::Arc;
use tracing::info;

/// Options for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Bytes each request defers into the heap.
    pub payload_bytes: usize,
    /// Scripted resident memory readings for memory policies.
    ///
    /// Empty means the real process is probed.
    pub memory_readings: Vec<u64>,
    /// Worker id of the simulated cycle.
    pub worker: WorkerId,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            payload_bytes: 4096,
            memory_readings: Vec::new(),
            worker: WorkerId::new("1"),
        }
    }
}

/// Outcome of one simulated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStep {
    /// 1-based request number.
    pub request: usize,
    /// Request path.
    pub path: String,
    /// Whether a pass ran after this request.
    pub reclaimed: bool,
    /// Objects destroyed by the pass.
    pub objects_reclaimed: u64,
    /// Bytes released by the pass.
    pub bytes_reclaimed: u64,
    /// Objects left in the heap after the request.
    pub live_objects: u64,
}

/// Result of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Policy description.
    pub policy: String,
    /// Per-request outcomes.
    pub steps: Vec<SimulationStep>,
    /// Object deltas per endpoint, when instrumentation was enabled.
    pub history: BTreeMap<String, Vec<i64>>,
}

impl SimulationReport {
    /// Request numbers followed by a pass.
    #[must_use]
    pub fn reclaimed_requests(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|step| step.reclaimed)
            .map(|step| step.request)
            .collect()
    }

    /// Renders a plain-text table.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "policy: {}", self.policy);
        let _ = writeln!(
            out,
            "{:>7}  {:<32}  {:>9}  {:>9}  {:>12}",
            "request", "path", "reclaimed", "objects", "live_after"
        );
        for step in &self.steps {
            let _ = writeln!(
                out,
                "{:>7}  {:<32}  {:>9}  {:>9}  {:>12}",
                step.request,
                step.path,
                if step.reclaimed { "yes" } else { "-" },
                step.objects_reclaimed,
                step.live_objects
            );
        }
        let _ = writeln!(
            out,
            "{} of {} requests reclaimed",
            self.reclaimed_requests().len(),
            self.steps.len()
        );
        for (endpoint, deltas) in &self.history {
            let _ = writeln!(out, "{endpoint}: {deltas:?}");
        }
        out
    }
}

/// Reads request paths, one per line. Blank lines and `#` comments are
/// skipped.
///
/// # Errors
///
/// Returns an error if the reader fails.
pub fn read_paths(reader: impl BufRead) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::OperationFailed {
            operation: "read_paths".to_string(),
            cause: e.to_string(),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        paths.push(trimmed.to_string());
    }
    Ok(paths)
}

/// Names the endpoint after the first two path segments.
fn route(ctx: &mut RequestContext) {
    let path = ctx.path().to_string();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    if let Some(controller) = segments.next() {
        let action = segments.next().unwrap_or("index");
        ctx.params_mut().insert(CONTROLLER_PARAM, controller);
        ctx.params_mut().insert(ACTION_PARAM, action);
    }
}

/// Replays `paths` through the configured policy.
///
/// # Errors
///
/// Returns an error if the policy configuration is invalid or a path is not
/// a valid request URI.
pub fn run_simulation(
    config: &OobGcConfig,
    paths: &[String],
    options: &SimulateOptions,
) -> Result<SimulationReport> {
    let policy = if options.memory_readings.is_empty() {
        config.policy.build()?
    } else {
        let probe = Arc::new(ScriptedProbe::from_readings(
            options.memory_readings.iter().copied(),
        ));
        config.policy.build_with(&mut || -> Box<dyn MemoryProbe> {
            Box::new(Arc::clone(&probe))
        })?
    };
    let description = policy.describe();

    let heap = Arc::new(DeferredHeap::new(config.heap.clone()));
    let handler_heap = Arc::clone(&heap);
    let payload_bytes = options.payload_bytes;
    let handler = move |ctx: &mut RequestContext| {
        route(ctx);
        handler_heap.defer_sized(vec![0_u8; payload_bytes], payload_bytes);
        http::Response::new(String::from("ok"))
    };

    let mut cycle = RequestCycle::new(handler, policy, Arc::clone(&heap), options.worker.clone());
    if let Some(collector) = config.instrumentation.collector(options.worker.clone()) {
        cycle = cycle.with_collector(collector);
    }

    let mut steps = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let request = http::Request::get(path.as_str())
            .body(())
            .map_err(|e| Error::InvalidInput(format!("invalid request path '{path}': {e}")))?;

        let outcome = cycle.call(&request).close();
        steps.push(SimulationStep {
            request: index + 1,
            path: path.clone(),
            reclaimed: outcome.did_reclaim(),
            objects_reclaimed: outcome.reclaimed.map_or(0, |o| o.objects_reclaimed),
            bytes_reclaimed: outcome.reclaimed.map_or(0, |o| o.bytes_reclaimed),
            live_objects: heap.live_objects(),
        });
    }

    let history = cycle
        .collector()
        .map(|collector| {
            let history = collector.history();
            history
                .endpoints()
                .into_iter()
                .map(|endpoint| (endpoint.to_string(), history.samples(endpoint).to_vec()))
                .collect()
        })
        .unwrap_or_default();

    let report = SimulationReport {
        policy: description,
        steps,
        history,
    };
    info!(
        policy = %report.policy,
        requests = report.steps.len(),
        passes = report.reclaimed_requests().len(),
        "Simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::instrument::WorkerSelector;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn test_read_paths_skips_blanks_and_comments() {
        let input = "/a\n\n# comment\n  /b  \n";
        let parsed = read_paths(input.as_bytes()).expect("read");
        assert_eq!(parsed, ["/a", "/b"]);
    }

    #[test]
    fn test_interval_simulation() {
        let config = OobGcConfig::new().with_policy(PolicyConfig::Interval { interval: 3 });
        let report = run_simulation(
            &config,
            &paths(&["/a", "/b", "/c", "/d", "/e", "/f", "/g"]),
            &SimulateOptions::default(),
        )
        .expect("simulate");

        assert_eq!(report.reclaimed_requests(), [3, 6]);
        assert_eq!(report.steps[2].objects_reclaimed, 3);
        assert_eq!(report.steps[6].live_objects, 1);
        assert!(report.render().contains("2 of 7 requests reclaimed"));
    }

    #[test]
    fn test_memory_simulation_with_scripted_readings() {
        const MB: u64 = 1024 * 1024;
        let config = OobGcConfig::new().with_policy(PolicyConfig::Memory {
            max_bytes: 100 * MB,
            fallback_interval: 2,
        });
        let options = SimulateOptions {
            memory_readings: vec![150 * MB, 120 * MB],
            ..SimulateOptions::default()
        };
        let report =
            run_simulation(&config, &paths(&["/a", "/b", "/c", "/d"]), &options).expect("simulate");

        // The first pass leaves usage above the limit, so the fallback takes over.
        assert_eq!(report.reclaimed_requests(), [1, 3]);
        assert!(report.policy.starts_with("memory("));
    }

    #[test]
    fn test_instrumented_simulation_records_history() {
        let mut config = OobGcConfig::new();
        config.instrumentation.enabled = true;
        config.instrumentation.worker_selector = WorkerSelector::All;

        let report = run_simulation(
            &config,
            &paths(&["/reports/daily", "/"]),
            &SimulateOptions::default(),
        )
        .expect("simulate");

        assert_eq!(report.history.get("reports#daily"), Some(&vec![0]));
        assert_eq!(report.history.get("unknown"), Some(&vec![0]));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let config = OobGcConfig::new().with_policy(PolicyConfig::Interval { interval: 0 });
        assert!(run_simulation(&config, &paths(&["/"]), &SimulateOptions::default()).is_err());
    }
}
