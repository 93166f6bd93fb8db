//! Report CLI command.

use crate::instrument::DiagnosticRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Aggregated diagnostic rows for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSummary {
    /// Endpoint identity.
    pub endpoint: String,
    /// Number of rows.
    pub samples: usize,
    /// Mean object delta.
    pub mean_delta: f64,
    /// Smallest object delta.
    pub min_delta: i64,
    /// Largest object delta.
    pub max_delta: i64,
    /// Mean pass duration in milliseconds.
    pub mean_reclaim_ms: f64,
}

#[allow(clippy::cast_precision_loss)]
fn mean(total: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// Groups diagnostic rows by endpoint, sorted by endpoint.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(records: &[DiagnosticRecord]) -> Vec<EndpointSummary> {
    let mut groups: BTreeMap<&str, Vec<&DiagnosticRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.endpoint.as_str()).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(endpoint, rows)| {
            let deltas = rows.iter().map(|r| r.delta_objects);
            EndpointSummary {
                endpoint: endpoint.to_string(),
                samples: rows.len(),
                mean_delta: mean(deltas.clone().map(|d| d as f64).sum(), rows.len()),
                min_delta: deltas.clone().min().unwrap_or_default(),
                max_delta: deltas.max().unwrap_or_default(),
                mean_reclaim_ms: mean(rows.iter().map(|r| r.reclaim_ms).sum(), rows.len()),
            }
        })
        .collect()
}

/// Renders summaries as a plain-text table.
#[must_use]
pub fn render_summaries(summaries: &[EndpointSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<32}  {:>7}  {:>10}  {:>8}  {:>8}  {:>10}",
        "endpoint", "samples", "mean_delta", "min", "max", "mean_ms"
    );
    for summary in summaries {
        let _ = writeln!(
            out,
            "{:<32}  {:>7}  {:>10.1}  {:>8}  {:>8}  {:>10.3}",
            summary.endpoint,
            summary.samples,
            summary.mean_delta,
            summary.min_delta,
            summary.max_delta,
            summary.mean_reclaim_ms
        );
    }
    out
}
