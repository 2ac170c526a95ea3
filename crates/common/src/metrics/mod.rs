//! Metrics and observability utilities
//!
//! Metric names follow `citeforge_<subject>_<unit>` and are recorded through
//! the `metrics` facade. Without an installed recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Citeforge metrics
pub const METRICS_PREFIX: &str = "citeforge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Metadata API
    describe_counter!(
        format!("{}_metadata_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total metadata lookups by outcome"
    );

    describe_histogram!(
        format!("{}_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of metadata and source fetches in seconds"
    );

    // Source downloads
    describe_counter!(
        format!("{}_source_downloads_total", METRICS_PREFIX),
        Unit::Count,
        "Total source bundle downloads by outcome"
    );

    describe_counter!(
        format!("{}_references_extracted_total", METRICS_PREFIX),
        Unit::Count,
        "Total bibliography references extracted"
    );

    // Resilience
    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Total retries of transient failures"
    );

    // Graph construction
    describe_gauge!(
        format!("{}_graph_nodes", METRICS_PREFIX),
        Unit::Count,
        "Nodes in the most recently built citation graph"
    );

    describe_gauge!(
        format!("{}_graph_edges", METRICS_PREFIX),
        Unit::Count,
        "Edges in the most recently built citation graph"
    );

    describe_counter!(
        format!("{}_graph_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Per-paper failures recorded during traversal"
    );

    tracing::debug!("Metrics registered");
}

/// Helper to record one remote fetch
pub struct FetchMetrics {
    start: Instant,
    kind: &'static str,
}

impl FetchMetrics {
    /// Start tracking a fetch of the given kind ("metadata" or "source")
    pub fn start(kind: &'static str) -> Self {
        Self {
            start: Instant::now(),
            kind,
        }
    }

    /// Record completion with an outcome label
    pub fn finish(self, outcome: &'static str) {
        let duration = self.start.elapsed().as_secs_f64();

        let name = match self.kind {
            "source" => format!("{}_source_downloads_total", METRICS_PREFIX),
            _ => format!("{}_metadata_requests_total", METRICS_PREFIX),
        };
        counter!(name, "outcome" => outcome).increment(1);

        histogram!(
            format!("{}_fetch_duration_seconds", METRICS_PREFIX),
            "kind" => self.kind
        )
        .record(duration);
    }
}

/// Record references extracted from one paper
pub fn record_references(count: usize) {
    counter!(format!("{}_references_extracted_total", METRICS_PREFIX)).increment(count as u64);
}

/// Record the shape of a finished graph
pub fn record_graph(nodes: usize, edges: usize, errors: usize) {
    gauge!(format!("{}_graph_nodes", METRICS_PREFIX)).set(nodes as f64);
    gauge!(format!("{}_graph_edges", METRICS_PREFIX)).set(edges as f64);
    counter!(format!("{}_graph_errors_total", METRICS_PREFIX)).increment(errors as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        register_metrics();
        FetchMetrics::start("metadata").finish("ok");
        FetchMetrics::start("source").finish("unavailable");
        record_references(12);
        record_graph(3, 3, 0);
    }
}
