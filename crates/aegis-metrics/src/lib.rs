//! Structured observability for the event pipeline.
//!
//! Provides:
//! - [`Counter`] / [`PipelineMetrics`] — atomic counters for every stage outcome
//! - [`MetricsExporter`] — Prometheus text format export
//! - [`DecisionLog`] — bounded in-memory log of gate decisions for operator triage

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic counters for every stage outcome in the pipeline (§10.4).
///
/// All counters are thread-safe and shared via [`Arc`] across the
/// Orchestrator's worker tasks.
///
/// # Example
/// ```rust
/// # use aegis_metrics::PipelineMetrics;
/// # use std::sync::Arc;
/// let metrics = Arc::new(PipelineMetrics::new());
/// metrics.events_ingested.inc();
/// assert_eq!(metrics.events_ingested.get(), 1);
/// ```
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub events_ingested: Counter,
    pub normalized: Counter,
    pub malformed: Counter,
    pub backpressure_rejections: Counter,
    pub scored: Counter,
    pub degraded_ml: Counter,
    pub triaged: Counter,
    pub analysis_fired: Counter,
    pub analysis_skipped: Counter,
    pub analysis_degraded: Counter,
    pub remediation_fired: Counter,
    pub remediation_skipped: Counter,
    pub remediation_failed: Counter,
    pub notified: Counter,
    pub stored: Counter,
    pub dead_lettered: Counter,
    pub slo_violations: Counter,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Exports [`PipelineMetrics`] in Prometheus text format.
pub struct MetricsExporter {
    metrics: Arc<PipelineMetrics>,
    prefix: String,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            metrics,
            prefix: "aegis".to_string(),
        }
    }

    pub fn with_prefix(metrics: Arc<PipelineMetrics>, prefix: impl Into<String>) -> Self {
        Self {
            metrics,
            prefix: prefix.into(),
        }
    }

    /// Render all counters as Prometheus text: `# HELP`, `# TYPE`, and a
    /// value line per metric.
    pub fn render(&self) -> String {
        let m = &self.metrics;
        let p = &self.prefix;
        let mut out = String::new();

        self.write_counter(&mut out, p, "events_ingested_total", "Total events accepted at ingress", m.events_ingested.get());
        self.write_counter(&mut out, p, "normalized_total", "Total events successfully normalized", m.normalized.get());
        self.write_counter(&mut out, p, "malformed_total", "Total events rejected as malformed", m.malformed.get());
        self.write_counter(&mut out, p, "backpressure_rejections_total", "Total enqueue attempts rejected by a full bus lane", m.backpressure_rejections.get());
        self.write_counter(&mut out, p, "scored_total", "Total events scored by the ML oracle", m.scored.get());
        self.write_counter(&mut out, p, "degraded_ml_total", "Total events scored with a degraded (zeroed) ML result", m.degraded_ml.get());
        self.write_counter(&mut out, p, "triaged_total", "Total events triaged", m.triaged.get());
        self.write_counter(&mut out, p, "analysis_fired_total", "Total deep-analysis gate firings", m.analysis_fired.get());
        self.write_counter(&mut out, p, "analysis_skipped_total", "Total deep-analysis gate skips", m.analysis_skipped.get());
        self.write_counter(&mut out, p, "analysis_degraded_total", "Total deep-analysis results degraded after retry exhaustion", m.analysis_degraded.get());
        self.write_counter(&mut out, p, "remediation_fired_total", "Total remediation gate firings", m.remediation_fired.get());
        self.write_counter(&mut out, p, "remediation_skipped_total", "Total remediation gate skips", m.remediation_skipped.get());
        self.write_counter(&mut out, p, "remediation_failed_total", "Total remediation attempts that failed after retry", m.remediation_failed.get());
        self.write_counter(&mut out, p, "notified_total", "Total notifications published", m.notified.get());
        self.write_counter(&mut out, p, "stored_total", "Total alerts written to the store", m.stored.get());
        self.write_counter(&mut out, p, "dead_lettered_total", "Total events routed to a dead-letter queue", m.dead_lettered.get());
        self.write_counter(&mut out, p, "slo_violations_total", "Total events that exceeded the end-to-end deadline", m.slo_violations.get());

        out
    }

    fn write_counter(&self, out: &mut String, prefix: &str, name: &str, help: &str, value: u64) {
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }
}

/// A single gate decision (deep-analysis fired/skipped, remediation
/// fired/skipped/failed) kept for operator triage via `query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub gate: String,
    pub outcome: String,
    pub reason: Option<String>,
}

/// Bounded in-memory log of gate decisions. Oldest entries are dropped
/// once `capacity` is reached — this is an operational aid, not a
/// durable record (the DLQ and the store cover durability).
pub struct DecisionLog {
    capacity: usize,
    entries: Mutex<VecDeque<DecisionEntry>>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, event_id: &str, gate: &str, outcome: &str, reason: Option<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(DecisionEntry {
            timestamp: Utc::now(),
            event_id: event_id.to_string(),
            gate: gate.to_string(),
            outcome: outcome.to_string(),
            reason,
        });
    }

    /// Most recent `limit` entries, newest first, optionally filtered by
    /// `event_id`.
    pub fn query(&self, event_id: Option<&str>, limit: usize) -> Vec<DecisionEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|e| event_id.is_none_or(|id| e.event_id == id))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.events_ingested.get(), 0);
        metrics.events_ingested.inc();
        metrics.events_ingested.inc();
        assert_eq!(metrics.events_ingested.get(), 2);
    }

    #[test]
    fn exporter_renders_help_type_and_value_lines() {
        let metrics = Arc::new(PipelineMetrics::new());
        metrics.scored.inc();
        let exporter = MetricsExporter::new(metrics);
        let rendered = exporter.render();
        assert!(rendered.contains("# HELP aegis_scored_total"));
        assert!(rendered.contains("# TYPE aegis_scored_total counter"));
        assert!(rendered.contains("aegis_scored_total 1"));
    }

    #[test]
    fn exporter_respects_custom_prefix() {
        let metrics = Arc::new(PipelineMetrics::new());
        let exporter = MetricsExporter::with_prefix(metrics, "sec_pipeline");
        assert!(exporter.render().contains("sec_pipeline_events_ingested_total"));
    }

    #[test]
    fn decision_log_query_filters_by_event_id() {
        let log = DecisionLog::new(100);
        log.record("e-1", "deep_analysis", "fire", None);
        log.record("e-2", "deep_analysis", "skip", Some("below threshold".to_string()));

        let results = log.query(Some("e-1"), 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, "fire");
    }

    #[test]
    fn decision_log_evicts_oldest_once_at_capacity() {
        let log = DecisionLog::new(2);
        log.record("e-1", "deep_analysis", "fire", None);
        log.record("e-2", "deep_analysis", "fire", None);
        log.record("e-3", "deep_analysis", "fire", None);

        let results = log.query(None, 10);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|e| e.event_id != "e-1"));
    }
}
