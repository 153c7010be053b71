//! Ingress Adapter: the single entry point through which raw findings
//! enter the pipeline.
//!
//! Wraps the pure `aegis_normalize::normalize` call with the side effects
//! this boundary owns: ingest counters, dead-lettering malformed input,
//! and enqueueing onto the Event Bus. Both the CLI `submit` subcommand and
//! any future network-facing handler share this one code path.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aegis_bus::{BusError, EventBus};
use aegis_orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Result of a `submit` call (§6.1): `accepted=false` carries a `reason`
/// that is either retryable (`Backpressure`, `Draining`) or permanent
/// (`MalformedSource`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl SubmitOutcome {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// The only component permitted to call `Orchestrator::dead_letter_malformed`
/// and `EventBus::enqueue` — every raw finding passes through here first.
pub struct Ingress {
    bus: EventBus,
    orchestrator: Arc<Orchestrator>,
    draining: AtomicBool,
}

impl Ingress {
    pub fn new(bus: EventBus, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            bus,
            orchestrator,
            draining: AtomicBool::new(false),
        }
    }

    /// Normalize `raw` as a finding from `source` and enqueue it onto the
    /// bus. A non-object payload or one missing a required field fails
    /// normalization and is routed straight to the event DLQ — it never
    /// reaches the bus.
    pub fn submit(&self, source: &str, raw: &Value) -> SubmitOutcome {
        if self.draining.load(Ordering::SeqCst) {
            return SubmitOutcome::rejected("Draining");
        }

        self.orchestrator.metrics.events_ingested.inc();

        match aegis_normalize::normalize(source, raw) {
            Ok(outcome) => {
                self.orchestrator.metrics.normalized.inc();
                if outcome.severity_defaulted {
                    warn!(
                        event_id = %outcome.event.event_id,
                        source,
                        "native severity missing or unparseable, defaulted to MEDIUM"
                    );
                }
                let event_id = outcome.event.event_id.clone();
                match self.bus.enqueue(outcome.event) {
                    Ok(()) => {
                        info!(event_id = %event_id, source, "event accepted");
                        SubmitOutcome::accepted()
                    }
                    Err(BusError::Backpressure) => {
                        warn!(event_id = %event_id, source, "bus lane full, rejecting");
                        SubmitOutcome::rejected("Backpressure")
                    }
                }
            }
            Err(e) => {
                let raw_id = extract_id_for_dlq(raw);
                warn!(source, error = %e, "finding failed normalization");
                self.orchestrator
                    .dead_letter_malformed(&raw_id, &e.to_string());
                SubmitOutcome::rejected("MalformedSource")
            }
        }
    }

    /// Stop accepting new findings. In-flight events already enqueued
    /// continue to run to a terminal state (§5).
    pub fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Best-effort id extraction for DLQ bookkeeping when normalization itself
/// failed (so the canonical `event_id` was never derived). Mirrors the
/// candidate-key list the Normalizer tries, falling back to a fixed
/// placeholder when nothing matches.
fn extract_id_for_dlq(raw: &Value) -> String {
    const CANDIDATES: &[&str] = &["id", "Id", "finding_id", "FindingId", "Arn"];
    raw.as_object()
        .and_then(|obj| {
            CANDIDATES
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
        })
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_config::{PipelineConfig, SharedConfig};
    use aegis_dlq::DeadLetterQueue;
    use aegis_metrics::{DecisionLog, PipelineMetrics};
    use aegis_notify::DedupWindow;
    use aegis_oracle::{Effector, LlmAnalyzer, MlModel, MockEffector, MockLlmAnalyzer, MockMlModel, OracleHandle};
    use aegis_store::AlertStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn build_orchestrator(dir: &std::path::Path) -> Arc<Orchestrator> {
        let config = SharedConfig::new(PipelineConfig::default());
        let ml: OracleHandle<dyn MlModel> = OracleHandle::new(Arc::new(MockMlModel::fixed(10.0, 0.5)), 4);
        let llm: OracleHandle<dyn LlmAnalyzer> = OracleHandle::new(Arc::new(MockLlmAnalyzer::fixed("{}")), 4);
        let effector: OracleHandle<dyn Effector> = OracleHandle::new(Arc::new(MockEffector::always_succeeds()), 4);
        let store = Arc::new(AlertStore::open(dir, 3600));
        let event_dlq = Arc::new(Mutex::new(DeadLetterQueue::open(dir, "events")));
        let store_dlq = Arc::new(Mutex::new(DeadLetterQueue::open(dir, "store_failures")));
        let dedup = Arc::new(DedupWindow::new(Duration::from_secs(300), 10_000));
        let metrics = Arc::new(PipelineMetrics::new());
        let decisions = Arc::new(DecisionLog::new(1_000));
        let latencies = Arc::new(aegis_latency::StageLatencies::new(256));
        let concurrency = Arc::new(Semaphore::new(64));

        Arc::new(Orchestrator {
            config,
            ml,
            llm,
            effector,
            store,
            event_dlq,
            store_dlq,
            dedup,
            metrics,
            decisions,
            latencies,
            concurrency,
        })
    }

    #[test]
    fn valid_finding_is_accepted_and_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _receivers) = EventBus::new(4, 16, 24);
        let orchestrator = build_orchestrator(dir.path());
        let ingress = Ingress::new(bus, orchestrator);

        let raw = json!({
            "Id": "finding-1",
            "CreatedAt": "2026-07-28T00:00:00Z",
            "AccountId": "111122223333",
            "Region": "us-east-1",
            "Type": "Recon",
            "severity": 1.0,
        });
        let outcome = ingress.submit("detector-a", &raw);
        assert!(outcome.accepted);
        assert_eq!(outcome.reason, None);
    }

    #[test]
    fn malformed_finding_is_rejected_and_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _receivers) = EventBus::new(4, 16, 24);
        let orchestrator = build_orchestrator(dir.path());
        let ingress = Ingress::new(bus, orchestrator.clone());

        let raw = json!({
            "CreatedAt": "2026-07-28T00:00:00Z",
            "AccountId": "111122223333",
            "Region": "us-east-1",
            "Type": "Recon",
            "severity": 1.0,
        });
        let outcome = ingress.submit("detector-a", &raw);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.as_deref(), Some("MalformedSource"));
        assert_eq!(orchestrator.dlq_depth(), 1);
    }

    #[test]
    fn draining_rejects_new_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _receivers) = EventBus::new(4, 16, 24);
        let orchestrator = build_orchestrator(dir.path());
        let ingress = Ingress::new(bus, orchestrator);
        ingress.drain();

        let raw = json!({
            "Id": "finding-1",
            "CreatedAt": "2026-07-28T00:00:00Z",
            "AccountId": "111122223333",
            "Region": "us-east-1",
            "Type": "Recon",
            "severity": 1.0,
        });
        let outcome = ingress.submit("detector-a", &raw);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.as_deref(), Some("Draining"));
    }

    #[test]
    fn full_bus_lane_rejects_with_backpressure() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _receivers) = EventBus::new(1, 1, 24);
        let orchestrator = build_orchestrator(dir.path());
        let ingress = Ingress::new(bus, orchestrator);

        let raw = |id: &str| {
            json!({
                "Id": id,
                "CreatedAt": "2026-07-28T00:00:00Z",
                "AccountId": "111122223333",
                "Region": "us-east-1",
                "Type": "Recon",
                "severity": 1.0,
            })
        };
        assert!(ingress.submit("detector-a", &raw("a")).accepted);
        let second = ingress.submit("detector-a", &raw("b"));
        assert!(!second.accepted);
        assert_eq!(second.reason.as_deref(), Some("Backpressure"));
    }
}
