//! Orchestrator (C9): the central per-event state machine.
//!
//! Drives one event through `BUFFERED → SCORED → TRIAGED →
//! (ANALYZED?) → (REMEDIATED?) → NOTIFIED? → STORED → DONE`, with a
//! `DEAD_LETTERED` escape branch on unrecoverable stage failure. The
//! per-event state is an explicit enum and a single `transition` method
//! maps `(state, outcome)` to the next state plus a tagged action,
//! rather than branching ad hoc at each call site.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_bus::{recv_fresh, BusMetrics, EventBus};
use aegis_config::SharedConfig;
use aegis_dlq::DeadLetterQueue;
use aegis_latency::StageLatencies;
use aegis_metrics::{DecisionLog, PipelineMetrics};
use aegis_notify::{build_payload, should_notify, DedupWindow};
use aegis_oracle::{analyze_event, execute_remediation, score_event, Effector, LlmAnalyzer, MlModel, OracleHandle, ScoreOutcome};
use aegis_policy::{deep_analysis_gate, remediation_gate, select_remediation_action};
use aegis_proto::{Alert, AlertStatus, Enrichment, Event};
use aegis_store::AlertStore;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Per-event progress through the pipeline (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum EventState {
    Buffered,
    Scored,
    Triaged,
    Analyzed,
    Remediated,
    Notified,
    Stored,
    Done,
    DeadLettered { stage: String, reason: String },
}

/// What happened at the stage the Orchestrator just drove.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    ScoringDone,
    ScoringPermanentFailure { reason: String },
    TriageDone,
    AnalysisGateSkipped,
    AnalysisDone,
    RemediationGateSkipped,
    RemediationDone,
    NotificationSkipped,
    NotificationSent,
    StoreWriteOk,
    DeadlineExceeded,
    StoreUnavailable { reason: String },
    Finished,
}

/// What the driver loop should do in response to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorAction {
    RunDeepAnalysis,
    SkipDeepAnalysis,
    RunRemediation,
    SkipRemediation,
    Publish,
    SkipPublish,
    PersistAlert,
    RouteToDlq { stage: String, reason: String },
    Finish,
}

/// The explicit per-event state machine. One instance per in-flight
/// event, owned by the task processing it — no cross-task mutation.
#[derive(Debug, Clone)]
pub struct EventMachine {
    pub event_id: String,
    pub state: EventState,
}

impl EventMachine {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            state: EventState::Buffered,
        }
    }

    /// Maps `(current_state, outcome)` to the next state plus a tagged
    /// action for the driver to perform. Exhaustive match — every state
    /// names every outcome it can legally receive.
    pub fn transition(&mut self, outcome: StageOutcome) -> OrchestratorAction {
        match (&self.state, outcome) {
            (EventState::Buffered, StageOutcome::ScoringDone) => {
                self.state = EventState::Scored;
                OrchestratorAction::Finish
            }
            (EventState::Buffered, StageOutcome::ScoringPermanentFailure { reason }) => {
                self.state = EventState::DeadLettered {
                    stage: "score".to_string(),
                    reason: reason.clone(),
                };
                OrchestratorAction::RouteToDlq {
                    stage: "score".to_string(),
                    reason,
                }
            }
            (EventState::Scored, StageOutcome::TriageDone) => {
                self.state = EventState::Triaged;
                OrchestratorAction::RunDeepAnalysis
            }
            (EventState::Triaged, StageOutcome::AnalysisGateSkipped) => {
                OrchestratorAction::SkipDeepAnalysis
            }
            (EventState::Triaged, StageOutcome::AnalysisDone) => {
                self.state = EventState::Analyzed;
                OrchestratorAction::RunRemediation
            }
            (EventState::Triaged, StageOutcome::RemediationGateSkipped)
            | (EventState::Analyzed, StageOutcome::RemediationGateSkipped) => {
                OrchestratorAction::SkipRemediation
            }
            (EventState::Triaged, StageOutcome::RemediationDone)
            | (EventState::Analyzed, StageOutcome::RemediationDone) => {
                self.state = EventState::Remediated;
                OrchestratorAction::Publish
            }
            (EventState::Triaged, StageOutcome::NotificationSkipped)
            | (EventState::Analyzed, StageOutcome::NotificationSkipped)
            | (EventState::Remediated, StageOutcome::NotificationSkipped) => {
                OrchestratorAction::SkipPublish
            }
            (EventState::Triaged, StageOutcome::NotificationSent)
            | (EventState::Analyzed, StageOutcome::NotificationSent)
            | (EventState::Remediated, StageOutcome::NotificationSent) => {
                self.state = EventState::Notified;
                OrchestratorAction::PersistAlert
            }
            (
                EventState::Triaged | EventState::Analyzed | EventState::Remediated | EventState::Notified,
                StageOutcome::StoreWriteOk,
            ) => {
                self.state = EventState::Stored;
                OrchestratorAction::Finish
            }
            (
                EventState::Triaged | EventState::Analyzed | EventState::Remediated | EventState::Notified,
                StageOutcome::StoreUnavailable { reason },
            ) => {
                self.state = EventState::DeadLettered {
                    stage: "store".to_string(),
                    reason: reason.clone(),
                };
                OrchestratorAction::RouteToDlq {
                    stage: "store".to_string(),
                    reason,
                }
            }
            (_, StageOutcome::DeadlineExceeded) => {
                self.state = EventState::Stored;
                OrchestratorAction::PersistAlert
            }
            (EventState::Stored, StageOutcome::Finished) => {
                self.state = EventState::Done;
                OrchestratorAction::Finish
            }
            (state, outcome) => {
                warn!(event_id = %self.event_id, ?state, ?outcome, "unreachable state/outcome pairing");
                OrchestratorAction::Finish
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, EventState::Done | EventState::DeadLettered { .. })
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store unavailable after retry: {0}")]
    StoreUnavailable(String),
}

/// Everything a per-event task needs to run the pipeline end to end.
/// Cheap to clone — every field is an `Arc` or a cheaply-cloned handle.
#[derive(Clone)]
pub struct Orchestrator {
    pub config: SharedConfig,
    pub ml: OracleHandle<dyn MlModel>,
    pub llm: OracleHandle<dyn LlmAnalyzer>,
    pub effector: OracleHandle<dyn Effector>,
    pub store: Arc<AlertStore>,
    pub event_dlq: Arc<Mutex<DeadLetterQueue>>,
    pub store_dlq: Arc<Mutex<DeadLetterQueue>>,
    pub dedup: Arc<DedupWindow>,
    pub metrics: Arc<PipelineMetrics>,
    pub decisions: Arc<DecisionLog>,
    pub latencies: Arc<StageLatencies>,
    pub concurrency: Arc<Semaphore>,
}

impl Orchestrator {
    /// Run the full pipeline for one event, from `BUFFERED` to a
    /// terminal state. Acquires a concurrency permit for the duration
    /// and enforces the end-to-end deadline via `tokio::time::timeout`.
    pub async fn process(&self, event: Event) {
        let _permit = self.concurrency.acquire().await.expect("semaphore not closed");
        let mut machine = EventMachine::new(event.event_id.clone());
        let config = self.config.snapshot();
        let deadline = Duration::from_millis(config.event_deadline_ms);
        let partial = Mutex::new(Enrichment::default());

        let outcome = tokio::time::timeout(deadline, self.run_stages(&event, &config, &mut machine, &partial)).await;

        match outcome {
            Ok(()) => {}
            Err(_) => {
                warn!(event_id = %event.event_id, "end-to-end deadline exceeded, short-circuiting optional stages");
                self.metrics.slo_violations.inc();
                machine.transition(StageOutcome::DeadlineExceeded);
                let mut enrichment = partial.lock().clone();
                enrichment.status = Some(AlertStatus::StoredOnly);
                match self.persist_best_effort(&event, enrichment).await {
                    Ok(()) => {
                        machine.transition(StageOutcome::Finished);
                    }
                    Err(reason) => {
                        machine.transition(StageOutcome::StoreUnavailable { reason });
                    }
                }
            }
        }
    }

    /// Drives every stage in order, updating `partial` with each group of
    /// enrichment as soon as that stage completes. `partial` is what
    /// `process` persists if the end-to-end deadline fires mid-stage —
    /// without it, whatever this function had already computed before
    /// `tokio::time::timeout` cancels it would simply be dropped.
    async fn run_stages(
        &self,
        event: &Event,
        config: &aegis_config::PipelineConfig,
        machine: &mut EventMachine,
        partial: &Mutex<Enrichment>,
    ) {
        let scored_at = Instant::now();
        let score_outcome = score_event(event, &config.ml_model_version, &self.ml).await;
        self.latencies.record("score", scored_at.elapsed());

        let ml = match score_outcome {
            ScoreOutcome::PermanentFailure(reason) => {
                self.metrics.dead_lettered.inc();
                self.event_dlq.lock().append(&event.event_id, "score", "schema_mismatch", &reason, None);
                machine.transition(StageOutcome::ScoringPermanentFailure { reason });
                let enrichment = Enrichment {
                    status: Some(AlertStatus::DeadLettered),
                    ..Default::default()
                };
                let _ = self.persist_best_effort(event, enrichment).await;
                return;
            }
            ScoreOutcome::Scored(ml) => ml,
        };
        self.metrics.scored.inc();
        if ml.error.is_some() {
            self.metrics.degraded_ml.inc();
        }
        machine.transition(StageOutcome::ScoringDone);
        partial.lock().ml = Some(ml.clone());

        let triage_at = Instant::now();
        let triage = aegis_triage::triage(&event.source, &event.kind, event.severity_band, &ml);
        self.latencies.record("triage", triage_at.elapsed());
        self.metrics.triaged.inc();
        machine.transition(StageOutcome::TriageDone);
        partial.lock().triage = Some(triage.clone());

        let analysis_gate = deep_analysis_gate(config, &triage);
        let mut analysis = None;
        if analysis_gate.should_fire() {
            self.decisions.record(&event.event_id, "deep_analysis", "fire", None);
            self.metrics.analysis_fired.inc();
            let analysis_at = Instant::now();
            let report = analyze_event(event, &ml, &triage, &self.llm).await;
            self.latencies.record("analysis", analysis_at.elapsed());
            if report.error.is_some() {
                self.metrics.analysis_degraded.inc();
            }
            partial.lock().analysis = Some(report.clone());
            analysis = Some(report);
            machine.transition(StageOutcome::AnalysisDone);
        } else {
            let reason = match &analysis_gate {
                aegis_policy::GateDecision::Skip { reason } => reason.clone(),
                aegis_policy::GateDecision::Fire => unreachable!(),
            };
            self.decisions.record(&event.event_id, "deep_analysis", "skip", Some(reason));
            self.metrics.analysis_skipped.inc();
            machine.transition(StageOutcome::AnalysisGateSkipped);
        }

        // Re-read fresh: an operator may have flipped `action_policy` since
        // this task started, and §4.6's safety invariant requires the
        // remediation gate to see the current policy at decision time, not
        // the one captured at task entry.
        let remediation_config = self.config.snapshot();
        let remediation_gate_decision = remediation_gate(&remediation_config, &triage);
        let mut remediation = None;
        if remediation_gate_decision.should_fire() {
            self.decisions.record(&event.event_id, "remediation", "fire", None);
            let action = select_remediation_action(&event.source, &event.kind);
            self.metrics.remediation_fired.inc();
            let remediation_at = Instant::now();
            let outcome = execute_remediation(&event.event_id, action, &self.effector).await;
            self.latencies.record("remediation", remediation_at.elapsed());
            if outcome.outcome == aegis_proto::RemediationOutcome::Failed {
                self.metrics.remediation_failed.inc();
            }
            partial.lock().remediation = Some(outcome.clone());
            remediation = Some(outcome);
            machine.transition(StageOutcome::RemediationDone);
        } else {
            let reason = match &remediation_gate_decision {
                aegis_policy::GateDecision::Skip { reason } => reason.clone(),
                aegis_policy::GateDecision::Fire => unreachable!(),
            };
            self.decisions.record(&event.event_id, "remediation", "skip", Some(reason));
            self.metrics.remediation_skipped.inc();
            machine.transition(StageOutcome::RemediationGateSkipped);
        }

        // `REMEDIATED` means an action was actually attempted — a fired
        // gate whose action-table lookup resolved to `NONE` records
        // `outcome = SKIPPED` and must not be promoted past `STORED_ONLY`.
        let status = match &remediation {
            Some(r) if r.outcome != aegis_proto::RemediationOutcome::Skipped => AlertStatus::Remediated,
            _ => AlertStatus::StoredOnly,
        };

        let provisional = Alert {
            event: event.clone(),
            enrichment: Enrichment {
                ml: Some(ml.clone()),
                triage: Some(triage.clone()),
                analysis: analysis.clone(),
                remediation: remediation.clone(),
                status: Some(status),
            },
            expires_at: Utc::now() + ChronoDuration::seconds(config.store_ttl_seconds as i64),
        };

        let warn_exceeded = triage.priority_score > config.warn_threshold as f64;
        let fire_notification = should_notify(&provisional, warn_exceeded) && self.dedup.should_fire(&event.event_id);
        let final_status = if fire_notification {
            let payload = build_payload(&provisional);
            info!(event_id = %event.event_id, summary = %payload.summary, "notification published");
            self.metrics.notified.inc();
            machine.transition(StageOutcome::NotificationSent);
            if status == AlertStatus::Remediated {
                AlertStatus::Remediated
            } else {
                AlertStatus::Notified
            }
        } else {
            machine.transition(StageOutcome::NotificationSkipped);
            status
        };

        let enrichment = Enrichment {
            ml: Some(ml),
            triage: Some(triage),
            analysis,
            remediation,
            status: Some(final_status),
        };

        match self.persist_best_effort(event, enrichment).await {
            Ok(()) => {
                machine.transition(StageOutcome::StoreWriteOk);
                machine.transition(StageOutcome::Finished);
            }
            Err(reason) => {
                machine.transition(StageOutcome::StoreUnavailable { reason });
            }
        }
    }

    /// Write whatever enrichment exists to the store. On store failure,
    /// retry once; on second failure route to the store-failure DLQ.
    async fn persist_best_effort(&self, event: &Event, enrichment: Enrichment) -> Result<(), String> {
        let alert = Alert {
            event: event.clone(),
            enrichment,
            expires_at: Utc::now(),
        };

        let store_at = Instant::now();
        let mut result = self.store.put(alert.clone());
        if result.is_err() {
            result = self.store.put(alert.clone());
        }
        self.latencies.record("store", store_at.elapsed());

        match result {
            Ok(_) => {
                self.metrics.stored.inc();
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "alert store write failed after retry, routing to store DLQ");
                self.metrics.dead_lettered.inc();
                self.store_dlq.lock().append(
                    &event.event_id,
                    "store",
                    "store_unavailable",
                    &e.to_string(),
                    Some(alert.enrichment),
                );
                Err(e.to_string())
            }
        }
    }

    /// Record a normalization failure and route it to the event DLQ.
    /// Called by the ingress adapter before an event ever reaches the bus.
    pub fn dead_letter_malformed(&self, raw_event_id: &str, error_message: &str) {
        self.metrics.malformed.inc();
        self.metrics.dead_lettered.inc();
        self.event_dlq.lock().append(raw_event_id, "normalize", "malformed_source", error_message, None);
    }

    /// Drive every lane of the bus, spawning one task per received
    /// event. Returns when all lanes are closed and drained (graceful
    /// shutdown: stop producing, let `run` finish in-flight work).
    pub async fn run(self: Arc<Self>, bus_retention: ChronoDuration, bus_metrics: Arc<BusMetrics>, mut receivers: Vec<tokio::sync::mpsc::Receiver<aegis_bus::BusMessage>>) {
        let mut handles = Vec::new();
        for mut receiver in receivers.drain(..) {
            let orchestrator = Arc::clone(&self);
            let metrics = Arc::clone(&bus_metrics);
            handles.push(tokio::spawn(async move {
                while let Some(event) = recv_fresh(&mut receiver, bus_retention, &metrics).await {
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move { orchestrator.process(event).await });
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Health surface fields (§6.5) not already owned by another crate.
    pub fn bus_depth(&self, bus: &EventBus) -> usize {
        bus.approx_depth()
    }

    pub fn dlq_depth(&self) -> usize {
        self.event_dlq.lock().len() + self.store_dlq.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_advances_buffered_to_scored() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        assert_eq!(machine.state, EventState::Scored);
    }

    #[test]
    fn triage_routes_into_deep_analysis_by_default() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        let action = machine.transition(StageOutcome::TriageDone);
        assert_eq!(action, OrchestratorAction::RunDeepAnalysis);
        assert_eq!(machine.state, EventState::Triaged);
    }

    #[test]
    fn analysis_gate_skip_keeps_state_at_triaged() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        machine.transition(StageOutcome::TriageDone);
        let action = machine.transition(StageOutcome::AnalysisGateSkipped);
        assert_eq!(action, OrchestratorAction::SkipDeepAnalysis);
        assert_eq!(machine.state, EventState::Triaged);
    }

    #[test]
    fn full_happy_path_reaches_stored() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        machine.transition(StageOutcome::TriageDone);
        machine.transition(StageOutcome::AnalysisDone);
        machine.transition(StageOutcome::RemediationDone);
        machine.transition(StageOutcome::NotificationSent);
        machine.transition(StageOutcome::StoreWriteOk);
        let action = machine.transition(StageOutcome::Finished);
        assert_eq!(action, OrchestratorAction::Finish);
        assert!(machine.is_terminal());
        assert_eq!(machine.state, EventState::Done);
    }

    #[test]
    fn store_failure_routes_to_dlq_and_marks_dead_lettered() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        machine.transition(StageOutcome::TriageDone);
        machine.transition(StageOutcome::AnalysisGateSkipped);
        machine.transition(StageOutcome::RemediationGateSkipped);
        machine.transition(StageOutcome::NotificationSkipped);
        let action = machine.transition(StageOutcome::StoreUnavailable { reason: "disk full".to_string() });
        assert_eq!(
            action,
            OrchestratorAction::RouteToDlq { stage: "store".to_string(), reason: "disk full".to_string() }
        );
        assert!(machine.is_terminal());
    }

    #[test]
    fn deadline_exceeded_short_circuits_to_stored() {
        let mut machine = EventMachine::new("e-1");
        machine.transition(StageOutcome::ScoringDone);
        machine.transition(StageOutcome::TriageDone);
        let action = machine.transition(StageOutcome::DeadlineExceeded);
        assert_eq!(action, OrchestratorAction::PersistAlert);
        assert_eq!(machine.state, EventState::Stored);
    }
}
