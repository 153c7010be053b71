//! External oracle and effector clients (C3, C5, C6 execution halves).
//!
//! The ML scorer, the LLM risk analyzer, and the remediation effector are
//! all, from this pipeline's point of view, black boxes that can be slow
//! or unavailable. They share one shape: an async call under a
//! per-instance concurrency cap, with a shared exponential-backoff retry
//! helper (§4.3). The *decision* to call them (threshold checks, the
//! `(source, kind)` action table) belongs to `aegis-policy`; this crate
//! only knows how to call them and how to degrade when they don't answer.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aegis_proto::{
    ActionKind, AnalysisEnrichment, Event, MlEnrichment, RemediationEnrichment,
    RemediationOutcome, TriageEnrichment,
};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub mod backoff;
pub mod effector;
pub mod features;
pub mod json_extract;
pub mod llm;
pub mod ml;

pub use backoff::{retry_with_backoff, retry_with_backoff_unless, BackoffPolicy};
pub use effector::{Effector, MockEffector};
pub use features::{extract_features, FeatureVector};
pub use llm::{LlmAnalyzer, MockLlmAnalyzer};
pub use ml::{MlModel, MlScoreResponse, MockMlModel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle timed out")]
    Timeout,
    #[error("oracle returned a malformed response: {0}")]
    SchemaMismatch(String),
    #[error("effector failed: {0}")]
    EffectorFailed(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;

/// A concurrency-capped handle shared by every call site that invokes a
/// given oracle instance, matching the provider-registry style concurrency
/// guard this codebase already uses for outbound calls.
#[derive(Clone)]
pub struct OracleHandle<T: ?Sized> {
    client: Arc<T>,
    semaphore: Arc<Semaphore>,
}

impl<T: ?Sized> OracleHandle<T> {
    pub fn new(client: Arc<T>, concurrency: usize) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn client(&self) -> &T {
        &self.client
    }

    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed")
    }
}

impl<T: ?Sized> fmt::Debug for OracleHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleHandle")
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

/// The ML scorer retry/deadline schedule (§4.3): 200ms initial, factor 2,
/// 4 attempts max, 5s overall budget.
pub fn ml_backoff_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(200),
        factor: 2.0,
        max_attempts: 4,
        overall_budget: Duration::from_secs(5),
    }
}

/// Result of a Scorer run: either an `ml` enrichment (possibly itself
/// degraded after the transient-failure retry budget was exhausted), or a
/// permanent failure the caller must route to the DLQ instead of storing
/// a degraded score for (§4.3, §7).
#[derive(Debug, Clone)]
pub enum ScoreOutcome {
    Scored(MlEnrichment),
    PermanentFailure(String),
}

/// C3: extract features, call the ML oracle, attach `ml`. A transient
/// failure (timeout, connection refused, 5xx) is retried per
/// `ml_backoff_policy`; on exhaustion the score degrades to zero with
/// `ml.error` set rather than dropping the event. A permanent failure
/// (`OracleError::SchemaMismatch` — the oracle's response doesn't match
/// the expected shape) is not retried at all and is reported back as
/// `ScoreOutcome::PermanentFailure` for the caller to dead-letter.
pub async fn score_event(
    event: &Event,
    model_version: &str,
    handle: &OracleHandle<dyn MlModel>,
) -> ScoreOutcome {
    let features = extract_features(event);
    let policy = ml_backoff_policy();
    let model_version = model_version.to_string();

    let outcome = retry_with_backoff_unless(
        &policy,
        |e: &OracleError| matches!(e, OracleError::SchemaMismatch(_)),
        || {
            let features = features.clone();
            let model_version = model_version.clone();
            async move {
                let _permit = handle.acquire().await;
                handle.client().score(&model_version, &features).await
            }
        },
    )
    .await;

    match outcome {
        Ok(response) => {
            info!(event_id = %event.event_id, threat_score = response.threat_score, "ml scoring succeeded");
            ScoreOutcome::Scored(MlEnrichment {
                threat_score: response.threat_score.clamp(0.0, 100.0),
                confidence: response.confidence.clamp(0.0, 1.0),
                model_version,
                scored_at: Utc::now(),
                error: None,
            })
        }
        Err(OracleError::SchemaMismatch(reason)) => {
            warn!(event_id = %event.event_id, error = %reason, "ml oracle returned a malformed response, permanent failure");
            ScoreOutcome::PermanentFailure(reason)
        }
        Err(e) => {
            warn!(event_id = %event.event_id, error = %e, "ml oracle exhausted retries, degrading");
            ScoreOutcome::Scored(MlEnrichment {
                threat_score: 0.0,
                confidence: 0.0,
                model_version,
                scored_at: Utc::now(),
                error: Some(e.to_string()),
            })
        }
    }
}

/// The LLM deep-analysis call budget: 15s, one retry on timeout (§4.5).
pub fn llm_timeout() -> Duration {
    Duration::from_secs(15)
}

/// C5: invoke the LLM oracle with a fixed prompt template over
/// `{event, ml, triage}`, robustly parse its response, and degrade to a
/// default report on timeout or unparseable output.
pub async fn analyze_event(
    event: &Event,
    ml: &MlEnrichment,
    triage: &TriageEnrichment,
    handle: &OracleHandle<dyn LlmAnalyzer>,
) -> AnalysisEnrichment {
    let prompt = build_prompt(event, ml, triage);
    let timeout = llm_timeout();

    for attempt in 0..2 {
        let _permit = handle.acquire().await;
        match tokio::time::timeout(timeout, handle.client().analyze(&prompt)).await {
            Ok(Ok(raw)) => match json_extract::extract_first_json_object(&raw) {
                Some(report) => {
                    info!(event_id = %event.event_id, attempt, "deep analysis succeeded");
                    return report;
                }
                None if attempt == 0 => {
                    warn!(event_id = %event.event_id, "analysis response unparseable, retrying once");
                    continue;
                }
                None => {
                    warn!(event_id = %event.event_id, "analysis response unparseable after retry");
                    return AnalysisEnrichment::degraded("parse_failed", Utc::now());
                }
            },
            Ok(Err(e)) if attempt == 0 => {
                warn!(event_id = %event.event_id, error = %e, "llm oracle call failed, retrying once");
                continue;
            }
            Ok(Err(e)) => {
                warn!(event_id = %event.event_id, error = %e, "llm oracle call failed after retry");
                return AnalysisEnrichment::degraded(&e.to_string(), Utc::now());
            }
            Err(_) if attempt == 0 => {
                warn!(event_id = %event.event_id, "llm oracle call timed out, retrying once");
                continue;
            }
            Err(_) => {
                warn!(event_id = %event.event_id, "llm oracle call timed out after retry");
                return AnalysisEnrichment::degraded("timeout", Utc::now());
            }
        }
    }
    unreachable!("loop always returns within two attempts")
}

fn build_prompt(event: &Event, ml: &MlEnrichment, triage: &TriageEnrichment) -> String {
    format!(
        "Assess the security risk of this finding.\nevent_id={}\nsource={}\nkind={}\nseverity_band={}\nthreat_score={}\npriority_score={}\npriority_band={}\nRespond with a single JSON object: {{\"risk_score\": 0-10, \"attack_vector\": string, \"recommended_actions\": [string], \"business_impact\": string, \"confidence\": 0-1}}",
        event.event_id,
        event.source,
        event.kind,
        event.severity_band,
        ml.threat_score,
        triage.priority_score,
        triage.priority_band,
    )
}

/// C6: invoke the remediation effector, keyed by `(event_id, action_kind)`
/// for idempotency at the effector boundary. A single retry, then record
/// `FAILED` rather than blocking the rest of the pipeline.
pub async fn execute_remediation(
    event_id: &str,
    action: ActionKind,
    handle: &OracleHandle<dyn Effector>,
) -> RemediationEnrichment {
    if !action.is_actionable() {
        return RemediationEnrichment {
            attempted: false,
            action_kind: action,
            outcome: RemediationOutcome::Skipped,
            error: None,
            attempted_at: Utc::now(),
        };
    }

    for attempt in 0..2 {
        let _permit = handle.acquire().await;
        match handle.client().execute(event_id, action).await {
            Ok(()) => {
                info!(event_id, action = %action, attempt, "remediation succeeded");
                return RemediationEnrichment {
                    attempted: true,
                    action_kind: action,
                    outcome: RemediationOutcome::Succeeded,
                    error: None,
                    attempted_at: Utc::now(),
                };
            }
            Err(e) if attempt == 0 => {
                warn!(event_id, action = %action, error = %e, "remediation failed, retrying once");
                continue;
            }
            Err(e) => {
                warn!(event_id, action = %action, error = %e, "remediation failed after retry");
                return RemediationEnrichment {
                    attempted: true,
                    action_kind: action,
                    outcome: RemediationOutcome::Failed,
                    error: Some(e.to_string()),
                    attempted_at: Utc::now(),
                };
            }
        }
    }
    unreachable!("loop always returns within two attempts")
}
