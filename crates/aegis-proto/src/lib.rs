//! Canonical wire types for the Aegis security event pipeline.
//!
//! Every other crate in this workspace depends on this one for the shapes
//! that cross a stage boundary: `Event`, the enrichment groups, and the
//! resulting `Alert`. Types here are deliberately dumb — construction,
//! validation, and scoring logic live in the crates named after the stage
//! that owns them (normalize, triage, oracle, ...).

#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod action;

pub use action::ActionKind;

/// Qualitative severity bucket derived from a source's native severity
/// number at normalization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityBand {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityBand {
    /// `w_sev` term from the triage scoring formula.
    pub fn weight(self) -> f64 {
        match self {
            SeverityBand::Low => 10.0,
            SeverityBand::Medium => 20.0,
            SeverityBand::High => 30.0,
            SeverityBand::Critical => 40.0,
        }
    }
}

impl std::fmt::Display for SeverityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeverityBand::Low => "LOW",
            SeverityBand::Medium => "MEDIUM",
            SeverityBand::High => "HIGH",
            SeverityBand::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Qualitative bucket derived from `triage.priority_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityBand {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriorityBand::Low => "LOW",
            PriorityBand::Medium => "MEDIUM",
            PriorityBand::High => "HIGH",
            PriorityBand::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Terminal state recorded on a stored alert.
///
/// Monotonic along `StoredOnly < Notified < Remediated`; `DeadLettered` is
/// orthogonal and final (see `aegis_proto::status_rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    StoredOnly,
    Notified,
    Remediated,
    DeadLettered,
}

/// Monotonic rank used to enforce the store's status ordering rule.
/// `DeadLettered` has no rank in the monotonic chain — callers must check
/// for it explicitly before comparing ranks.
pub fn status_rank(status: AlertStatus) -> Option<u8> {
    match status {
        AlertStatus::StoredOnly => Some(0),
        AlertStatus::Notified => Some(1),
        AlertStatus::Remediated => Some(2),
        AlertStatus::DeadLettered => None,
    }
}

/// Canonical, immutable-after-normalization record of a single detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub source: String,
    pub account: String,
    pub region: String,
    pub kind: String,
    pub severity_band: SeverityBand,
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// `ml` enrichment group, attached by the Scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlEnrichment {
    pub threat_score: f64,
    pub confidence: f64,
    pub model_version: String,
    pub scored_at: DateTime<Utc>,
    /// Set when the ML oracle was unavailable and the score was degraded
    /// to zero rather than retried indefinitely.
    pub error: Option<String>,
}

/// `triage` enrichment group, attached by Triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageEnrichment {
    pub priority_score: f64,
    pub priority_band: PriorityBand,
    pub recommended_actions: Vec<String>,
    pub triaged_at: DateTime<Utc>,
}

/// `analysis` enrichment group, attached only when the deep-analysis gate
/// fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEnrichment {
    pub risk_score: i32,
    pub attack_vector: String,
    pub recommended_actions: Vec<String>,
    pub business_impact: String,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl AnalysisEnrichment {
    /// Degraded-default report used when the LLM oracle never produces a
    /// parseable response.
    pub fn degraded(reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            risk_score: 0,
            attack_vector: "unknown".to_string(),
            recommended_actions: Vec::new(),
            business_impact: String::new(),
            confidence: 0.0,
            analyzed_at: at,
            error: Some(reason.to_string()),
        }
    }
}

/// Outcome recorded for a remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemediationOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// `remediation` enrichment group, attached when gate B fires or is
/// explicitly skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationEnrichment {
    pub attempted: bool,
    pub action_kind: ActionKind,
    pub outcome: RemediationOutcome,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// The full additive enrichment envelope carried alongside an `Event`.
/// Fields only ever transition from `None` to `Some`; see invariant 1 in
/// the pipeline's data model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub ml: Option<MlEnrichment>,
    pub triage: Option<TriageEnrichment>,
    pub analysis: Option<AnalysisEnrichment>,
    pub remediation: Option<RemediationEnrichment>,
    pub status: Option<AlertStatus>,
}

impl Enrichment {
    /// Field-wise merge used by the Alert Store: a `Some` incoming field
    /// overwrites, a `None` incoming field preserves the stored value.
    /// `status` additionally respects monotonicity — see
    /// `aegis_proto::status_rank`.
    pub fn merge_from(&mut self, incoming: &Enrichment) {
        if incoming.ml.is_some() {
            self.ml = incoming.ml.clone();
        }
        if incoming.triage.is_some() {
            self.triage = incoming.triage.clone();
        }
        if incoming.analysis.is_some() {
            self.analysis = incoming.analysis.clone();
        }
        if incoming.remediation.is_some() {
            self.remediation = incoming.remediation.clone();
        }
        if let Some(incoming_status) = incoming.status {
            self.status = Some(merge_status(self.status, incoming_status));
        }
    }
}

/// Resolve the next stored status given the currently stored one (if any)
/// and an incoming candidate, per the monotonic-status store rule.
pub fn merge_status(current: Option<AlertStatus>, incoming: AlertStatus) -> AlertStatus {
    let Some(current) = current else {
        return incoming;
    };
    if incoming == AlertStatus::DeadLettered || current == AlertStatus::DeadLettered {
        return AlertStatus::DeadLettered;
    }
    match (status_rank(current), status_rank(incoming)) {
        (Some(c), Some(i)) if i > c => incoming,
        _ => current,
    }
}

/// `Event + Enrichment`, keyed by `(event_id, observed_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub event: Event,
    pub enrichment: Enrichment,
    /// Wall-clock time this alert row expires from the store.
    pub expires_at: DateTime<Utc>,
}

impl Alert {
    pub fn alert_id(&self) -> &str {
        &self.event.event_id
    }

    pub fn store_key(&self) -> (String, DateTime<Utc>) {
        (self.event.event_id.clone(), self.event.observed_at)
    }
}

/// Error kinds shared across stage boundaries. Concrete crates narrow
/// these with their own `thiserror` enums and convert into this one at
/// the Orchestrator seam where a single taxonomy is needed for DLQ
/// routing and metrics labeling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineErrorKind {
    #[error("malformed source: {0}")]
    MalformedSource(String),
    #[error("backpressure")]
    Backpressure,
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("effector failed: {0}")]
    EffectorFailed(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

/// Opaque raw finding payload accepted at ingress, prior to normalization.
pub type RawFinding = serde_json::Map<String, serde_json::Value>;

/// Arbitrary label map, used by metrics and audit records.
pub type Labels = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_merge_respects_monotonicity() {
        assert_eq!(
            merge_status(Some(AlertStatus::Notified), AlertStatus::StoredOnly),
            AlertStatus::Notified
        );
        assert_eq!(
            merge_status(Some(AlertStatus::StoredOnly), AlertStatus::Remediated),
            AlertStatus::Remediated
        );
        assert_eq!(
            merge_status(None, AlertStatus::StoredOnly),
            AlertStatus::StoredOnly
        );
    }

    #[test]
    fn dead_lettered_is_final() {
        assert_eq!(
            merge_status(Some(AlertStatus::Remediated), AlertStatus::DeadLettered),
            AlertStatus::DeadLettered
        );
        assert_eq!(
            merge_status(Some(AlertStatus::DeadLettered), AlertStatus::Notified),
            AlertStatus::DeadLettered
        );
    }

    #[test]
    fn enrichment_merge_preserves_unset_fields() {
        let mut stored = Enrichment {
            ml: Some(MlEnrichment {
                threat_score: 42.0,
                confidence: 0.8,
                model_version: "v1".to_string(),
                scored_at: Utc::now(),
                error: None,
            }),
            ..Default::default()
        };
        let incoming = Enrichment {
            triage: Some(TriageEnrichment {
                priority_score: 50.0,
                priority_band: PriorityBand::Medium,
                recommended_actions: vec!["monitor".to_string()],
                triaged_at: Utc::now(),
            }),
            ..Default::default()
        };
        stored.merge_from(&incoming);
        assert!(stored.ml.is_some());
        assert!(stored.triage.is_some());
    }

    #[test]
    fn severity_band_weights_match_formula_table() {
        assert_eq!(SeverityBand::Low.weight(), 10.0);
        assert_eq!(SeverityBand::Medium.weight(), 20.0);
        assert_eq!(SeverityBand::High.weight(), 30.0);
        assert_eq!(SeverityBand::Critical.weight(), 40.0);
    }
}
