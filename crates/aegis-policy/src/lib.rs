//! Deep-Analysis Gate (C5) and Remediation Gate (C6) decision logic.
//!
//! These functions only decide whether and what to fire — they take a
//! `PipelineConfig` snapshot read fresh at decision time (never one
//! captured once at ingress, per the re-readable-config safety
//! invariant) and a `TriageEnrichment`. Executing the decision (calling
//! the LLM oracle or the effector) is `aegis-oracle`'s job.

#![forbid(unsafe_code)]

use aegis_config::{ActionPolicy, PipelineConfig};
use aegis_proto::{ActionKind, TriageEnrichment};
use serde::{Deserialize, Serialize};

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Fire,
    Skip { reason: String },
}

impl GateDecision {
    pub fn should_fire(&self) -> bool {
        matches!(self, GateDecision::Fire)
    }
}

/// §4.5: fires when `priority_score > warn_threshold` and
/// `action_policy != OFF`. Comparison is strict — a score equal to the
/// threshold does not fire.
pub fn deep_analysis_gate(config: &PipelineConfig, triage: &TriageEnrichment) -> GateDecision {
    if !config.action_policy.allows_analysis() {
        return GateDecision::Skip {
            reason: "action_policy is OFF".to_string(),
        };
    }
    if triage.priority_score > config.warn_threshold as f64 {
        GateDecision::Fire
    } else {
        GateDecision::Skip {
            reason: format!(
                "priority_score {:.2} does not exceed warn_threshold {}",
                triage.priority_score, config.warn_threshold
            ),
        }
    }
}

/// §4.6: fires when `priority_score > remediate_threshold` and
/// `action_policy == FULL`.
pub fn remediation_gate(config: &PipelineConfig, triage: &TriageEnrichment) -> GateDecision {
    if !config.action_policy.allows_remediation() {
        return GateDecision::Skip {
            reason: format!("action_policy is {:?}, not FULL", config.action_policy),
        };
    }
    if triage.priority_score > config.remediate_threshold as f64 {
        GateDecision::Fire
    } else {
        GateDecision::Skip {
            reason: format!(
                "priority_score {:.2} does not exceed remediate_threshold {}",
                triage.priority_score, config.remediate_threshold
            ),
        }
    }
}

/// Fixed `(source, kind) -> ActionKind` remediation policy table.
/// `NONE` is the default for any pair not explicitly listed — this crate
/// never invents a default action for an unmapped finding.
pub fn select_remediation_action(source: &str, kind: &str) -> ActionKind {
    let source = source.to_ascii_lowercase();
    let kind_lower = kind.to_ascii_lowercase();

    match (source.as_str(), kind_contains(&kind_lower)) {
        ("detector-a", KindMatch::UnauthorizedAccess) => ActionKind::DisableCredential,
        ("detector-a", KindMatch::Trojan) => ActionKind::QuarantineInstance,
        ("detector-b", KindMatch::UnauthorizedAccess) => ActionKind::RotateSecret,
        ("detector-b", KindMatch::Recon) => ActionKind::BlockAddress,
        (_, KindMatch::NetworkIngress) => ActionKind::RevokeNetworkIngress,
        _ => ActionKind::None,
    }
}

enum KindMatch {
    UnauthorizedAccess,
    Trojan,
    Recon,
    NetworkIngress,
    None,
}

fn kind_contains(kind_lower: &str) -> KindMatch {
    if kind_lower.contains("unauthorizedaccess") {
        KindMatch::UnauthorizedAccess
    } else if kind_lower.contains("trojan") {
        KindMatch::Trojan
    } else if kind_lower.contains("recon") {
        KindMatch::Recon
    } else if kind_lower.contains("ingress") || kind_lower.contains("networkpermissions") {
        KindMatch::NetworkIngress
    } else {
        KindMatch::None
    }
}
