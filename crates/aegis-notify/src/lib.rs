//! Notifier (C7): decides whether an alert is worth surfacing, shapes the
//! publish payload, and deduplicates noisy repeats.
//!
//! Dedup is in-memory and best-effort — the source system never specified
//! whether it should survive a restart, and this spec makes that decision
//! explicit rather than guessing: it does not (see DESIGN.md).

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use aegis_proto::{Alert, RemediationOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notification payload shape published to whatever channel the operator
/// wires up (chat, pager, webhook — out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub event_id: String,
    pub priority_band: String,
    pub priority_score: f64,
    pub threat_score: Option<f64>,
    pub risk_score: Option<i32>,
    pub summary: String,
    pub store_key: String,
}

/// §4.7 fire condition: `triage.priority_score > warn_threshold` OR the
/// remediation attempt failed. `warn_threshold_exceeded` must be the raw
/// score comparison, not whether the deep-analysis gate fired — that gate
/// also checks `action_policy`, and notification is not supposed to be
/// gated on policy (an operator dialing `action_policy` to `OFF` should
/// not go blind to high-priority findings).
pub fn should_notify(alert: &Alert, warn_threshold_exceeded: bool) -> bool {
    let remediation_failed = alert
        .enrichment
        .remediation
        .as_ref()
        .map(|r| r.outcome == RemediationOutcome::Failed)
        .unwrap_or(false);
    warn_threshold_exceeded || remediation_failed
}

/// Build the publish payload: band, score, the dominant recommended
/// action, and the account/region context, collapsed into one sentence
/// suitable for a chat notification.
pub fn build_payload(alert: &Alert) -> NotificationPayload {
    let triage = alert.enrichment.triage.as_ref();
    let ml = alert.enrichment.ml.as_ref();
    let analysis = alert.enrichment.analysis.as_ref();

    let priority_band = triage
        .map(|t| t.priority_band.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let priority_score = triage.map(|t| t.priority_score).unwrap_or(0.0);
    let dominant_action = triage
        .and_then(|t| t.recommended_actions.first())
        .map(String::as_str)
        .unwrap_or("review finding");

    let summary = format!(
        "{} {} on {}/{}: {} ({})",
        priority_band,
        alert.event.kind,
        alert.event.account,
        alert.event.region,
        dominant_action,
        alert.event.source,
    );

    NotificationPayload {
        event_id: alert.event.event_id.clone(),
        priority_band,
        priority_score,
        threat_score: ml.map(|m| m.threat_score),
        risk_score: analysis.map(|a| a.risk_score),
        summary,
        store_key: format!("{}:{}", alert.event.event_id, alert.event.observed_at.to_rfc3339()),
    }
}

/// Time-windowed dedup: a notification for the same `event_id` fires at
/// most once per `window`. Bounded by a hard capacity so a flood of
/// distinct ids cannot grow the map without limit; oldest entries are
/// evicted first once the cap is reached.
pub struct DedupWindow {
    window: Duration,
    capacity: usize,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this `event_id` should fire a notification now
    /// (and records it as seen), `false` if it was already notified
    /// within the window.
    pub fn should_fire(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if let Some(last) = seen.get(event_id) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }

        if seen.len() >= self.capacity && !seen.contains_key(event_id) {
            if let Some(oldest_key) = seen
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                seen.remove(&oldest_key);
            }
        }

        seen.insert(event_id.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_proto::{
        AlertStatus, Enrichment, Event, MlEnrichment, PriorityBand, RemediationEnrichment,
        SeverityBand, TriageEnrichment,
    };
    use chrono::Utc;

    fn sample_alert(priority_score: f64) -> Alert {
        Alert {
            event: Event {
                event_id: "e-1".to_string(),
                observed_at: Utc::now(),
                ingested_at: Utc::now(),
                source: "detector-a".to_string(),
                account: "111".to_string(),
                region: "us-east-1".to_string(),
                kind: "UnauthorizedAccess:IAMUser/X".to_string(),
                severity_band: SeverityBand::Critical,
                raw: serde_json::Map::new(),
            },
            enrichment: Enrichment {
                ml: Some(MlEnrichment {
                    threat_score: 90.0,
                    confidence: 0.9,
                    model_version: "v1".to_string(),
                    scored_at: Utc::now(),
                    error: None,
                }),
                triage: Some(TriageEnrichment {
                    priority_score,
                    priority_band: PriorityBand::Critical,
                    recommended_actions: vec!["Page on-call immediately".to_string()],
                    triaged_at: Utc::now(),
                }),
                analysis: None,
                remediation: None,
                status: Some(AlertStatus::StoredOnly),
            },
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn notifies_when_deep_analysis_fired() {
        let alert = sample_alert(95.0);
        assert!(should_notify(&alert, true));
    }

    #[test]
    fn notifies_on_remediation_failure_even_without_analysis() {
        let mut alert = sample_alert(50.0);
        alert.enrichment.remediation = Some(RemediationEnrichment {
            attempted: true,
            action_kind: aegis_proto::ActionKind::DisableCredential,
            outcome: aegis_proto::RemediationOutcome::Failed,
            error: Some("effector timeout".to_string()),
            attempted_at: Utc::now(),
        });
        assert!(should_notify(&alert, false));
    }

    #[test]
    fn does_not_notify_when_neither_condition_holds() {
        let alert = sample_alert(50.0);
        assert!(!should_notify(&alert, false));
    }

    #[test]
    fn payload_summary_contains_band_and_action() {
        let alert = sample_alert(95.0);
        let payload = build_payload(&alert);
        assert!(payload.summary.contains("CRITICAL"));
        assert!(payload.summary.contains("Page on-call immediately"));
    }

    #[test]
    fn dedup_suppresses_repeat_within_window() {
        let dedup = DedupWindow::new(Duration::from_secs(300), 10_000);
        assert!(dedup.should_fire("e-1"));
        assert!(!dedup.should_fire("e-1"));
    }

    #[test]
    fn dedup_allows_distinct_ids() {
        let dedup = DedupWindow::new(Duration::from_secs(300), 10_000);
        assert!(dedup.should_fire("e-1"));
        assert!(dedup.should_fire("e-2"));
    }

    #[test]
    fn dedup_evicts_oldest_once_at_capacity() {
        let dedup = DedupWindow::new(Duration::from_secs(300), 2);
        assert!(dedup.should_fire("e-1"));
        assert!(dedup.should_fire("e-2"));
        assert!(dedup.should_fire("e-3"));
        assert!(dedup.should_fire("e-1"));
    }
}
