//! Triage (C4): deterministic priority scoring over a scored event.
//!
//! Pure function of `(event, ml)` — no I/O, no oracle calls, no policy
//! config. Gate decisions (whether to invoke deep analysis or
//! remediation) live in `aegis-policy`, which reads this crate's output
//! alongside the process's configured thresholds.

#![forbid(unsafe_code)]

use aegis_proto::{MlEnrichment, PriorityBand, SeverityBand, TriageEnrichment};
use chrono::Utc;

/// `w_src` term: per-source multiplier in the scoring formula.
fn source_multiplier(source: &str) -> f64 {
    match source.to_ascii_lowercase().as_str() {
        "detector-a" | "detectora" => 1.2,
        "detector-b" | "detectorb" => 1.1,
        _ => 1.0,
    }
}

/// `kind` tokens that earn the 1.3x boost.
const BOOST_TOKENS: [&str; 4] = ["UnauthorizedAccess", "Recon", "Trojan", "Finding"];

fn kind_boost(kind: &str) -> f64 {
    if BOOST_TOKENS.iter().any(|token| kind.contains(token)) {
        1.3
    } else {
        1.0
    }
}

fn priority_band(score: f64) -> PriorityBand {
    if score >= 90.0 {
        PriorityBand::Critical
    } else if score >= 70.0 {
        PriorityBand::High
    } else if score >= 40.0 {
        PriorityBand::Medium
    } else {
        PriorityBand::Low
    }
}

/// Fixed, ordered recommended-action lists per band.
fn recommended_actions(band: PriorityBand) -> Vec<String> {
    let actions: &[&str] = match band {
        PriorityBand::Critical => &[
            "Page on-call immediately",
            "Isolate affected account/resource",
            "Begin incident timeline",
        ],
        PriorityBand::High => &[
            "Notify on-call within SLA",
            "Review affected account activity",
        ],
        PriorityBand::Medium => &["Queue for analyst review"],
        PriorityBand::Low => &["Log for periodic audit"],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

/// Compute `triage` for a scored event. `source`, `kind`, and
/// `severity_band` come from the canonical `Event`; `ml` is the Scorer's
/// output.
pub fn triage(source: &str, kind: &str, severity_band: SeverityBand, ml: &MlEnrichment) -> TriageEnrichment {
    let base = ml.threat_score * 0.6 + severity_band.weight();
    let adjusted = base * source_multiplier(source) * kind_boost(kind);
    let priority_score = adjusted.clamp(0.0, 100.0);
    let band = priority_band(priority_score);

    TriageEnrichment {
        priority_score,
        priority_band: band,
        recommended_actions: recommended_actions(band),
        triaged_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ml(threat_score: f64) -> MlEnrichment {
        MlEnrichment {
            threat_score,
            confidence: 0.9,
            model_version: "v1".to_string(),
            scored_at: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn formula_matches_spec_example() {
        // t=50, severity HIGH (w=30), source detector-a (1.2), boosted kind (1.3)
        // base = 50*0.6 + 30 = 60; adjusted = 60 * 1.2 * 1.3 = 93.6
        let result = triage("detector-a", "UnauthorizedAccess:IAMUser/X", SeverityBand::High, &ml(50.0));
        assert!((result.priority_score - 93.6).abs() < 1e-9);
        assert_eq!(result.priority_band, PriorityBand::Critical);
    }

    #[test]
    fn unboosted_unknown_source_uses_identity_multipliers() {
        // t=50, severity MEDIUM (w=20), source unknown (1.0), no boost (1.0)
        // base = 50*0.6 + 20 = 50; adjusted = 50
        let result = triage("detector-z", "Informational", SeverityBand::Medium, &ml(50.0));
        assert!((result.priority_score - 50.0).abs() < 1e-9);
        assert_eq!(result.priority_band, PriorityBand::Medium);
    }

    #[test]
    fn score_clamps_to_100() {
        let result = triage("detector-a", "Trojan:EC2/Foo", SeverityBand::Critical, &ml(100.0));
        assert_eq!(result.priority_score, 100.0);
        assert_eq!(result.priority_band, PriorityBand::Critical);
    }

    #[test]
    fn band_boundaries_are_inclusive_on_the_lower_edge() {
        assert_eq!(priority_band(90.0), PriorityBand::Critical);
        assert_eq!(priority_band(89.999), PriorityBand::High);
        assert_eq!(priority_band(70.0), PriorityBand::High);
        assert_eq!(priority_band(40.0), PriorityBand::Medium);
        assert_eq!(priority_band(39.999), PriorityBand::Low);
    }

    #[test]
    fn triage_is_deterministic() {
        let a = triage("detector-b", "Recon:Port/Scan", SeverityBand::Low, &ml(10.0));
        let b = triage("detector-b", "Recon:Port/Scan", SeverityBand::Low, &ml(10.0));
        assert_eq!(a.priority_score, b.priority_score);
        assert_eq!(a.priority_band, b.priority_band);
    }
}
