//! Robust extraction of a JSON object from an LLM text response that may
//! be wrapped in markdown code fences or surrounded by prose (§4.5).

use aegis_proto::AnalysisEnrichment;
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawAnalysisReport {
    risk_score: i32,
    attack_vector: String,
    #[serde(default)]
    recommended_actions: Vec<String>,
    #[serde(default)]
    business_impact: String,
    #[serde(default)]
    confidence: f64,
}

/// Find the first `{...}` span in `text` — unwrapping a ```json fence if
/// present — and parse it into an `AnalysisEnrichment`. Returns `None` if
/// no span parses into the expected shape.
pub fn extract_first_json_object(text: &str) -> Option<AnalysisEnrichment> {
    let candidate = strip_fence(text);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    let slice = &candidate[start..=end];
    let report: RawAnalysisReport = serde_json::from_str(slice).ok()?;
    Some(AnalysisEnrichment {
        risk_score: report.risk_score.clamp(0, 10),
        attack_vector: report.attack_vector,
        recommended_actions: report.recommended_actions,
        business_impact: report.business_impact,
        confidence: report.confidence.clamp(0.0, 1.0),
        analyzed_at: Utc::now(),
        error: None,
    })
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}
