//! Normalizer (C1): converts a vendor-specific raw finding into a canonical
//! [`aegis_proto::Event`] (§4.1).
//!
//! Pure function of `(raw, source, mapping table)` — no I/O, no state. The
//! caller is responsible for metric counters (warning increments on a
//! defaulted severity, failure counters on `MalformedSource`); this crate
//! only reports what happened via the returned [`NormalizeOutcome`].

#![forbid(unsafe_code)]

use aegis_proto::{Event, SeverityBand};
use aegis_sanitize::{sanitize_finding, SanitizeError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed source: {0}")]
    MalformedSource(String),
}

impl From<SanitizeError> for NormalizeError {
    fn from(e: SanitizeError) -> Self {
        NormalizeError::MalformedSource(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Result of a successful normalization, carrying enough detail for the
/// caller to drive its own metrics without this crate reaching for global
/// state.
#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub event: Event,
    /// `true` when the native severity was missing or unparseable and
    /// `severity_band` was set to the `MEDIUM` default rather than failing
    /// normalization outright.
    pub severity_defaulted: bool,
}

/// Recognized detector families with a native severity mapping (§4.1 table).
/// Any other `source` tag falls back to the `MEDIUM` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    DetectorA,
    DetectorB,
    Unknown,
}

fn classify_source(source: &str) -> SourceKind {
    match source.to_ascii_lowercase().as_str() {
        "detector-a" | "detectora" => SourceKind::DetectorA,
        "detector-b" | "detectorb" => SourceKind::DetectorB,
        _ => SourceKind::Unknown,
    }
}

/// Normalize a raw finding into a canonical `Event`.
///
/// Fails with `MalformedSource` when required fields (id, time, account,
/// region, kind) cannot be extracted from `raw`. A missing or unparseable
/// native severity does NOT fail normalization — it defaults to `MEDIUM`
/// and is reported back via `severity_defaulted`.
pub fn normalize(source: &str, raw: &Value) -> Result<NormalizeOutcome> {
    sanitize_finding(source, raw)?;
    let obj = raw.as_object().expect("sanitize_finding checked is_object");

    let event_id = extract_str(obj, &["id", "Id", "finding_id", "FindingId", "Arn"])
        .ok_or_else(|| NormalizeError::MalformedSource("missing id field".to_string()))?;
    let observed_at = extract_time(obj, &["time", "CreatedAt", "UpdatedAt", "observed_at"])
        .ok_or_else(|| NormalizeError::MalformedSource("missing time field".to_string()))?;
    let account = extract_str(obj, &["account", "AccountId", "account_id"])
        .ok_or_else(|| NormalizeError::MalformedSource("missing account field".to_string()))?;
    let region = extract_str(obj, &["region", "Region"])
        .ok_or_else(|| NormalizeError::MalformedSource("missing region field".to_string()))?;
    let kind = extract_str(obj, &["kind", "Type", "Title"])
        .ok_or_else(|| NormalizeError::MalformedSource("missing kind field".to_string()))?;

    let (severity_band, severity_defaulted) = derive_severity_band(classify_source(source), obj);

    let event = Event {
        event_id,
        observed_at,
        ingested_at: Utc::now(),
        source: source.to_string(),
        account,
        region,
        kind,
        severity_band,
        raw: obj.clone(),
    };

    Ok(NormalizeOutcome {
        event,
        severity_defaulted,
    })
}

fn extract_str(obj: &serde_json::Map<String, Value>, candidates: &[&str]) -> Option<String> {
    for key in candidates {
        if let Some(v) = obj.get(*key) {
            if let Some(s) = v.as_str() {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

fn extract_time(obj: &serde_json::Map<String, Value>, candidates: &[&str]) -> Option<DateTime<Utc>> {
    for key in candidates {
        if let Some(s) = obj.get(*key).and_then(Value::as_str)
            && let Ok(parsed) = DateTime::parse_from_rfc3339(s)
        {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

/// Derive `severity_band` per the §4.1 table. Returns `(band, defaulted)`.
fn derive_severity_band(
    source_kind: SourceKind,
    obj: &serde_json::Map<String, Value>,
) -> (SeverityBand, bool) {
    match source_kind {
        SourceKind::DetectorA => match obj.get("severity").and_then(Value::as_f64) {
            Some(score) => (band_from_detector_a(score), false),
            None => (SeverityBand::Medium, true),
        },
        SourceKind::DetectorB => match obj
            .get("Severity")
            .and_then(Value::as_object)
            .and_then(|s| s.get("Normalized"))
            .and_then(Value::as_f64)
        {
            Some(score) => (band_from_detector_b(score), false),
            None => (SeverityBand::Medium, true),
        },
        SourceKind::Unknown => (SeverityBand::Medium, false),
    }
}

fn band_from_detector_a(score: f64) -> SeverityBand {
    if score >= 7.0 {
        SeverityBand::Critical
    } else if score >= 4.0 {
        SeverityBand::High
    } else if score >= 1.0 {
        SeverityBand::Medium
    } else {
        SeverityBand::Low
    }
}

fn band_from_detector_b(score: f64) -> SeverityBand {
    if score >= 70.0 {
        SeverityBand::Critical
    } else if score >= 40.0 {
        SeverityBand::High
    } else if score >= 1.0 {
        SeverityBand::Medium
    } else {
        SeverityBand::Low
    }
}
