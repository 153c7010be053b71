//! Input sanitization for raw findings (§4.1).
//!
//! A pure validation pass that runs before field extraction in the
//! Normalizer: reject a raw finding outright if its shape cannot possibly
//! carry a canonical `Event`, before spending any work trying to extract
//! fields from it. Stateless, no I/O, no side effects.

#![forbid(unsafe_code)]

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("raw finding payload is not a JSON object")]
    NotAnObject,
    #[error("source tag is empty")]
    EmptySource,
}

/// Reject a raw finding before field extraction if its `raw` payload is not
/// a JSON object, or if the declared `source` tag is empty.
///
/// This check is intentionally narrow: it does not know anything about
/// per-source required fields (id, time, account, region, kind) — that is
/// the Normalizer's job once this pass has confirmed the payload is at
/// least shaped like something worth extracting from.
pub fn sanitize_finding(source: &str, raw: &Value) -> Result<(), SanitizeError> {
    if source.trim().is_empty() {
        return Err(SanitizeError::EmptySource);
    }
    if !raw.is_object() {
        return Err(SanitizeError::NotAnObject);
    }
    Ok(())
}

/// Defensive string trim-and-cap used when copying detector-supplied text
/// (e.g. `kind`) into the canonical `Event` — avoids unbounded strings from
/// a misbehaving or hostile detector propagating into logs and storage.
pub fn clamp_str(raw: &str, max_len: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= max_len {
        trimmed.to_string()
    } else {
        trimmed.chars().take(max_len).collect()
    }
}
