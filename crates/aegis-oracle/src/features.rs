//! Deterministic feature extraction from a normalized `Event`, handed to
//! the ML oracle (§4.3).

use aegis_proto::Event;
use serde::{Deserialize, Serialize};

/// A fixed, deterministic view of an event suitable for scoring. Built
/// only from the event's canonical fields, never from mutable pipeline
/// state, so the same event always produces the same feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub source: String,
    pub account: String,
    pub region: String,
    pub kind: String,
    pub severity_weight: f64,
    pub raw_field_count: usize,
}

pub fn extract_features(event: &Event) -> FeatureVector {
    FeatureVector {
        source: event.source.clone(),
        account: event.account.clone(),
        region: event.region.clone(),
        kind: event.kind.clone(),
        severity_weight: event.severity_band.weight(),
        raw_field_count: event.raw.len(),
    }
}
