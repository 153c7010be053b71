//! Tamper-evident dead-letter queues (§7): one for events that cannot be
//! normalized or that exhaust a stage's retries, one for alerts whose
//! store write failed after bounded backoff.
//!
//! Records are chained by SHA-256 the same way this codebase already
//! chains its append-only logs: each record's hash covers its own
//! canonical JSON plus the previous record's hash, so tampering with any
//! record breaks `verify_chain` for everything after it.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::Path;

use aegis_persist::JsonStore;
use aegis_proto::Enrichment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub record_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    /// The stage that dead-lettered this event (e.g. `"normalize"`,
    /// `"store"`).
    pub stage: String,
    pub error_kind: String,
    pub error_message: String,
    /// Best-effort snapshot of whatever enrichment had accumulated
    /// before dead-lettering, for operator triage.
    pub enrichment_snapshot: Option<Enrichment>,
    pub previous_hash: String,
    pub record_hash: String,
}

/// A chain-hashed, JSON-snapshotted dead-letter log for one domain
/// (event DLQ or store-failure DLQ — callers open two distinct
/// instances with different `domain` names).
pub struct DeadLetterQueue {
    records: HashMap<String, DeadLetterRecord>,
    store: JsonStore,
    last_hash: String,
}

impl DeadLetterQueue {
    pub fn open(state_path: &Path, domain: &str) -> Self {
        let store = JsonStore::new(state_path, domain);
        let records: HashMap<String, DeadLetterRecord> = store.load();
        let last_hash = records
            .values()
            .max_by_key(|r| r.timestamp)
            .map(|r| r.record_hash.clone())
            .unwrap_or_default();

        info!(domain, record_count = records.len(), "dead-letter queue opened");
        Self {
            records,
            store,
            last_hash,
        }
    }

    /// Append a dead-letter record and persist the whole chain.
    pub fn append(
        &mut self,
        event_id: &str,
        stage: &str,
        error_kind: &str,
        error_message: &str,
        enrichment_snapshot: Option<Enrichment>,
    ) -> String {
        let record_id = Uuid::new_v4();
        let timestamp = Utc::now();

        let mut record = DeadLetterRecord {
            record_id,
            timestamp,
            event_id: event_id.to_string(),
            stage: stage.to_string(),
            error_kind: error_kind.to_string(),
            error_message: error_message.to_string(),
            enrichment_snapshot,
            previous_hash: self.last_hash.clone(),
            record_hash: String::new(),
        };
        let record_hash = canonical_record_hash(&record);
        record.record_hash = record_hash.clone();

        warn!(
            record_id = %record_id,
            event_id,
            stage,
            error_kind,
            "event dead-lettered"
        );

        self.last_hash = record_hash.clone();
        self.records.insert(record_id.to_string(), record);
        self.snapshot();

        record_hash
    }

    pub fn query(&self, event_id: Option<&str>, stage: Option<&str>, limit: usize) -> Vec<&DeadLetterRecord> {
        let mut results: Vec<&DeadLetterRecord> = self
            .records
            .values()
            .filter(|r| event_id.is_none_or(|id| r.event_id == id))
            .filter(|r| stage.is_none_or(|s| r.stage == s))
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        results.truncate(limit);
        results
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `true` if the chain is intact: every record's `previous_hash`
    /// matches its predecessor's `record_hash`, and every record's own
    /// `record_hash` still matches what its current fields hash to. The
    /// second check is what makes this tamper-evident rather than merely
    /// link-evident — editing a record's `error_message` in place (without
    /// also recomputing every hash after it) is caught even though the
    /// chain links themselves remain untouched.
    pub fn verify_chain(&self) -> bool {
        let mut sorted: Vec<&DeadLetterRecord> = self.records.values().collect();
        sorted.sort_by_key(|r| r.timestamp);

        let mut prev_hash = String::new();
        for record in sorted {
            if record.previous_hash != prev_hash {
                warn!(
                    record_id = %record.record_id,
                    expected = %prev_hash,
                    got = %record.previous_hash,
                    "dead-letter chain integrity violation"
                );
                return false;
            }
            let recomputed = canonical_record_hash(record);
            if recomputed != record.record_hash {
                warn!(
                    record_id = %record.record_id,
                    "dead-letter record content does not match its stored hash"
                );
                return false;
            }
            prev_hash = record.record_hash.clone();
        }
        true
    }

    fn snapshot(&self) {
        if let Err(e) = self.store.save(&self.records) {
            warn!(error = %e, "failed to snapshot dead-letter queue");
        }
    }
}

/// Hash over everything in `record` except `record_hash` itself — the same
/// canonical shape `append` hashes when first writing the record, so
/// `verify_chain` can recompute it from whatever is currently on disk.
fn canonical_record_hash(record: &DeadLetterRecord) -> String {
    let canonical = serde_json::json!({
        "record_id": record.record_id,
        "timestamp": record.timestamp,
        "event_id": record.event_id,
        "stage": record.stage,
        "error_kind": record.error_kind,
        "error_message": record.error_message,
        "previous_hash": record.previous_hash,
    });
    sha256_hex(&canonical.to_string())
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_query_by_event_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dlq = DeadLetterQueue::open(dir.path(), "events");

        dlq.append("e-1", "normalize", "malformed_source", "missing id field", None);

        let records = dlq.query(Some("e-1"), None, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, "normalize");
    }

    #[test]
    fn chain_integrity_holds_across_many_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dlq = DeadLetterQueue::open(dir.path(), "events");

        for i in 0..5 {
            dlq.append(&format!("e-{i}"), "store", "store_unavailable", "disk full", None);
        }

        assert!(dlq.verify_chain());
    }

    #[test]
    fn reopening_continues_the_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hash1 = {
            let mut dlq = DeadLetterQueue::open(dir.path(), "events");
            dlq.append("e-1", "normalize", "malformed_source", "bad payload", None)
        };

        let dlq2 = DeadLetterQueue::open(dir.path(), "events");
        assert_eq!(dlq2.len(), 1);
        assert_eq!(dlq2.last_hash, hash1);
    }

    #[test]
    fn tampering_with_a_record_content_breaks_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dlq = DeadLetterQueue::open(dir.path(), "events");
        dlq.append("e-1", "normalize", "malformed_source", "x", None);
        dlq.append("e-2", "normalize", "malformed_source", "y", None);
        assert!(dlq.verify_chain());

        for record in dlq.records.values_mut() {
            if record.event_id == "e-1" {
                record.error_message = "tampered".to_string();
            }
        }
        assert!(!dlq.verify_chain());
    }

    #[test]
    fn tampering_with_a_chain_link_breaks_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut dlq = DeadLetterQueue::open(dir.path(), "events");
        dlq.append("e-1", "normalize", "malformed_source", "x", None);
        dlq.append("e-2", "normalize", "malformed_source", "y", None);
        assert!(dlq.verify_chain());

        for record in dlq.records.values_mut() {
            if record.event_id == "e-2" {
                record.previous_hash = "corrupted".to_string();
            }
        }
        assert!(!dlq.verify_chain());
    }
}
