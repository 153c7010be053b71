//! Aegis pipeline performance benchmarks using Criterion.
//!
//! Run with: `cargo bench -p aegis-bench`

use aegis_dlq::DeadLetterQueue;
use aegis_normalize::normalize;
use aegis_oracle::json_extract::extract_first_json_object;
use aegis_proto::{MlEnrichment, SeverityBand};
use aegis_store::AlertStore;
use aegis_triage::triage;
use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

// ─── bench_triage_formula ───────────────────────────────────────────────────

/// Triage runs once per scored event on the hot path between the ML Scorer
/// and the gates — it must stay cheap even under full event throughput.
fn bench_triage_formula(c: &mut Criterion) {
    let ml_enrichment = MlEnrichment {
        threat_score: 62.0,
        confidence: 0.8,
        model_version: "threat-scorer-v1".to_string(),
        scored_at: Utc::now(),
        error: None,
    };

    c.bench_function("triage_formula", |b| {
        b.iter(|| {
            let result = triage(
                black_box("detector-a"),
                black_box("UnauthorizedAccess:IAMUser/AnomalousToken"),
                black_box(SeverityBand::High),
                black_box(&ml_enrichment),
            );
            black_box(result.priority_score)
        });
    });
}

// ─── bench_normalize ─────────────────────────────────────────────────────────

/// Every ingested finding pays this cost before it ever reaches the bus.
fn bench_normalize(c: &mut Criterion) {
    let raw = json!({
        "Id": "finding-bench-1",
        "CreatedAt": "2026-07-28T00:00:00Z",
        "AccountId": "111122223333",
        "Region": "us-east-1",
        "Type": "UnauthorizedAccess:IAMUser/AnomalousToken",
        "severity": 7.5,
        "Resource": {"instanceDetails": {"instanceId": "i-0123456789abcdef0"}},
    });

    c.bench_function("normalize_detector_a_finding", |b| {
        b.iter(|| black_box(normalize(black_box("detector-a"), black_box(&raw))));
    });
}

// ─── bench_json_extract ──────────────────────────────────────────────────────

/// Parsing the deep-analysis oracle's response runs once per event that
/// clears the deep-analysis gate — must stay cheap relative to the LLM
/// round trip itself, which dwarfs it, but shouldn't add needless overhead.
fn bench_json_extract(c: &mut Criterion) {
    let response = "Based on the finding details, here is my assessment:\n```json\n{\"risk_score\": 8, \"attack_vector\": \"compromised IAM credential used from an unrecognized ASN\", \"recommended_actions\": [\"rotate credential\", \"review CloudTrail for lateral movement\"], \"business_impact\": \"potential account takeover\", \"confidence\": 0.82}\n```\nLet me know if further detail is needed.";

    c.bench_function("json_extract_fenced_response", |b| {
        b.iter(|| black_box(extract_first_json_object(black_box(response))));
    });
}

// ─── bench_dlq_chain_hash ─────────────────────────────────────────────────────

/// Appending to the dead-letter queue hashes the new record against the
/// chain's current tail on every call — measure the cost of building up a
/// realistically sized chain end to end, snapshot-to-disk included.
fn bench_dlq_chain_append(c: &mut Criterion) {
    c.bench_function("dlq_append_1000_records", |b| {
        b.iter_batched(
            || tempfile::tempdir().expect("tempdir"),
            |dir| {
                let mut dlq = DeadLetterQueue::open(dir.path(), "bench");
                for i in 0..1000u32 {
                    dlq.append(
                        black_box(&format!("e-{i}")),
                        black_box("normalize"),
                        black_box("MalformedSource"),
                        black_box("missing id field"),
                        None,
                    );
                }
                black_box(dlq.len())
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

// ─── bench_store_put_merge ────────────────────────────────────────────────────

/// The Alert Store persists the full in-memory map on every `put` — measure
/// the steady-state cost of repeated merges into a store that already holds
/// a realistic number of alerts.
fn bench_store_put_merge(c: &mut Criterion) {
    use aegis_proto::{Alert, AlertStatus, Enrichment, Event};

    let sample_event = |id: String| Event {
        event_id: id,
        observed_at: Utc::now(),
        ingested_at: Utc::now(),
        source: "detector-a".to_string(),
        account: "111122223333".to_string(),
        region: "us-east-1".to_string(),
        kind: "Recon:Port/Scan".to_string(),
        severity_band: SeverityBand::Low,
        raw: serde_json::Map::new(),
    };

    c.bench_function("store_put_merge_into_1000_existing", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().expect("tempdir");
                let store = AlertStore::open(dir.path(), 3600);
                let mut target_event = None;
                for i in 0..1000 {
                    let event = sample_event(format!("e-{i}"));
                    if i == 500 {
                        target_event = Some(event.clone());
                    }
                    store
                        .put(Alert {
                            event,
                            enrichment: Enrichment {
                                status: Some(AlertStatus::StoredOnly),
                                ..Default::default()
                            },
                            expires_at: Utc::now(),
                        })
                        .expect("seed put");
                }
                (dir, store, target_event.expect("seeded e-500"))
            },
            |(dir, store, target_event)| {
                // Re-put the same (event_id, observed_at) key with a higher
                // status to exercise the merge path, not just insert.
                store
                    .put(Alert {
                        event: target_event,
                        enrichment: Enrichment {
                            status: Some(AlertStatus::Notified),
                            ..Default::default()
                        },
                        expires_at: Utc::now(),
                    })
                    .expect("merge put");
                black_box(dir)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

// ─── Criterion groups ─────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_triage_formula,
    bench_normalize,
    bench_json_extract,
    bench_dlq_chain_append,
    bench_store_put_merge,
);
criterion_main!(benches);
