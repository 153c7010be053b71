//! Event Bus (C2): a partitioned, ordered-per-key, bounded buffer between
//! the Normalizer and the Scorer (§4.2, §5).
//!
//! Implementation shape: a fixed number of partition lanes, each an
//! independent bounded `tokio::sync::mpsc` channel. An event's lane is
//! `hash(event_id) % lane_count`, which guarantees same-key ordering
//! without a global sequencer — messages for the same `event_id` are
//! always enqueued to, and dequeued from, the same lane in FIFO order.

#![forbid(unsafe_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aegis_proto::Event;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("backpressure")]
    Backpressure,
}

pub type Result<T> = std::result::Result<T, BusError>;

/// An event plus the wall-clock time it was enqueued, used to enforce the
/// retention bound on dequeue.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub event: Event,
    pub enqueued_at: DateTime<Utc>,
}

/// Counters exposed by the bus for the operational surface (§6.5) and the
/// pipeline-wide metrics exporter.
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub aged_out_total: AtomicU64,
    pub enqueued_total: AtomicU64,
    pub rejected_total: AtomicU64,
}

impl BusMetrics {
    pub fn aged_out_total(&self) -> u64 {
        self.aged_out_total.load(Ordering::Relaxed)
    }
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::Relaxed)
    }
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }
}

/// Producer-side handle to the bus. Cheap to clone; shared by every
/// Normalizer/Ingress task.
#[derive(Clone)]
pub struct EventBus {
    lanes: Arc<Vec<mpsc::Sender<BusMessage>>>,
    retention: ChronoDuration,
    metrics: Arc<BusMetrics>,
}

impl EventBus {
    /// Create a bus with `lane_count` independent lanes, each bounded to
    /// `capacity` in-flight messages, retaining messages for
    /// `retention_hours` before they are dropped on dequeue.
    ///
    /// Returns the bus handle and one `Receiver` per lane for the Scorer's
    /// worker pool to consume from.
    pub fn new(
        lane_count: usize,
        capacity: usize,
        retention_hours: i64,
    ) -> (Self, Vec<mpsc::Receiver<BusMessage>>) {
        assert!(lane_count > 0, "lane_count must be > 0");
        assert!(capacity > 0, "capacity must be > 0");

        let mut senders = Vec::with_capacity(lane_count);
        let mut receivers = Vec::with_capacity(lane_count);
        for _ in 0..lane_count {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }

        let bus = Self {
            lanes: Arc::new(senders),
            retention: ChronoDuration::hours(retention_hours),
            metrics: Arc::new(BusMetrics::default()),
        };
        (bus, receivers)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    fn lane_for(&self, event_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        event_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.lanes.len()
    }

    /// Enqueue an event. Fails with `Backpressure` if the target lane's
    /// queue is full — the Ingress adapter MUST translate this into a
    /// retryable failure to the caller.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let lane = self.lane_for(&event.event_id);
        let message = BusMessage {
            event,
            enqueued_at: Utc::now(),
        };
        match self.lanes[lane].try_send(message) {
            Ok(()) => {
                self.metrics.enqueued_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.metrics.rejected_total.fetch_add(1, Ordering::Relaxed);
                Err(BusError::Backpressure)
            }
        }
    }

    /// Best-effort estimate of total in-flight messages across all lanes,
    /// for the `bus_depth` health-surface field (§6.5).
    pub fn approx_depth(&self) -> usize {
        self.lanes.iter().map(|tx| tx.max_capacity() - tx.capacity()).sum()
    }
}

/// Pull the next non-aged-out message off a lane, dropping and counting
/// any messages that have sat in the queue longer than the retention
/// bound. Returns `None` once the lane is closed and drained.
pub async fn recv_fresh(
    receiver: &mut mpsc::Receiver<BusMessage>,
    retention: ChronoDuration,
    metrics: &BusMetrics,
) -> Option<Event> {
    loop {
        let message = receiver.recv().await?;
        let age = Utc::now() - message.enqueued_at;
        if age > retention {
            metrics.aged_out_total.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = %message.event.event_id, age_secs = age.num_seconds(), "event aged out of bus");
            continue;
        }
        return Some(message.event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            observed_at: Utc::now(),
            ingested_at: Utc::now(),
            source: "detector-a".to_string(),
            account: "111".to_string(),
            region: "us-east-1".to_string(),
            kind: "Recon".to_string(),
            severity_band: aegis_proto::SeverityBand::Low,
            raw: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn same_key_delivered_in_order_to_one_lane() {
        let (bus, mut receivers) = EventBus::new(4, 16, 24);
        let lane = bus.lane_for("same-key");
        bus.enqueue(make_event("same-key")).unwrap();
        bus.enqueue({
            let mut e = make_event("same-key");
            e.kind = "second".to_string();
            e
        })
        .unwrap();

        let first = receivers[lane].recv().await.unwrap();
        let second = receivers[lane].recv().await.unwrap();
        assert_eq!(first.event.kind, "Recon");
        assert_eq!(second.event.kind, "second");
    }

    #[tokio::test]
    async fn backpressure_on_full_lane() {
        let (bus, _receivers) = EventBus::new(1, 1, 24);
        bus.enqueue(make_event("a")).unwrap();
        assert_eq!(bus.enqueue(make_event("b")), Err(BusError::Backpressure));
        assert_eq!(bus.metrics().rejected_total(), 1);
    }

    #[tokio::test]
    async fn aged_out_messages_are_dropped_and_counted() {
        let (bus, mut receivers) = EventBus::new(1, 16, 24);
        bus.enqueue(make_event("a")).unwrap();
        drop(bus); // close the channel so recv_fresh terminates once drained

        let lane = &mut receivers[0];
        let metrics = BusMetrics::default();
        let result = recv_fresh(lane, ChronoDuration::seconds(-1), &metrics).await;
        assert!(result.is_none());
        assert_eq!(metrics.aged_out_total(), 1);
    }
}
