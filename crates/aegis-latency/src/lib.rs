//! Per-stage latency tracking (§6.5): a small bounded time-series buffer
//! per stage name, with a percentile helper. Backs both the operational
//! health surface (`stage_latencies_p50_p95_p99`) and the Prometheus
//! exporter's histogram-shaped output.

#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;

/// Fixed-capacity ring buffer of latency samples (milliseconds), oldest
/// evicted first once full.
pub struct TimeSeriesBuffer {
    capacity: usize,
    buffer: VecDeque<f64>,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample_ms: f64) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample_ms);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Nearest-rank percentile, `p` in `[0.0, 1.0]`. `None` if empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.buffer.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p * sorted.len() as f64).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        Some(sorted[rank])
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            p50: self.percentile(0.50).unwrap_or(0.0),
            p95: self.percentile(0.95).unwrap_or(0.0),
            p99: self.percentile(0.99).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Named collection of per-stage buffers, shared across the Orchestrator's
/// worker tasks.
pub struct StageLatencies {
    capacity: usize,
    buffers: RwLock<HashMap<String, TimeSeriesBuffer>>,
}

impl StageLatencies {
    pub fn new(capacity_per_stage: usize) -> Self {
        Self {
            capacity: capacity_per_stage,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, stage: &str, elapsed: Duration) {
        let mut buffers = self.buffers.write();
        buffers
            .entry(stage.to_string())
            .or_insert_with(|| TimeSeriesBuffer::new(self.capacity))
            .push(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn percentiles(&self, stage: &str) -> Option<Percentiles> {
        let buffers = self.buffers.read();
        let buffer = buffers.get(stage)?;
        if buffer.is_empty() {
            return None;
        }
        Some(buffer.percentiles())
    }

    /// Snapshot of `{stage -> percentiles}` for every stage with at
    /// least one sample, for the health surface and metrics exporter.
    pub fn snapshot_all(&self) -> HashMap<String, Percentiles> {
        self.buffers
            .read()
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(stage, b)| (stage.clone(), b.percentiles()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_single_sample_is_itself() {
        let mut buf = TimeSeriesBuffer::new(4);
        buf.push(10.0);
        assert_eq!(buf.percentile(0.5), Some(10.0));
        assert_eq!(buf.percentile(0.99), Some(10.0));
    }

    #[test]
    fn percentiles_over_sorted_range() {
        let mut buf = TimeSeriesBuffer::new(100);
        for ms in 1..=100 {
            buf.push(ms as f64);
        }
        let p = buf.percentiles();
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p95, 95.0);
        assert_eq!(p.p99, 99.0);
    }

    #[test]
    fn eviction_drops_oldest_sample() {
        let mut buf = TimeSeriesBuffer::new(2);
        buf.push(1.0);
        buf.push(2.0);
        buf.push(3.0);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.percentile(0.0), Some(2.0));
    }

    #[test]
    fn empty_buffer_has_no_percentile() {
        let buf = TimeSeriesBuffer::new(4);
        assert_eq!(buf.percentile(0.5), None);
    }

    #[test]
    fn stage_latencies_tracks_independent_stages() {
        let stages = StageLatencies::new(16);
        stages.record("normalize", Duration::from_millis(5));
        stages.record("score", Duration::from_millis(50));

        assert!(stages.percentiles("normalize").unwrap().p50 < stages.percentiles("score").unwrap().p50);
        assert!(stages.percentiles("unknown_stage").is_none());
    }

    #[test]
    fn snapshot_all_only_includes_stages_with_samples() {
        let stages = StageLatencies::new(16);
        stages.record("normalize", Duration::from_millis(5));
        let snapshot = stages.snapshot_all();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("normalize"));
    }
}
