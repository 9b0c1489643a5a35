//! Counters, gauges and histograms for the bus and the broadcaster
//!
//! Everything here is lock-free (plain atomics) so the relay loop and the
//! HTTP handlers can update metrics on the hot path. Exposition is up to the
//! embedding application: call `snapshot()` and export however you like.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Latency buckets in seconds, upper bounds
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.003, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0,
];

/// End-to-end latency buckets in seconds, upper bounds
pub const E2E_BUCKETS: &[f64] = &[0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge that can go up and down
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket histogram of durations
///
/// Bucket counts are non-cumulative; the last slot counts observations above
/// the largest bound.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given upper bounds (seconds, ascending)
    pub fn new(bounds: &'static [f64]) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    /// Record one observation
    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let idx = self
            .bounds
            .iter()
            .position(|&bound| secs <= bound)
            .unwrap_or(self.bounds.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.to_vec(),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count(),
            sum: Duration::from_micros(self.sum_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Copy of a histogram's state
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Upper bounds in seconds
    pub bounds: Vec<f64>,
    /// Per-bucket counts, one more than `bounds` (overflow last)
    pub buckets: Vec<u64>,
    /// Total observations
    pub count: u64,
    /// Sum of all observations
    pub sum: Duration,
}

impl HistogramSnapshot {
    /// Mean observation, zero when empty
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.sum.as_secs_f64() / self.count as f64)
        }
    }
}

/// Bus proxy metrics
#[derive(Debug)]
pub struct ProxyStats {
    /// Data frames read from producers
    pub frames_in: Counter,
    /// Data frames handed to consumers (one per delivering relay, not per consumer)
    pub frames_out: Counter,
    /// Payload bytes read from producers
    pub bytes_in: Counter,
    /// Payload bytes relayed to consumers
    pub bytes_out: Counter,
    /// Subscription intents read from consumers
    pub intents_in: Counter,
    /// Subscription intents forwarded to producers
    pub intents_out: Counter,
    /// Intent bytes read from consumers
    pub intent_bytes: Counter,
    /// Frames dropped because they had no segments
    pub malformed_frames: Counter,
    /// Per-consumer deliveries dropped because the consumer queue was full
    pub dropped_frames: Counter,
    /// Connections closed because of a protocol error
    pub protocol_errors: Counter,
    /// Currently attached producers
    pub producers: Gauge,
    /// Currently attached consumers
    pub consumers: Gauge,
    /// Time to forward one frame to every matching consumer
    pub frame_forward_latency: Histogram,
    /// Time to forward one intent to every producer
    pub intent_forward_latency: Histogram,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            frames_in: Counter::new(),
            frames_out: Counter::new(),
            bytes_in: Counter::new(),
            bytes_out: Counter::new(),
            intents_in: Counter::new(),
            intents_out: Counter::new(),
            intent_bytes: Counter::new(),
            malformed_frames: Counter::new(),
            dropped_frames: Counter::new(),
            protocol_errors: Counter::new(),
            producers: Gauge::new(),
            consumers: Gauge::new(),
            frame_forward_latency: Histogram::new(LATENCY_BUCKETS),
            intent_forward_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Point-in-time copy of every metric
    pub fn snapshot(&self) -> ProxyStatsSnapshot {
        ProxyStatsSnapshot {
            frames_in: self.frames_in.get(),
            frames_out: self.frames_out.get(),
            bytes_in: self.bytes_in.get(),
            bytes_out: self.bytes_out.get(),
            intents_in: self.intents_in.get(),
            intents_out: self.intents_out.get(),
            intent_bytes: self.intent_bytes.get(),
            malformed_frames: self.malformed_frames.get(),
            dropped_frames: self.dropped_frames.get(),
            protocol_errors: self.protocol_errors.get(),
            producers: self.producers.get(),
            consumers: self.consumers.get(),
            frame_forward_latency: self.frame_forward_latency.snapshot(),
            intent_forward_latency: self.intent_forward_latency.snapshot(),
        }
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of `ProxyStats`
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyStatsSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub intents_in: u64,
    pub intents_out: u64,
    pub intent_bytes: u64,
    pub malformed_frames: u64,
    pub dropped_frames: u64,
    pub protocol_errors: u64,
    pub producers: i64,
    pub consumers: i64,
    pub frame_forward_latency: HistogramSnapshot,
    pub intent_forward_latency: HistogramSnapshot,
}

/// Frame feed metrics
#[derive(Debug)]
pub struct FeedStats {
    /// Frames received from the bus
    pub frames_in: Counter,
    /// Payload bytes received from the bus
    pub bytes_in: Counter,
    /// Frames published to the broadcaster
    pub published: Counter,
    /// Frames skipped because of bad layout or metadata
    pub decode_errors: Counter,
    /// Times the bus connection was (re)established
    pub connects: Counter,
    /// Capture-to-ingest latency, from the `ts_capture` metadata key
    pub e2e_latency: Histogram,
}

impl FeedStats {
    pub fn new() -> Self {
        Self {
            frames_in: Counter::new(),
            bytes_in: Counter::new(),
            published: Counter::new(),
            decode_errors: Counter::new(),
            connects: Counter::new(),
            e2e_latency: Histogram::new(E2E_BUCKETS),
        }
    }
}

impl Default for FeedStats {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP endpoint metrics
#[derive(Debug, Default)]
pub struct HttpStats {
    /// Currently connected streaming clients
    pub stream_clients: Gauge,
    /// Multipart parts written across all streaming clients
    pub parts_sent: Counter,
    /// Single-shot frame responses served
    pub snapshots_served: Counter,
}

impl HttpStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.inc();
        c.add(41);
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new();
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::new(LATENCY_BUCKETS);
        h.observe(Duration::from_micros(500)); // <= 1ms
        h.observe(Duration::from_millis(4)); // <= 5ms
        h.observe(Duration::from_secs(10)); // overflow

        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets.len(), LATENCY_BUCKETS.len() + 1);
        assert_eq!(snap.buckets[0], 1);
        assert_eq!(snap.buckets[2], 1);
        assert_eq!(*snap.buckets.last().unwrap(), 1);
    }

    #[test]
    fn test_histogram_mean() {
        let h = Histogram::new(E2E_BUCKETS);
        assert_eq!(h.snapshot().mean(), Duration::ZERO);

        h.observe(Duration::from_millis(10));
        h.observe(Duration::from_millis(30));
        let mean = h.snapshot().mean();
        assert!((mean.as_secs_f64() - 0.020).abs() < 1e-6, "{:?}", mean);
    }

    #[test]
    fn test_histogram_mean_large_count() {
        let snap = HistogramSnapshot {
            bounds: Vec::new(),
            buckets: vec![u32::MAX as u64 + 1],
            count: u32::MAX as u64 + 1,
            sum: Duration::from_secs(u32::MAX as u64 + 1),
        };
        let mean = snap.mean();
        assert!((mean.as_secs_f64() - 1.0).abs() < 1e-6, "{:?}", mean);
    }

    #[test]
    fn test_proxy_stats_snapshot() {
        let stats = ProxyStats::new();
        stats.frames_in.inc();
        stats.bytes_in.add(128);
        stats.malformed_frames.inc();
        stats.consumers.inc();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_in, 1);
        assert_eq!(snap.bytes_in, 128);
        assert_eq!(snap.malformed_frames, 1);
        assert_eq!(snap.consumers, 1);
        assert_eq!(snap.dropped_frames, 0);
        assert_eq!(snap.frame_forward_latency.count, 0);
    }
}
