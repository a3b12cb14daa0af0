use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Process wide relay counters.
#[derive(Debug)]
pub struct RelayMetrics {
    // http
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,

    // sessions
    pub publishers_active: AtomicU64,
    pub relays_active: AtomicU64,
    pub subscribers_active: AtomicU64,
    pub subscribers_exhausted_total: AtomicU64,

    // data
    pub bytes_received_total: AtomicU64,
    pub bytes_sent_total: AtomicU64,
    pub packets_demuxed_total: AtomicU64,
    pub skips_total: AtomicU64,

    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            publishers_active: AtomicU64::new(0),
            relays_active: AtomicU64::new(0),
            subscribers_active: AtomicU64::new(0),
            subscribers_exhausted_total: AtomicU64::new(0),
            bytes_received_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),
            packets_demuxed_total: AtomicU64::new(0),
            skips_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_publishers(&self) {
        self.publishers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_publishers(&self) {
        self.publishers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_relays(&self) {
        self.relays_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_relays(&self) {
        self.relays_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_subscribers(&self) {
        self.subscribers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_subscribers(&self) {
        self.subscribers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_exhausted(&self) {
        self.subscribers_exhausted_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_packets_demuxed(&self, packets: u64) {
        self.packets_demuxed_total
            .fetch_add(packets, Ordering::Relaxed);
    }

    pub fn increment_skips(&self) {
        self.skips_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            publishers_active: self.publishers_active.load(Ordering::Relaxed),
            relays_active: self.relays_active.load(Ordering::Relaxed),
            subscribers_active: self.subscribers_active.load(Ordering::Relaxed),
            subscribers_exhausted_total: self.subscribers_exhausted_total.load(Ordering::Relaxed),
            bytes_received_total: self.bytes_received_total.load(Ordering::Relaxed),
            bytes_sent_total: self.bytes_sent_total.load(Ordering::Relaxed),
            packets_demuxed_total: self.packets_demuxed_total.load(Ordering::Relaxed),
            skips_total: self.skips_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub requests_total: u64,
    pub errors_total: u64,
    pub publishers_active: u64,
    pub relays_active: u64,
    pub subscribers_active: u64,
    pub subscribers_exhausted_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub packets_demuxed_total: u64,
    pub skips_total: u64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn get_global_metrics() -> Arc<RelayMetrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(RelayMetrics::new()))
        .clone()
}

#[macro_export]
macro_rules! metrics {
    ($counter:ident) => {
        $crate::metrics::get_global_metrics().$counter()
    };
    ($counter:ident, $value:expr) => {
        $crate::metrics::get_global_metrics().$counter($value)
    };
}
