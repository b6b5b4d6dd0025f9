//! Lock-free metrics collection
//!
//! Uses atomics for hot-path operations to avoid mutex contention. Counters
//! are monotonic so the Prometheus endpoint and the periodic log line can
//! read them independently; only the log interval's request rate is derived
//! from a swap.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Gateway round-trip bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// How a QR or manual identifier resolution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrResult {
    Resolved,
    InvalidFormat,
    NotFound,
    Inactive,
    Failed,
}

/// Lock-free metrics collector
pub struct Metrics {
    qr_resolved: AtomicU64,
    qr_invalid: AtomicU64,
    qr_not_found: AtomicU64,
    qr_inactive: AtomicU64,
    qr_failed: AtomicU64,
    bookings_created: AtomicU64,
    bookings_failed: AtomicU64,
    sign_ins: AtomicU64,
    sign_in_failures: AtomicU64,
    registrations: AtomicU64,
    http_requests: AtomicU64,
    /// Requests since last log line (reset on report)
    http_requests_since_report: AtomicU64,
    http_errors: AtomicU64,
    gateway_requests: AtomicU64,
    gateway_errors: AtomicU64,
    /// Cumulative gateway latency histogram
    gateway_latency_buckets: [AtomicU64; NUM_BUCKETS],
    gateway_latency_sum_ms: AtomicU64,
    gateway_latency_max_ms: AtomicU64,
    /// Live wizard sessions (gauge)
    active_sessions: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            qr_resolved: AtomicU64::new(0),
            qr_invalid: AtomicU64::new(0),
            qr_not_found: AtomicU64::new(0),
            qr_inactive: AtomicU64::new(0),
            qr_failed: AtomicU64::new(0),
            bookings_created: AtomicU64::new(0),
            bookings_failed: AtomicU64::new(0),
            sign_ins: AtomicU64::new(0),
            sign_in_failures: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            http_requests_since_report: AtomicU64::new(0),
            http_errors: AtomicU64::new(0),
            gateway_requests: AtomicU64::new(0),
            gateway_errors: AtomicU64::new(0),
            gateway_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            gateway_latency_sum_ms: AtomicU64::new(0),
            gateway_latency_max_ms: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    pub fn record_qr(&self, result: QrResult) {
        let counter = match result {
            QrResult::Resolved => &self.qr_resolved,
            QrResult::InvalidFormat => &self.qr_invalid,
            QrResult::NotFound => &self.qr_not_found,
            QrResult::Inactive => &self.qr_inactive,
            QrResult::Failed => &self.qr_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_booking_created(&self) {
        self.bookings_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_booking_failed(&self) {
        self.bookings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sign_in(&self, ok: bool) {
        if ok {
            self.sign_ins.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sign_in_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self, status: u16) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
        self.http_requests_since_report.fetch_add(1, Ordering::Relaxed);
        if status >= 500 {
            self.http_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one backend round trip
    #[inline]
    pub fn record_gateway_latency(&self, latency_ms: u64) {
        self.gateway_requests.fetch_add(1, Ordering::Relaxed);
        self.gateway_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.gateway_latency_max_ms, latency_ms);
        self.gateway_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gateway_error(&self) {
        self.gateway_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    pub fn bookings_created(&self) -> u64 {
        self.bookings_created.load(Ordering::Relaxed)
    }

    pub fn gateway_errors(&self) -> u64 {
        self.gateway_errors.load(Ordering::Relaxed)
    }

    pub fn qr_count(&self, result: QrResult) -> u64 {
        match result {
            QrResult::Resolved => &self.qr_resolved,
            QrResult::InvalidFormat => &self.qr_invalid,
            QrResult::NotFound => &self.qr_not_found,
            QrResult::Inactive => &self.qr_inactive,
            QrResult::Failed => &self.qr_failed,
        }
        .load(Ordering::Relaxed)
    }

    /// Snapshot all counters for the periodic log line. Only the
    /// request-rate window is reset.
    pub fn report(&self) -> MetricsSummary {
        let requests_in_window = self.http_requests_since_report.swap(0, Ordering::Relaxed);
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        self.summarize(requests_in_window, elapsed.as_secs_f64())
    }

    /// Read-only snapshot for scrapers; leaves the rate window untouched
    pub fn snapshot(&self) -> MetricsSummary {
        let requests_in_window = self.http_requests_since_report.load(Ordering::Relaxed);
        let elapsed = self.last_report_time.lock().elapsed();
        self.summarize(requests_in_window, elapsed.as_secs_f64())
    }

    fn summarize(&self, requests_in_window: u64, elapsed_secs: f64) -> MetricsSummary {
        let requests_per_sec = if elapsed_secs > 0.0 {
            requests_in_window as f64 / elapsed_secs
        } else {
            0.0
        };

        let gateway_latency_buckets = load_buckets(&self.gateway_latency_buckets);
        let gateway_requests = self.gateway_requests.load(Ordering::Relaxed);
        let gateway_latency_sum_ms = self.gateway_latency_sum_ms.load(Ordering::Relaxed);
        let gateway_latency_avg_ms =
            if gateway_requests > 0 { gateway_latency_sum_ms / gateway_requests } else { 0 };

        MetricsSummary {
            qr_resolved: self.qr_resolved.load(Ordering::Relaxed),
            qr_invalid: self.qr_invalid.load(Ordering::Relaxed),
            qr_not_found: self.qr_not_found.load(Ordering::Relaxed),
            qr_inactive: self.qr_inactive.load(Ordering::Relaxed),
            qr_failed: self.qr_failed.load(Ordering::Relaxed),
            bookings_created: self.bookings_created.load(Ordering::Relaxed),
            bookings_failed: self.bookings_failed.load(Ordering::Relaxed),
            sign_ins: self.sign_ins.load(Ordering::Relaxed),
            sign_in_failures: self.sign_in_failures.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
            requests_per_sec,
            gateway_requests,
            gateway_errors: self.gateway_errors.load(Ordering::Relaxed),
            gateway_latency_sum_ms,
            gateway_latency_avg_ms,
            gateway_latency_max_ms: self.gateway_latency_max_ms.load(Ordering::Relaxed),
            gateway_latency_p99_ms: percentile_from_buckets(&gateway_latency_buckets, 0.99),
            gateway_latency_buckets,
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub qr_resolved: u64,
    pub qr_invalid: u64,
    pub qr_not_found: u64,
    pub qr_inactive: u64,
    pub qr_failed: u64,
    pub bookings_created: u64,
    pub bookings_failed: u64,
    pub sign_ins: u64,
    pub sign_in_failures: u64,
    pub registrations: u64,
    pub http_requests: u64,
    /// Responses with a 5xx status
    pub http_errors: u64,
    pub requests_per_sec: f64,
    pub gateway_requests: u64,
    pub gateway_errors: u64,
    /// Gateway latency histogram
    /// Bounds: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000 ms
    pub gateway_latency_buckets: [u64; NUM_BUCKETS],
    pub gateway_latency_sum_ms: u64,
    pub gateway_latency_avg_ms: u64,
    pub gateway_latency_max_ms: u64,
    pub gateway_latency_p99_ms: u64,
    pub active_sessions: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            http_requests = %self.http_requests,
            requests_per_sec = format!("{:.2}", self.requests_per_sec),
            qr_resolved = %self.qr_resolved,
            qr_rejected = %(self.qr_invalid + self.qr_not_found + self.qr_inactive),
            bookings_created = %self.bookings_created,
            bookings_failed = %self.bookings_failed,
            gateway_errors = %self.gateway_errors,
            gateway_p99_ms = %self.gateway_latency_p99_ms,
            active_sessions = %self.active_sessions,
            "metrics"
        );
    }
}
