//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Reporting swaps the periodic counters to zero; monotonic counters are
//! only ever loaded.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive any guide decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
///
/// The overflow bucket reports twice the last finite bound.
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;
    let index = buckets
        .iter()
        .position(|&count| {
            cumulative += count;
            cumulative >= target
        })
        .unwrap_or(NUM_BUCKETS - 1);

    BUCKET_BOUNDS.get(index).copied().unwrap_or(BUCKET_BOUNDS[BUCKET_BOUNDS.len() - 1] * 2)
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total events processed by the reconciler (monotonic)
    events_total: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of event latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max event latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Event processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Reconciliation passes, halted passes included (monotonic)
    ticks_total: AtomicU64,
    /// Effective POI status writes (monotonic)
    status_writes_total: AtomicU64,
    /// Playback start commands issued (monotonic)
    playback_starts_total: AtomicU64,
    /// Playback stop commands issued (monotonic)
    playback_stops_total: AtomicU64,
    /// Sessions that ended naturally (monotonic)
    playback_ended_total: AtomicU64,
    /// Sessions that failed to load or play (monotonic)
    playback_failed_total: AtomicU64,
    /// Playback callbacks discarded as stale (monotonic)
    stale_events_total: AtomicU64,
    /// Playback commands dropped because the worker queue was full (monotonic)
    playback_cmds_dropped: AtomicU64,
    /// Location fixes forwarded by the feed (monotonic)
    location_fixes_total: AtomicU64,
    /// Tracking sessions ended by a location error (monotonic)
    location_errors_total: AtomicU64,
    /// Max delay between command enqueue and worker pickup (reset on report)
    playback_queue_delay_max_us: AtomicU64,
    /// Last report time for rate calculation
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ticks_total: AtomicU64::new(0),
            status_writes_total: AtomicU64::new(0),
            playback_starts_total: AtomicU64::new(0),
            playback_stops_total: AtomicU64::new(0),
            playback_ended_total: AtomicU64::new(0),
            playback_failed_total: AtomicU64::new(0),
            stale_events_total: AtomicU64::new(0),
            playback_cmds_dropped: AtomicU64::new(0),
            location_fixes_total: AtomicU64::new(0),
            location_errors_total: AtomicU64::new(0),
            playback_queue_delay_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an event was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status_write(&self) {
        self.status_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_start(&self) {
        self.playback_starts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_stop(&self) {
        self.playback_stops_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_ended(&self) {
        self.playback_ended_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_failed(&self) {
        self.playback_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_event(&self) {
        self.stale_events_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_cmd_dropped(&self) {
        self.playback_cmds_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_fix(&self) {
        self.location_fixes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_error(&self) {
        self.location_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time from command enqueue to worker pickup
    #[inline]
    pub fn record_playback_queue_delay(&self, delay_us: u64) {
        update_atomic_max(&self.playback_queue_delay_max_us, delay_us);
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    pub fn status_writes_total(&self) -> u64 {
        self.status_writes_total.load(Ordering::Relaxed)
    }

    pub fn playback_starts_total(&self) -> u64 {
        self.playback_starts_total.load(Ordering::Relaxed)
    }

    pub fn playback_stops_total(&self) -> u64 {
        self.playback_stops_total.load(Ordering::Relaxed)
    }

    pub fn stale_events_total(&self) -> u64 {
        self.stale_events_total.load(Ordering::Relaxed)
    }

    pub fn location_fixes_total(&self) -> u64 {
        self.location_fixes_total.load(Ordering::Relaxed)
    }

    /// Generate a metrics summary, resetting the periodic counters
    pub fn report(&self) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);
        let queue_delay_max = self.playback_queue_delay_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if events_count > 0 { latency_sum / events_count } else { 0 };

        MetricsSummary {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            status_writes_total: self.status_writes_total.load(Ordering::Relaxed),
            playback_starts_total: self.playback_starts_total.load(Ordering::Relaxed),
            playback_stops_total: self.playback_stops_total.load(Ordering::Relaxed),
            playback_ended_total: self.playback_ended_total.load(Ordering::Relaxed),
            playback_failed_total: self.playback_failed_total.load(Ordering::Relaxed),
            stale_events_total: self.stale_events_total.load(Ordering::Relaxed),
            playback_cmds_dropped: self.playback_cmds_dropped.load(Ordering::Relaxed),
            location_fixes_total: self.location_fixes_total.load(Ordering::Relaxed),
            location_errors_total: self.location_errors_total.load(Ordering::Relaxed),
            playback_queue_delay_max_us: queue_delay_max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the HTTP endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Event processing latency histogram buckets
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p99_us: u64,
    pub ticks_total: u64,
    pub status_writes_total: u64,
    pub playback_starts_total: u64,
    pub playback_stops_total: u64,
    pub playback_ended_total: u64,
    pub playback_failed_total: u64,
    pub stale_events_total: u64,
    pub playback_cmds_dropped: u64,
    pub location_fixes_total: u64,
    pub location_errors_total: u64,
    pub playback_queue_delay_max_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            fixes = %self.location_fixes_total,
            starts = %self.playback_starts_total,
            stops = %self.playback_stops_total,
            ended = %self.playback_ended_total,
            failed = %self.playback_failed_total,
            stale = %self.stale_events_total,
            "metrics"
        );
    }
}
