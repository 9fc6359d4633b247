use std::collections::VecDeque;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::MetricsRecord;
use crate::clock::Delay;

// ─── Configuration ───────────────────────────────────────────────

/// How many recent records we keep for the live feed
const MAX_RECENT_RECORDS: usize = 50;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Local bookkeeping of what the sender did with each record.
///
/// The dispatcher reports built records and observer failures, the
/// transport reports writes and drops. Nothing here is sent to the
/// collector.
pub struct DeliveryStats {
    inner: Mutex<Inner>,
}

/// Why a record never reached the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The transport was not `Connected`.
    NotConnected,
    /// The outbound queue was at capacity.
    QueueFull,
}

/// One entry in the live feed.
#[derive(Debug, Clone, Serialize)]
pub struct RecentRecord {
    pub timestamp_ms: u64,
    pub path: String,
    pub status_code: u16,
    pub delay_ms: String,
}

/// Response delays of the built records, in the wire's millisecond format.
///
/// All fields are `None` until the first record is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelaySummary {
    pub count: u64,
    pub p50_ms: Option<String>,
    pub p99_ms: Option<String>,
    pub max_ms: Option<String>,
}

/// Read-only view for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub response_delay: DelaySummary,

    pub records_built: u64,
    pub records_sent: u64,
    pub dropped_not_connected: u64,
    pub dropped_queue_full: u64,
    pub observer_errors: u64,
    /// Text frames the collector sent us, recognised or not.
    pub control_messages: u64,
    pub records_per_sec: f64,
    pub elapsed_secs: f64,

    pub recent: Vec<RecentRecord>,
}

impl StatsSnapshot {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::NotConnected => self.dropped_not_connected,
            DropReason::QueueFull => self.dropped_queue_full,
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_not_connected + self.dropped_queue_full
    }
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    // None only if the bounds were rejected; delays are then not summarised
    response_delay_hist: Option<Histogram<u64>>,

    records_built: u64,
    records_sent: u64,
    dropped_not_connected: u64,
    dropped_queue_full: u64,
    observer_errors: u64,
    control_messages: u64,

    recent: VecDeque<RecentRecord>,

    // Anchor for elapsed time, set on the first record
    start_time: Option<Instant>,
}

// ─── DeliveryStats impl ──────────────────────────────────────────

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// A record was assembled for a completed response.
    pub fn record_built(&self, record: &MetricsRecord) {
        self.inner.lock().record_built(record);
    }

    /// A record was written to the collector socket.
    pub fn record_sent(&self) {
        self.inner.lock().records_sent += 1;
    }

    pub fn record_dropped(&self, reason: DropReason) {
        let mut inner = self.inner.lock();
        match reason {
            DropReason::NotConnected => inner.dropped_not_connected += 1,
            DropReason::QueueFull => inner.dropped_queue_full += 1,
        }
    }

    /// The response body failed; no record was built.
    pub fn record_observer_error(&self) {
        self.inner.lock().observer_errors += 1;
    }

    /// A text frame arrived from the collector.
    pub fn record_control_message(&self) {
        self.inner.lock().control_messages += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            response_delay_hist: Histogram::<u64>::new_with_bounds(
                HIST_LOW, HIST_HIGH, HIST_SIGFIG,
            )
            .ok(),
            records_built: 0,
            records_sent: 0,
            dropped_not_connected: 0,
            dropped_queue_full: 0,
            observer_errors: 0,
            control_messages: 0,
            recent: VecDeque::with_capacity(MAX_RECENT_RECORDS + 1),
            start_time: None,
        }
    }

    fn record_built(&mut self, record: &MetricsRecord) {
        let start = *self.start_time.get_or_insert_with(Instant::now);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        self.records_built += 1;

        // Clamp into the histogram range; out-of-range values are not an error
        if let Some(hist) = self.response_delay_hist.as_mut() {
            let us = record.res.delay.as_micros().clamp(HIST_LOW, HIST_HIGH);
            let _ = hist.record(us);
        }

        self.recent.push_back(RecentRecord {
            timestamp_ms: elapsed_ms,
            path: record.req.path.clone(),
            status_code: record.res.status_code,
            delay_ms: record.res.delay.ms.clone(),
        });
        if self.recent.len() > MAX_RECENT_RECORDS {
            self.recent.pop_front();
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let rate = if elapsed_secs > 0.0 {
            self.records_built as f64 / elapsed_secs
        } else {
            0.0
        };

        StatsSnapshot {
            response_delay: self.delay_summary(),
            records_built: self.records_built,
            records_sent: self.records_sent,
            dropped_not_connected: self.dropped_not_connected,
            dropped_queue_full: self.dropped_queue_full,
            observer_errors: self.observer_errors,
            control_messages: self.control_messages,
            records_per_sec: rate,
            elapsed_secs,
            recent: self.recent.iter().cloned().collect(),
        }
    }

    fn delay_summary(&self) -> DelaySummary {
        let Some(hist) = self.response_delay_hist.as_ref().filter(|h| h.len() > 0) else {
            return DelaySummary::default();
        };
        let ms = |us: u64| Some(Delay::from_nanos(us.saturating_mul(1_000)).ms);

        DelaySummary {
            count: hist.len(),
            p50_ms: ms(hist.value_at_quantile(0.50)),
            p99_ms: ms(hist.value_at_quantile(0.99)),
            max_ms: ms(hist.max()),
        }
    }
}
