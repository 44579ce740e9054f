//! Selection metrics for watching how sampling time is shared out.

use crate::error::{Error, Result};
use crate::scheduler::ChannelIndex;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Highest gap tracked exactly by the histogram, in ticks. Longer gaps are
/// clamped to this value.
pub const MAX_TRACKED_GAP: u64 = 1_000_000;

/// Per-channel selection counters and a histogram of selection gaps.
///
/// A gap is the number of ticks between two consecutive selections of the
/// same channel; the tail of that distribution is what a starving channel
/// would show up in.
#[derive(Debug)]
pub struct SelectionMetrics {
    inner: Mutex<Inner>,
    start_time: Instant,
}

#[derive(Debug)]
struct Inner {
    ticks: u64,
    idle_ticks: u64,
    selections: Vec<u64>,
    last_selected: Vec<Option<u64>>,
    longest_gap: Vec<u64>,
    gap_histogram: Histogram<u64>,
}

impl SelectionMetrics {
    /// Create a collector for `channel_count` slots
    pub fn new(channel_count: usize) -> Result<Self> {
        let gap_histogram = Histogram::new_with_max(MAX_TRACKED_GAP, 3)
            .map_err(|e| Error::Other(format!("failed to create gap histogram: {e}")))?;

        Ok(Self {
            inner: Mutex::new(Inner {
                ticks: 0,
                idle_ticks: 0,
                selections: vec![0; channel_count],
                last_selected: vec![None; channel_count],
                longest_gap: vec![0; channel_count],
                gap_histogram,
            }),
            start_time: Instant::now(),
        })
    }

    /// Record the outcome of one scheduling tick
    pub fn record_tick(&self, selected: Option<ChannelIndex>) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let tick = inner.ticks;
        inner.ticks += 1;

        let Some(channel) = selected else {
            inner.idle_ticks += 1;
            return;
        };
        if channel >= inner.selections.len() {
            return;
        }

        inner.selections[channel] += 1;
        if let Some(previous) = inner.last_selected[channel] {
            let gap = tick - previous;
            inner.gap_histogram.saturating_record(gap);
            if gap > inner.longest_gap[channel] {
                inner.longest_gap[channel] = gap;
            }
        }
        inner.last_selected[channel] = Some(tick);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let histogram = &inner.gap_histogram;

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            ticks: inner.ticks,
            idle_ticks: inner.idle_ticks,
            selections: inner.selections.clone(),
            longest_gap: inner.longest_gap.clone(),
            mean_gap: if histogram.len() > 0 { histogram.mean() } else { 0.0 },
            p50_gap: histogram.value_at_quantile(0.50),
            p99_gap: histogram.value_at_quantile(0.99),
            max_gap: histogram.max(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.ticks = 0;
        inner.idle_ticks = 0;
        inner.selections.iter_mut().for_each(|c| *c = 0);
        inner.last_selected.iter_mut().for_each(|t| *t = None);
        inner.longest_gap.iter_mut().for_each(|g| *g = 0);
        inner.gap_histogram.reset();
    }
}

/// Snapshot of selection metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub ticks: u64,
    pub idle_ticks: u64,
    pub selections: Vec<u64>,
    pub longest_gap: Vec<u64>,
    pub mean_gap: f64,
    pub p50_gap: u64,
    pub p99_gap: u64,
    pub max_gap: u64,
}

impl MetricsSnapshot {
    pub fn total_selections(&self) -> u64 {
        self.selections.iter().sum()
    }

    pub fn selections_of(&self, channel: ChannelIndex) -> u64 {
        self.selections.get(channel).copied().unwrap_or(0)
    }

    /// Fraction of all selections that went to `channel` (0.0 to 1.0)
    pub fn selection_share(&self, channel: ChannelIndex) -> f64 {
        let total = self.total_selections();
        if total == 0 {
            return 0.0;
        }
        self.selections_of(channel) as f64 / total as f64
    }

    /// Calculate samples per second of wall time
    pub fn selections_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.total_selections() as f64 / seconds
    }
}
