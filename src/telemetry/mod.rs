//! Telemetry and observability subsystem.
//!
//! Tracks how sampling time is shared between channels and exports
//! snapshots for offline inspection.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{MetricsSnapshot, SelectionMetrics};

#[cfg(feature = "telemetry")]
pub use export::{JsonExporter, MetricsExporter};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    use crate::error::Result;
    use crate::scheduler::ChannelIndex;

    #[derive(Debug, Clone, Default)]
    pub struct SelectionMetrics;

    impl SelectionMetrics {
        pub fn new(_: usize) -> Result<Self> { Ok(Self) }
        pub fn record_tick(&self, _: Option<ChannelIndex>) {}
        pub fn snapshot(&self) -> MetricsSnapshot { MetricsSnapshot::default() }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct MetricsSnapshot {
        pub ticks: u64,
        pub idle_ticks: u64,
        pub selections: Vec<u64>,
    }

    impl MetricsSnapshot {
        pub fn total_selections(&self) -> u64 { 0 }
        pub fn selections_of(&self, _: ChannelIndex) -> u64 { 0 }
        pub fn selection_share(&self, _: ChannelIndex) -> f64 { 0.0 }
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{MetricsSnapshot, SelectionMetrics};
