//! Metrics export functionality for various formats.

use super::metrics::MetricsSnapshot;
use crate::error::Result;
use serde::Serialize;

/// Trait for exporting metrics to different formats
pub trait MetricsExporter: Send + Sync {
    /// Export a metrics snapshot
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Export metrics to JSON format
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    /// Create a new JSON exporter
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(&SerializableSnapshot::from(snapshot))?;
        std::fs::write(&self.output_path, json)?;
        Ok(())
    }
}

/// Serializable version of MetricsSnapshot
#[derive(Debug, Clone, Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    ticks: u64,
    idle_ticks: u64,
    channels: Vec<ChannelEntry>,
    mean_gap: f64,
    p50_gap: u64,
    p99_gap: u64,
    max_gap: u64,
    selections_per_second: f64,
}

#[derive(Debug, Clone, Serialize)]
struct ChannelEntry {
    index: usize,
    selections: u64,
    share: f64,
    longest_gap: u64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        let channels = snapshot
            .selections
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(index, &selections)| ChannelEntry {
                index,
                selections,
                share: snapshot.selection_share(index),
                longest_gap: snapshot.longest_gap.get(index).copied().unwrap_or(0),
            })
            .collect();

        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            ticks: snapshot.ticks,
            idle_ticks: snapshot.idle_ticks,
            channels,
            mean_gap: snapshot.mean_gap,
            p50_gap: snapshot.p50_gap,
            p99_gap: snapshot.p99_gap,
            max_gap: snapshot.max_gap,
            selections_per_second: snapshot.selections_per_second(),
        }
    }
}
