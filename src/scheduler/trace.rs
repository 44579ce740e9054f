//! Selection trace for reproducing and comparing scheduling runs.

use super::ChannelIndex;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered log of scheduler decisions stamped with a logical clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionTrace {
    events: Vec<TraceEvent>,
    clock: u64,
}

impl SelectionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, stamping it with the next tick of the logical clock
    pub fn record(&mut self, event: impl FnOnce(u64) -> TraceEvent) {
        let timestamp = self.clock;
        self.clock += 1;
        self.events.push(event(timestamp));
    }

    /// Get all events
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Selection decisions only, `None` for idle cycles
    pub fn selections(&self) -> Vec<Option<ChannelIndex>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Selected { channel, .. } => Some(Some(*channel)),
                TraceEvent::Idle { .. } => Some(None),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Save trace to JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load trace from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Events that can be recorded in a selection trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    Selected {
        channel: ChannelIndex,
        deficit: f64,
        timestamp: u64,
    },
    Idle {
        timestamp: u64,
    },
    Sampled {
        channel: ChannelIndex,
        power: f64,
        variability: f64,
        timestamp: u64,
    },
    Activated {
        channel: ChannelIndex,
        timestamp: u64,
    },
    Deactivated {
        channel: ChannelIndex,
        timestamp: u64,
    },
}
