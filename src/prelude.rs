pub use crate::config::{ChannelConfig, ChannelTable, ConfigBuilder, SchedulerConfig};
pub use crate::driver::{
    ControlCommand, ControlHandle, PowerSource, SamplingDriver, SimulatedSource, TickOutcome,
};
pub use crate::error::{Error, Result};
pub use crate::mux::{LatchedLines, Multiplexer, MuxAddress, SelectLines};
pub use crate::scheduler::{ChannelIndex, ChannelScheduler, SelectionTrace, TraceEvent};

pub use crate::telemetry::{MetricsSnapshot, SelectionMetrics};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{JsonExporter, MetricsExporter};
