//! Channel scheduling subsystem.
//!
//! Decides which channel of a multiplexed metering front-end is sampled next.
//! Selection uses weighted deficit round-robin: each active channel earns
//! credit proportional to its weight every cycle, the richest channel is
//! sampled and pays one unit. Weights are recomputed from the channels'
//! shares of total load and of total load variability, plus a fixed floor
//! that rules out starvation.

pub mod channel;
pub mod trace;
pub mod variability;
pub mod wdrr;

pub use channel::Channel;
pub use trace::{SelectionTrace, TraceEvent};
pub use variability::VariabilityEstimator;
pub use wdrr::{ChannelScheduler, SELECTION_COST};

/// Slot number of a channel, `0..channel_count`.
pub type ChannelIndex = usize;
