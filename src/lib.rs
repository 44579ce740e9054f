//! mux-sched - fair sampling schedules for multiplexed metering channels
//!
//! A metering front-end can only measure one channel at a time, so a
//! multiplexer shares it between up to sixteen inputs. This crate decides
//! which input to sample next with a weighted deficit round-robin that
//! favours heavily loaded and fast-changing channels while guaranteeing
//! every active channel a share of the sampling time.
//!
//! # Quick Start
//!
//! ```
//! use mux_sched::prelude::*;
//!
//! let config = SchedulerConfig::builder()
//!     .coefficients(0.4, 0.5, 0.1)
//!     .variability_ema_alpha(0.3)
//!     .build()
//!     .unwrap();
//! let mut scheduler = ChannelScheduler::new(config).unwrap();
//! scheduler.set_active(1, true).unwrap();
//! scheduler.set_active(2, true).unwrap();
//!
//! // select -> sample -> record -> recompute
//! if let Some(channel) = scheduler.select_next() {
//!     let watts = 230.0; // read from the front-end
//!     scheduler.record_sample(channel, watts).unwrap();
//!     scheduler.recompute_weights();
//! }
//! ```
//!
//! # Features
//!
//! - **Weighted deficit round-robin**: deterministic, allocation-free selection
//! - **Load-aware weights**: power share, variability share and a hard floor
//! - **Multiplexer addressing**: select-line encoding behind a small HAL trait
//! - **Sampling driver**: control queue, reversed channels, reference slot reads
//! - **Selection trace**: replayable JSON log of every decision
//! - **Telemetry**: selection counts and gap histograms (optional)

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod driver;
pub mod error;
pub mod mux;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

// Re-export key types at crate root
pub use config::{ChannelConfig, ChannelTable, ConfigBuilder, SchedulerConfig};
pub use driver::{ControlCommand, ControlHandle, PowerSource, SamplingDriver, TickOutcome};
pub use error::{Error, Result};
pub use scheduler::{ChannelIndex, ChannelScheduler};
