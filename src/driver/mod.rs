//! Sampling loop tying the scheduler to the multiplexer and the metering
//! front-end.
//!
//! Each [`SamplingDriver::tick`] applies pending control commands, asks the
//! scheduler for a channel, routes the multiplexer, takes one reading and
//! feeds it back before the next tick. The driver owns the scheduler, so the
//! sampling path is its only writer; other contexts reach it either through
//! a [`ControlHandle`] or by locking a [`SharedDriver`].

pub mod source;

pub use source::{PowerSource, SimulatedSource};

use crate::config::ChannelTable;
use crate::error::{Error, Result};
use crate::mux::{Multiplexer, SelectLines};
use crate::scheduler::{ChannelIndex, ChannelScheduler};
use crate::telemetry::SelectionMetrics;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Driver shared between a sampling context and a configuration context.
pub type SharedDriver<S, L> = Arc<Mutex<SamplingDriver<S, L>>>;

/// Requests delivered to the sampling loop from other contexts.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetActive { channel: ChannelIndex, active: bool },
    SetReverse { channel: ChannelIndex, reverse: bool },
    Shutdown,
}

/// Sending half of the driver's control queue.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.sender.send(command).map_err(|_| Error::Disconnected)
    }

    pub fn set_active(&self, channel: ChannelIndex, active: bool) -> Result<()> {
        self.send(ControlCommand::SetActive { channel, active })
    }

    pub fn set_reverse(&self, channel: ChannelIndex, reverse: bool) -> Result<()> {
        self.send(ControlCommand::SetReverse { channel, reverse })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlCommand::Shutdown)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// `channel` was routed and read; `power` is the signed reading.
    Sampled { channel: ChannelIndex, power: f64 },
    /// No channel was active; nothing was read.
    Idle,
    /// A shutdown command was received; the driver no longer samples.
    Shutdown,
}

/// Totals from [`SamplingDriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sampled: u64,
    pub idle: u64,
    pub stopped: bool,
}

/// Line cycles each reading may integrate over so that a full sweep of the
/// active channels fits `total_cycles`. `None` with no active channel.
pub fn line_cycles_per_sample(total_cycles: u64, active_channels: usize) -> Option<u64> {
    if active_channels == 0 {
        return None;
    }
    Some(total_cycles / active_channels as u64)
}

#[derive(Debug)]
pub struct SamplingDriver<S, L> {
    scheduler: ChannelScheduler,
    mux: Multiplexer<L>,
    source: S,
    table: ChannelTable,
    control: Option<Receiver<ControlCommand>>,
    metrics: Arc<SelectionMetrics>,
    ticks: u64,
    stopped: bool,
}

impl<S: PowerSource, L: SelectLines> SamplingDriver<S, L> {
    /// Builds a driver around `scheduler`, parking the multiplexer on its
    /// first input.
    pub fn new(scheduler: ChannelScheduler, source: S, lines: L) -> Result<Self> {
        let channel_count = scheduler.channel_count();
        let metrics = Arc::new(SelectionMetrics::new(channel_count)?);
        let mut mux = Multiplexer::new(lines);
        mux.begin();

        let mut table = ChannelTable::with_defaults(channel_count);
        for channel in (0..channel_count).filter(|&c| scheduler.is_active(c)) {
            table.entry(channel).active = true;
        }

        info!(
            channels = channel_count,
            active = scheduler.active_count(),
            "sampling driver ready"
        );

        Ok(Self {
            scheduler,
            mux,
            source,
            table,
            control: None,
            metrics,
            ticks: 0,
            stopped: false,
        })
    }

    /// Merges `table` into the driver's channel table and applies its
    /// activation flags. Slots the table leaves out keep their current state.
    pub fn with_channel_table(mut self, table: ChannelTable) -> Result<Self> {
        table.apply(&mut self.scheduler)?;
        self.scheduler.recompute_weights();
        for channel in table.iter() {
            *self.table.entry(channel.index) = channel.clone();
        }
        Ok(self)
    }

    /// Opens the control queue and returns its sending half. Replaces any
    /// earlier queue.
    pub fn control_handle(&mut self) -> ControlHandle {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.control = Some(receiver);
        ControlHandle { sender }
    }

    pub fn into_shared(self) -> SharedDriver<S, L> {
        Arc::new(Mutex::new(self))
    }

    /// Runs one `select -> route -> read -> record -> recompute` cycle.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.drain_control();
        if self.stopped {
            return Ok(TickOutcome::Shutdown);
        }
        self.ticks += 1;

        self.read_reference()?;

        let Some(channel) = self.scheduler.select_next() else {
            self.metrics.record_tick(None);
            return Ok(TickOutcome::Idle);
        };
        self.metrics.record_tick(Some(channel));

        self.mux.set_channel(channel);
        let power = self.read_signed(channel)?;
        self.scheduler.record_sample(channel, power)?;
        self.scheduler.recompute_weights();

        Ok(TickOutcome::Sampled { channel, power })
    }

    /// Ticks up to `ticks` times, stopping early on shutdown.
    pub fn run(&mut self, ticks: u64) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for _ in 0..ticks {
            match self.tick()? {
                TickOutcome::Sampled { .. } => summary.sampled += 1,
                TickOutcome::Idle => summary.idle += 1,
                TickOutcome::Shutdown => {
                    summary.stopped = true;
                    break;
                }
            }
        }
        Ok(summary)
    }

    pub fn scheduler(&self) -> &ChannelScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ChannelScheduler {
        &mut self.scheduler
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn multiplexer(&self) -> &Multiplexer<L> {
        &self.mux
    }

    pub fn channel_table(&self) -> &ChannelTable {
        &self.table
    }

    pub fn label(&self, channel: ChannelIndex) -> &str {
        self.table.get(channel).map_or("", |c| c.label.as_str())
    }

    pub fn metrics(&self) -> Arc<SelectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Line cycles per reading for the current active set.
    ///
    /// Only channels in the rotation are counted; an active reference slot is
    /// read on every tick and is left out of the division, unlike the
    /// firmware's sweep which counted it as one more channel.
    pub fn sample_line_cycles(&self, total_cycles: u64) -> Option<u64> {
        line_cycles_per_sample(total_cycles, self.scheduler.active_count())
    }

    /// Activates or deactivates `channel`, keeping the channel table in step.
    pub fn set_active(&mut self, channel: ChannelIndex, active: bool) -> Result<()> {
        self.scheduler.set_active(channel, active)?;
        self.table.entry(channel).active = active;
        Ok(())
    }

    pub fn set_reverse(&mut self, channel: ChannelIndex, reverse: bool) -> Result<()> {
        let channel_count = self.scheduler.channel_count();
        if channel >= channel_count {
            return Err(Error::ChannelOutOfRange {
                index: channel,
                channel_count,
            });
        }
        self.table.entry(channel).reverse = reverse;
        Ok(())
    }

    fn read_signed(&mut self, channel: ChannelIndex) -> Result<f64> {
        let raw = self.source.read_power(channel)?;
        if !raw.is_finite() {
            return Err(Error::read_failed(channel, format!("non-finite reading {raw}")));
        }
        Ok(if self.table.is_reversed(channel) { -raw } else { raw })
    }

    /// Reserved slots bypass the multiplexer and are read on every tick.
    fn read_reference(&mut self) -> Result<()> {
        for channel in 0..self.scheduler.config().reserved_slots {
            if self.scheduler.is_active(channel) {
                let power = self.read_signed(channel)?;
                self.scheduler.record_sample(channel, power)?;
            }
        }
        Ok(())
    }

    fn drain_control(&mut self) {
        loop {
            let command = match self.control.as_ref().map(Receiver::try_recv) {
                Some(Ok(command)) => command,
                Some(Err(TryRecvError::Disconnected)) => {
                    debug!("control queue closed");
                    self.control = None;
                    return;
                }
                Some(Err(TryRecvError::Empty)) | None => return,
            };
            self.apply(command);
        }
    }

    fn apply(&mut self, command: ControlCommand) {
        let result = match command {
            ControlCommand::SetActive { channel, active } => {
                let result = self.set_active(channel, active);
                if result.is_ok() {
                    self.scheduler.recompute_weights();
                }
                result
            }
            ControlCommand::SetReverse { channel, reverse } => self.set_reverse(channel, reverse),
            ControlCommand::Shutdown => {
                info!(ticks = self.ticks, "sampling driver shutting down");
                self.stopped = true;
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(%err, "ignoring control command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, SchedulerConfig};
    use crate::mux::LatchedLines;

    fn driver(active: &[ChannelIndex], source: SimulatedSource) -> SamplingDriver<SimulatedSource, LatchedLines> {
        let mut scheduler = ChannelScheduler::new(SchedulerConfig::default()).unwrap();
        for &channel in active {
            scheduler.set_active(channel, true).unwrap();
        }
        scheduler.recompute_weights();
        SamplingDriver::new(scheduler, source, LatchedLines::default()).unwrap()
    }

    #[test]
    fn test_line_cycles_per_sample() {
        assert_eq!(line_cycles_per_sample(200, 0), None);
        assert_eq!(line_cycles_per_sample(200, 3), Some(66));
        assert_eq!(line_cycles_per_sample(200, 1), Some(200));
    }

    #[test]
    fn test_idle_tick_reads_nothing() {
        let mut driver = driver(&[], SimulatedSource::new(17, 0));
        assert_eq!(driver.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(driver.source().reads(1), 0);
        #[cfg(feature = "telemetry")]
        assert_eq!(driver.metrics().snapshot().idle_ticks, 1);
    }

    #[test]
    fn test_tick_routes_mux_and_records() {
        let source = SimulatedSource::new(17, 0).with_power(6, 420.0);
        let mut driver = driver(&[6], source);

        let outcome = driver.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Sampled { channel: 6, power: 420.0 });
        assert_eq!(driver.multiplexer().current().value(), 5);
        assert_eq!(driver.scheduler().power(6), 420.0);
        assert!(driver.scheduler().channel(6).unwrap().has_baseline());
    }

    #[test]
    fn test_reverse_negates_reading() {
        let source = SimulatedSource::new(17, 0).with_power(2, 300.0);
        let table = ChannelTable::new(vec![ChannelConfig::new(2, "Inverter").active(true).reverse(true)]);
        let mut driver = driver(&[], source).with_channel_table(table).unwrap();

        assert_eq!(
            driver.tick().unwrap(),
            TickOutcome::Sampled { channel: 2, power: -300.0 }
        );
        assert_eq!(driver.label(2), "Inverter");

        driver.set_reverse(5, true).unwrap();
        assert!(driver.channel_table().is_reversed(5));
        assert!(driver.set_reverse(17, true).is_err());
    }

    #[test]
    fn test_reference_slot_read_every_tick() {
        let source = SimulatedSource::new(17, 0).with_power(0, 2300.0).with_power(1, 10.0);
        let mut driver = driver(&[0, 1], source);

        driver.run(5).unwrap();
        assert_eq!(driver.source().reads(0), 5);
        assert_eq!(driver.scheduler().power(0), 2300.0);
        assert_eq!(driver.scheduler().weight(0), 0.0);
        assert_eq!(driver.metrics().snapshot().selections_of(0), 0);
    }

    #[test]
    fn test_control_commands() {
        let mut driver = driver(&[1], SimulatedSource::new(17, 0));
        let handle = driver.control_handle();

        handle.set_active(1, false).unwrap();
        handle.set_active(4, true).unwrap();
        handle.set_reverse(4, true).unwrap();
        assert!(matches!(driver.tick().unwrap(), TickOutcome::Sampled { channel: 4, .. }));
        assert!(!driver.scheduler().is_active(1));
        assert!(driver.channel_table().is_reversed(4));

        handle.shutdown().unwrap();
        let summary = driver.run(10).unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.sampled, 0);
        assert!(driver.is_stopped());
    }

    #[test]
    fn test_bad_control_command_is_ignored() {
        let mut driver = driver(&[3], SimulatedSource::new(17, 0));
        let handle = driver.control_handle();
        handle.set_active(99, true).unwrap();

        assert!(matches!(driver.tick().unwrap(), TickOutcome::Sampled { channel: 3, .. }));
    }

    #[test]
    fn test_handle_reports_dropped_driver() {
        let mut driver = driver(&[], SimulatedSource::new(17, 0));
        let handle = driver.control_handle();
        drop(driver);
        assert!(matches!(handle.shutdown(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_channel_table_merges_into_existing_state() {
        let partial = ChannelTable::new(vec![ChannelConfig::new(7, "Garage").active(true)]);
        let driver = driver(&[4], SimulatedSource::new(17, 0))
            .with_channel_table(partial)
            .unwrap();

        assert!(driver.scheduler().is_active(4));
        assert!(driver.scheduler().is_active(7));
        for channel in 0..17 {
            assert_eq!(
                driver.channel_table().get(channel).map_or(false, |c| c.active),
                driver.scheduler().is_active(channel),
            );
        }
        assert_eq!(driver.label(7), "Garage");
    }

    #[test]
    fn test_read_failure_propagates() {
        let mut scheduler = ChannelScheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.set_active(2, true).unwrap();
        let source = |channel: ChannelIndex| -> Result<f64> {
            Err(Error::read_failed(channel, "front-end not responding"))
        };
        let mut driver = SamplingDriver::new(scheduler, source, LatchedLines::default()).unwrap();

        assert!(matches!(driver.tick(), Err(Error::Source { channel: 2, .. })));
        assert!(!driver.scheduler().channel(2).unwrap().has_baseline());
    }

    #[test]
    fn test_non_finite_reading_rejected() {
        let mut scheduler = ChannelScheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.set_active(1, true).unwrap();
        scheduler.set_active(2, true).unwrap();
        scheduler.recompute_weights();

        let mut readings = vec![0.0, 50.0, 1000.0, f64::NAN, 0.0, 50.0, 1000.0, 50.0].into_iter();
        let source = move |_: ChannelIndex| -> Result<f64> { Ok(readings.next().unwrap_or(0.0)) };
        let mut driver = SamplingDriver::new(scheduler, source, LatchedLines::default()).unwrap();

        let mut failures = 0;
        for _ in 0..8 {
            if let Err(err) = driver.tick() {
                assert!(matches!(err, Error::Source { .. }));
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        let scheduler = driver.scheduler();
        assert!(scheduler.variability(1).is_finite());
        assert!(scheduler.variability(2).is_finite());
        assert!(scheduler.variability(1) + scheduler.variability(2) > 0.0);
        assert!(scheduler.weight(1) != scheduler.weight(2));
    }

    #[test]
    fn test_shared_driver() {
        let shared = driver(&[1, 2], SimulatedSource::new(17, 0)).into_shared();
        let sampler = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    shared.lock().tick().unwrap();
                }
            })
        };
        shared.lock().set_active(3, true).unwrap();
        sampler.join().unwrap();

        let driver = shared.lock();
        assert_eq!(driver.ticks(), 100);
        assert!(driver.scheduler().is_active(3));
    }
}
