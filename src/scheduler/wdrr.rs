//! Weighted deficit round-robin over the multiplexed channels.

use super::channel::Channel;
use super::trace::{SelectionTrace, TraceEvent};
use super::ChannelIndex;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use tracing::{debug, trace, warn};

/// Credit spent by a channel each time it is selected.
pub const SELECTION_COST: f64 = 1.0;

/// Decides which channel the shared metering path samples next.
///
/// Every active channel earns its weight as credit each cycle and the channel
/// holding the most credit is sampled, paying [`SELECTION_COST`]. Weights mix
/// the channel's share of total load, its share of total variability, and a
/// fixed floor, so no active channel can starve.
///
/// All operations take `&mut self` and run in time linear in the channel
/// count. Callers driving the scheduler from more than one context must
/// serialise access themselves.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    config: SchedulerConfig,
    channels: Vec<Channel>,
    idle: bool,
    trace: Option<SelectionTrace>,
}

impl ChannelScheduler {
    /// Validates `config` and allocates every channel slot, all inactive.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let channels = vec![Channel::new(); config.channel_count];
        Ok(Self {
            config,
            channels,
            idle: false,
            trace: None,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn set_active(&mut self, index: ChannelIndex, active: bool) -> Result<()> {
        self.check_index(index)?;
        if self.channels[index].active == active {
            return Ok(());
        }

        let floor = if self.is_schedulable(index) {
            self.config.min_base_coeff
        } else {
            0.0
        };
        let channel = &mut self.channels[index];
        if active {
            channel.activate(floor);
        } else {
            channel.deactivate();
        }
        debug!(channel = index, active, "channel activation changed");

        if let Some(trace) = self.trace.as_mut() {
            trace.record(|timestamp| {
                if active {
                    TraceEvent::Activated { channel: index, timestamp }
                } else {
                    TraceEvent::Deactivated { channel: index, timestamp }
                }
            });
        }
        Ok(())
    }

    /// Runs one deficit round-robin step and returns the channel to sample.
    ///
    /// Ties go to the lowest index. `None` means no channel is active and the
    /// caller should skip sampling this cycle.
    pub fn select_next(&mut self) -> Option<ChannelIndex> {
        let mut best: Option<(ChannelIndex, f64)> = None;

        for index in self.config.schedulable() {
            let channel = &mut self.channels[index];
            if !channel.active {
                channel.deficit = 0.0;
                continue;
            }
            channel.deficit += channel.weight;
            match best {
                Some((_, deficit)) if channel.deficit <= deficit => {}
                _ => best = Some((index, channel.deficit)),
            }
        }

        let selected = best.map(|(index, _)| {
            self.channels[index].deficit -= SELECTION_COST;
            index
        });
        self.note_selection(selected);
        selected
    }

    /// Stores a reading taken right after `index` was sampled and folds it
    /// into the channel's variability estimate.
    pub fn record_sample(&mut self, index: ChannelIndex, power: f64) -> Result<()> {
        self.check_index(index)?;
        self.store_sample(index, power);
        Ok(())
    }

    /// Recomputes every weight from the current power and variability.
    pub fn recompute_weights(&mut self) {
        let range = self.config.schedulable();
        let (total_power, total_variability) = self.channels[range.clone()]
            .iter()
            .filter(|c| c.active)
            .fold((0.0, 0.0), |(p, v), c| (p + c.power.abs(), v + c.variability()));

        let SchedulerConfig {
            power_weight_coeff,
            variability_weight_coeff,
            min_base_coeff,
            ..
        } = self.config;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            if !channel.active || !range.contains(&index) {
                channel.weight = 0.0;
                continue;
            }
            let power_score = if total_power > 0.0 {
                channel.power.abs() / total_power
            } else {
                0.0
            };
            let var_score = if total_variability > 0.0 {
                channel.variability() / total_variability
            } else {
                0.0
            };
            channel.weight = power_weight_coeff * power_score
                + variability_weight_coeff * var_score
                + min_base_coeff;
        }
    }

    /// One full `select -> read -> record -> recompute` cycle.
    ///
    /// `read` is only invoked when a channel was selected.
    pub fn cycle<F>(&mut self, mut read: F) -> Option<ChannelIndex>
    where
        F: FnMut(ChannelIndex) -> f64,
    {
        let selected = self.select_next()?;
        let power = read(selected);
        self.store_sample(selected, power);
        self.recompute_weights();
        Some(selected)
    }

    pub fn channel(&self, index: ChannelIndex) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Weight of `index`; zero for unknown slots.
    pub fn weight(&self, index: ChannelIndex) -> f64 {
        self.channels.get(index).map_or(0.0, Channel::weight)
    }

    pub fn deficit(&self, index: ChannelIndex) -> f64 {
        self.channels.get(index).map_or(0.0, Channel::deficit)
    }

    pub fn variability(&self, index: ChannelIndex) -> f64 {
        self.channels.get(index).map_or(0.0, Channel::variability)
    }

    pub fn power(&self, index: ChannelIndex) -> f64 {
        self.channels.get(index).map_or(0.0, Channel::power)
    }

    pub fn is_active(&self, index: ChannelIndex) -> bool {
        self.channels.get(index).map_or(false, Channel::is_active)
    }

    /// Whether `index` can ever be selected.
    pub fn is_schedulable(&self, index: ChannelIndex) -> bool {
        self.config.schedulable().contains(&index)
    }

    /// Active channels in the scheduling pool.
    pub fn active_count(&self) -> usize {
        self.channels[self.config.schedulable()]
            .iter()
            .filter(|c| c.active)
            .count()
    }

    /// Active channels in the scheduling pool, lowest index first.
    pub fn active_channels(&self) -> impl Iterator<Item = ChannelIndex> + '_ {
        self.config
            .schedulable()
            .filter(move |&index| self.channels[index].active)
    }

    /// Starts recording decisions into a fresh trace.
    pub fn enable_trace(&mut self) {
        self.trace = Some(SelectionTrace::new());
    }

    pub fn trace(&self) -> Option<&SelectionTrace> {
        self.trace.as_ref()
    }

    /// Stops tracing and hands back what was recorded.
    pub fn take_trace(&mut self) -> Option<SelectionTrace> {
        self.trace.take()
    }

    fn check_index(&self, index: ChannelIndex) -> Result<()> {
        if index < self.channels.len() {
            Ok(())
        } else {
            Err(Error::out_of_range(index, self.channels.len()))
        }
    }

    fn store_sample(&mut self, index: ChannelIndex, power: f64) {
        let alpha = self.config.variability_ema_alpha;
        let channel = &mut self.channels[index];
        channel.record(power, alpha);

        if let Some(trace) = self.trace.as_mut() {
            let variability = channel.variability();
            trace.record(|timestamp| TraceEvent::Sampled {
                channel: index,
                power,
                variability,
                timestamp,
            });
        }
    }

    fn note_selection(&mut self, selected: Option<ChannelIndex>) {
        match selected {
            Some(channel) => {
                trace!(channel, deficit = self.channels[channel].deficit, "channel selected");
                self.idle = false;
            }
            None => {
                if !self.idle {
                    warn!("no active channel to schedule");
                }
                self.idle = true;
            }
        }

        if let Some(trace) = self.trace.as_mut() {
            match selected {
                Some(channel) => {
                    let deficit = self.channels[channel].deficit;
                    trace.record(|timestamp| TraceEvent::Selected {
                        channel,
                        deficit,
                        timestamp,
                    });
                }
                None => trace.record(|timestamp| TraceEvent::Idle { timestamp }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with(active: &[ChannelIndex]) -> ChannelScheduler {
        let mut scheduler = ChannelScheduler::new(SchedulerConfig::default()).unwrap();
        for &index in active {
            scheduler.set_active(index, true).unwrap();
        }
        scheduler
    }

    fn load(scheduler: &mut ChannelScheduler, powers: &[(ChannelIndex, f64)]) {
        for &(index, power) in powers {
            scheduler.record_sample(index, power).unwrap();
        }
        scheduler.recompute_weights();
    }

    #[test]
    fn test_new_validates_config() {
        let config = SchedulerConfig {
            min_base_coeff: 0.2,
            ..SchedulerConfig::default()
        };
        assert!(matches!(ChannelScheduler::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let mut scheduler = scheduler_with(&[]);
        assert_eq!(scheduler.select_next(), None);
        assert_eq!(scheduler.select_next(), None);
        assert_eq!(scheduler.cycle(|_| unreachable!()), None);
    }

    #[test]
    fn test_reserved_slot_never_selected() {
        let mut scheduler = scheduler_with(&[0]);
        assert!(scheduler.is_active(0));
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.weight(0), 0.0);

        load(&mut scheduler, &[(0, 5000.0)]);
        assert_eq!(scheduler.weight(0), 0.0);
        assert_eq!(scheduler.select_next(), None);
        assert_eq!(scheduler.deficit(0), 0.0);
    }

    #[test]
    fn test_no_reserved_slots() {
        let config = SchedulerConfig::builder()
            .channel_count(3)
            .reserved_slots(0)
            .build()
            .unwrap();
        let mut scheduler = ChannelScheduler::new(config).unwrap();
        scheduler.set_active(0, true).unwrap();
        scheduler.recompute_weights();
        assert_eq!(scheduler.select_next(), Some(0));
    }

    #[test]
    fn test_tie_goes_to_lowest_index() {
        let mut scheduler = scheduler_with(&[2, 5, 9]);
        scheduler.recompute_weights();
        assert_eq!(scheduler.select_next(), Some(2));
        assert_eq!(scheduler.select_next(), Some(5));
        assert_eq!(scheduler.select_next(), Some(9));

        // equal weights settle into an even rotation
        let mut counts = [0usize; 17];
        for _ in 0..297 {
            counts[scheduler.select_next().unwrap()] += 1;
        }
        assert_eq!(counts[2] + counts[5] + counts[9], 297);
        assert!([2, 5, 9].iter().all(|&c| (98..=100).contains(&counts[c])));
    }

    #[test]
    fn test_deficit_bookkeeping() {
        let mut scheduler = scheduler_with(&[1, 2]);
        scheduler.recompute_weights();
        assert_eq!(scheduler.weight(1), 0.1);

        assert_eq!(scheduler.select_next(), Some(1));
        assert!((scheduler.deficit(1) - (0.1 - 1.0)).abs() < 1e-12);
        assert!((scheduler.deficit(2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_activation_gives_floor_weight() {
        let mut scheduler = scheduler_with(&[3]);
        assert_eq!(scheduler.weight(3), scheduler.config().min_base_coeff);
        assert_eq!(scheduler.select_next(), Some(3));
    }

    #[test]
    fn test_deactivation_clears_state_immediately() {
        let mut scheduler = scheduler_with(&[1, 2]);
        load(&mut scheduler, &[(1, 10.0), (2, 900.0)]);
        scheduler.select_next();
        scheduler.select_next();
        scheduler.select_next();
        assert!(scheduler.deficit(1) != 0.0);

        scheduler.set_active(1, false).unwrap();
        assert_eq!(scheduler.deficit(1), 0.0);
        assert_eq!(scheduler.weight(1), 0.0);
        for _ in 0..20 {
            assert_eq!(scheduler.select_next(), Some(2));
        }
    }

    #[test]
    fn test_reactivation_starts_cold() {
        let mut scheduler = scheduler_with(&[1]);
        scheduler.record_sample(1, 100.0).unwrap();
        scheduler.record_sample(1, 400.0).unwrap();
        assert!(scheduler.variability(1) > 0.0);

        scheduler.set_active(1, false).unwrap();
        scheduler.set_active(1, true).unwrap();
        let channel = scheduler.channel(1).unwrap();
        assert_eq!(channel.variability(), 0.0);
        assert!(!channel.has_baseline());
        assert_eq!(channel.deficit(), 0.0);
    }

    #[test]
    fn test_repeated_activation_keeps_history() {
        let mut scheduler = scheduler_with(&[1]);
        scheduler.record_sample(1, 100.0).unwrap();
        scheduler.record_sample(1, 400.0).unwrap();
        let before = scheduler.variability(1);

        scheduler.set_active(1, true).unwrap();
        assert_eq!(scheduler.variability(1), before);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut scheduler = scheduler_with(&[]);
        assert!(matches!(
            scheduler.set_active(17, true),
            Err(Error::ChannelOutOfRange { index: 17, channel_count: 17 })
        ));
        assert!(scheduler.record_sample(99, 1.0).is_err());
        assert_eq!(scheduler.weight(99), 0.0);
    }

    #[test]
    fn test_weights_use_absolute_power() {
        let mut scheduler = scheduler_with(&[1, 2]);
        load(&mut scheduler, &[(1, -300.0), (2, 100.0)]);
        assert!((scheduler.weight(1) - (0.4 * 0.75 + 0.1)).abs() < 1e-12);
        assert!((scheduler.weight(2) - (0.4 * 0.25 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_variability_share_in_weight() {
        let mut scheduler = scheduler_with(&[1, 2]);
        load(&mut scheduler, &[(1, 0.0), (2, 0.0)]);
        load(&mut scheduler, &[(1, 100.0)]);
        load(&mut scheduler, &[(1, 0.0)]);

        // ch1 powers 0 -> 100 -> 0: variability 30 then 0.3*100 + 0.7*30 = 51
        assert!((scheduler.variability(1) - 51.0).abs() < 1e-9);
        assert_eq!(scheduler.variability(2), 0.0);
        assert!((scheduler.weight(1) - 0.6).abs() < 1e-12);
        assert!((scheduler.weight(2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_cycle_records_and_recomputes() {
        let mut scheduler = scheduler_with(&[1, 2]);
        scheduler.recompute_weights();

        assert_eq!(scheduler.cycle(|ch| ch as f64 * 100.0), Some(1));
        assert_eq!(scheduler.power(1), 100.0);
        assert!((scheduler.weight(1) - 0.5).abs() < 1e-12);
        assert!((scheduler.weight(2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_trace_records_decisions() {
        let mut scheduler = scheduler_with(&[]);
        scheduler.enable_trace();
        scheduler.set_active(4, true).unwrap();
        scheduler.cycle(|_| 12.0);
        scheduler.set_active(4, false).unwrap();
        scheduler.select_next();

        let trace = scheduler.take_trace().unwrap();
        assert_eq!(trace.selections(), vec![Some(4), None]);
        assert!(matches!(trace.events()[0], TraceEvent::Activated { channel: 4, timestamp: 0 }));
        assert!(matches!(trace.events()[2], TraceEvent::Sampled { channel: 4, .. }));
        assert!(scheduler.trace().is_none());
    }
}
