//! Power readings delivered by the metering front-end.

use crate::error::{Error, Result};
use crate::scheduler::ChannelIndex;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Reads the active power on the channel currently routed to the front-end.
pub trait PowerSource {
    fn read_power(&mut self, channel: ChannelIndex) -> Result<f64>;
}

impl<F> PowerSource for F
where
    F: FnMut(ChannelIndex) -> Result<f64>,
{
    fn read_power(&mut self, channel: ChannelIndex) -> Result<f64> {
        self(channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Toggle {
    first: f64,
    second: f64,
    on_second: bool,
}

/// Deterministic stand-in for the metering chip.
///
/// Each input has a fixed load, optionally alternating between two values on
/// every read, plus optional uniform noise drawn from a seeded generator.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    profile: Vec<f64>,
    toggles: Vec<Option<Toggle>>,
    noise: f64,
    rng: Pcg64,
    reads: Vec<u64>,
}

impl SimulatedSource {
    pub fn new(channel_count: usize, seed: u64) -> Self {
        Self {
            profile: vec![0.0; channel_count],
            toggles: vec![None; channel_count],
            noise: 0.0,
            rng: Pcg64::seed_from_u64(seed),
            reads: vec![0; channel_count],
        }
    }

    pub fn with_power(mut self, channel: ChannelIndex, watts: f64) -> Self {
        self.set_power(channel, watts);
        self
    }

    /// Adds `±amplitude` of uniform noise to every reading.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Fixes the load on `channel`, cancelling any toggling. Unknown channels
    /// are ignored.
    pub fn set_power(&mut self, channel: ChannelIndex, watts: f64) {
        if let Some(slot) = self.profile.get_mut(channel) {
            *slot = watts;
            self.toggles[channel] = None;
        }
    }

    /// Makes `channel` alternate between `first` and `second` on each read,
    /// starting with `first`.
    pub fn set_toggle(&mut self, channel: ChannelIndex, first: f64, second: f64) {
        if let Some(slot) = self.toggles.get_mut(channel) {
            *slot = Some(Toggle {
                first,
                second,
                on_second: false,
            });
        }
    }

    pub fn power(&self, channel: ChannelIndex) -> Option<f64> {
        self.profile.get(channel).copied()
    }

    /// Number of reads served for `channel`.
    pub fn reads(&self, channel: ChannelIndex) -> u64 {
        self.reads.get(channel).copied().unwrap_or(0)
    }
}

impl PowerSource for SimulatedSource {
    fn read_power(&mut self, channel: ChannelIndex) -> Result<f64> {
        if channel >= self.profile.len() {
            return Err(Error::read_failed(channel, "no simulated input"));
        }
        self.reads[channel] += 1;

        let base = match self.toggles[channel].as_mut() {
            Some(toggle) => {
                let value = if toggle.on_second { toggle.second } else { toggle.first };
                toggle.on_second = !toggle.on_second;
                value
            }
            None => self.profile[channel],
        };

        if self.noise > 0.0 {
            Ok(base + self.rng.gen_range(-self.noise..=self.noise))
        } else {
            Ok(base)
        }
    }
}
