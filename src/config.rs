use crate::error::{Error, Result};
use crate::scheduler::{ChannelIndex, ChannelScheduler};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default slot count: one direct reference channel plus sixteen multiplexed inputs.
pub const DEFAULT_CHANNEL_COUNT: usize = 17;

/// Slots at the bottom of the index range that never enter the scheduling pool.
pub const DEFAULT_RESERVED_SLOTS: usize = 1;

pub const DEFAULT_POWER_WEIGHT: f64 = 0.4;
pub const DEFAULT_VARIABILITY_WEIGHT: f64 = 0.5;
pub const DEFAULT_MIN_BASE: f64 = 0.1;
pub const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// Allowed drift of the coefficient sum away from exactly 1.0.
pub const COEFF_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub channel_count: usize,
    pub reserved_slots: usize,
    pub power_weight_coeff: f64,
    pub variability_weight_coeff: f64,
    pub min_base_coeff: f64,
    pub variability_ema_alpha: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            reserved_slots: DEFAULT_RESERVED_SLOTS,
            power_weight_coeff: DEFAULT_POWER_WEIGHT,
            variability_weight_coeff: DEFAULT_VARIABILITY_WEIGHT,
            min_base_coeff: DEFAULT_MIN_BASE,
            variability_ema_alpha: DEFAULT_EMA_ALPHA,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(Error::config("channel_count must be > 0"));
        }
        if self.channel_count <= self.reserved_slots {
            return Err(Error::config(format!(
                "channel_count ({}) must exceed reserved_slots ({})",
                self.channel_count, self.reserved_slots
            )));
        }

        let coeffs = [
            ("power_weight_coeff", self.power_weight_coeff),
            ("variability_weight_coeff", self.variability_weight_coeff),
            ("min_base_coeff", self.min_base_coeff),
        ];
        for (name, value) in coeffs {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::config(format!(
                    "{name} must be a finite, non-negative number (got {value})"
                )));
            }
        }

        if self.min_base_coeff <= 0.0 {
            return Err(Error::config("min_base_coeff must be > 0"));
        }

        let sum = self.coefficient_sum();
        if (sum - 1.0).abs() > COEFF_SUM_TOLERANCE {
            return Err(Error::config(format!(
                "weight coefficients must sum to 1.0 (got {sum})"
            )));
        }

        let alpha = self.variability_ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(Error::config(format!(
                "variability_ema_alpha must be in (0, 1] (got {alpha})"
            )));
        }

        Ok(())
    }

    pub fn coefficient_sum(&self) -> f64 {
        self.power_weight_coeff + self.variability_weight_coeff + self.min_base_coeff
    }

    /// Indices that take part in scheduling.
    pub fn schedulable(&self) -> std::ops::Range<ChannelIndex> {
        self.reserved_slots..self.channel_count
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), ?config, "loaded scheduler config");
        Ok(config)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: SchedulerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn channel_count(mut self, n: usize) -> Self {
        self.config.channel_count = n;
        self
    }

    pub fn reserved_slots(mut self, n: usize) -> Self {
        self.config.reserved_slots = n;
        self
    }

    pub fn power_weight_coeff(mut self, coeff: f64) -> Self {
        self.config.power_weight_coeff = coeff;
        self
    }

    pub fn variability_weight_coeff(mut self, coeff: f64) -> Self {
        self.config.variability_weight_coeff = coeff;
        self
    }

    pub fn min_base_coeff(mut self, coeff: f64) -> Self {
        self.config.min_base_coeff = coeff;
        self
    }

    /// Sets all three weight coefficients at once.
    pub fn coefficients(self, power: f64, variability: f64, min_base: f64) -> Self {
        self.power_weight_coeff(power)
            .variability_weight_coeff(variability)
            .min_base_coeff(min_base)
    }

    pub fn variability_ema_alpha(mut self, alpha: f64) -> Self {
        self.config.variability_ema_alpha = alpha;
        self
    }

    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-channel configuration of the metering device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub index: ChannelIndex,
    #[serde(default)]
    pub active: bool,
    /// The current transformer is mounted backwards; readings are negated.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub label: String,
}

impl ChannelConfig {
    pub fn new(index: ChannelIndex, label: impl Into<String>) -> Self {
        Self {
            index,
            active: false,
            reverse: false,
            label: label.into(),
        }
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// The full channel table, one entry per slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTable {
    channels: Vec<ChannelConfig>,
}

impl ChannelTable {
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self { channels }
    }

    /// A table with every slot present, inactive and labelled by its index.
    pub fn with_defaults(channel_count: usize) -> Self {
        let channels = (0..channel_count)
            .map(|i| ChannelConfig::new(i, format!("Channel {i}")))
            .collect();
        Self { channels }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        table.check_indices()?;
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        debug!(path = %path.display(), entries = table.len(), "loaded channel table");
        Ok(table)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn get(&self, index: ChannelIndex) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.index == index)
    }

    pub fn get_mut(&mut self, index: ChannelIndex) -> Option<&mut ChannelConfig> {
        self.channels.iter_mut().find(|c| c.index == index)
    }

    /// Entry for `index`, appending a default one if the table has none.
    pub fn entry(&mut self, index: ChannelIndex) -> &mut ChannelConfig {
        let position = match self.channels.iter().position(|c| c.index == index) {
            Some(position) => position,
            None => {
                self.channels
                    .push(ChannelConfig::new(index, format!("Channel {index}")));
                self.channels.len() - 1
            }
        };
        &mut self.channels[position]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn is_reversed(&self, index: ChannelIndex) -> bool {
        self.get(index).map_or(false, |c| c.reverse)
    }

    /// Pushes the activation flags into `scheduler`.
    ///
    /// Every index must fit the scheduler; nothing is applied otherwise.
    pub fn apply(&self, scheduler: &mut ChannelScheduler) -> Result<()> {
        let count = scheduler.channel_count();
        if let Some(bad) = self.channels.iter().find(|c| c.index >= count) {
            return Err(Error::out_of_range(bad.index, count));
        }
        for channel in &self.channels {
            scheduler.set_active(channel.index, channel.active)?;
        }
        Ok(())
    }

    fn check_indices(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.index) {
                return Err(Error::config(format!(
                    "duplicate channel index {} in channel table",
                    channel.index
                )));
            }
        }
        Ok(())
    }
}
