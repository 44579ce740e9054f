use super::variability::VariabilityEstimator;

/// Scheduling state of one channel slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Channel {
    pub(crate) active: bool,
    pub(crate) weight: f64,
    pub(crate) deficit: f64,
    pub(crate) power: f64,
    pub(crate) variability: VariabilityEstimator,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn deficit(&self) -> f64 {
        self.deficit
    }

    /// Most recent signed power reading.
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Power seen at the previous reading of this channel.
    pub fn prev_power(&self) -> f64 {
        self.variability.prev_power()
    }

    pub fn variability(&self) -> f64 {
        self.variability.estimate()
    }

    pub fn has_baseline(&self) -> bool {
        self.variability.has_baseline()
    }

    /// Brings the channel into the pool with no memory of earlier behaviour.
    pub(crate) fn activate(&mut self, floor_weight: f64) {
        self.active = true;
        self.deficit = 0.0;
        self.weight = floor_weight;
        self.variability.reset();
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
        self.deficit = 0.0;
        self.weight = 0.0;
    }

    pub(crate) fn record(&mut self, observed: f64, alpha: f64) {
        self.variability.update(observed, alpha);
        self.power = observed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_starts_fresh() {
        let mut ch = Channel::new();
        ch.activate(0.1);
        ch.record(100.0, 0.3);
        ch.record(300.0, 0.3);
        ch.deficit = 2.5;
        assert!(ch.variability() > 0.0);

        ch.deactivate();
        assert_eq!(ch.deficit(), 0.0);
        assert_eq!(ch.weight(), 0.0);

        ch.activate(0.1);
        assert!(ch.is_active());
        assert_eq!(ch.deficit(), 0.0);
        assert_eq!(ch.weight(), 0.1);
        assert_eq!(ch.variability(), 0.0);
        assert!(!ch.has_baseline());
    }

    #[test]
    fn test_record_tracks_power() {
        let mut ch = Channel::new();
        ch.record(-42.0, 0.3);
        assert_eq!(ch.power(), -42.0);
        assert_eq!(ch.prev_power(), -42.0);
        assert!(ch.has_baseline());
        assert_eq!(ch.variability(), 0.0);
    }
}
