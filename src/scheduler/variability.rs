/// Exponential moving average of the absolute change between consecutive
/// readings of one channel.
///
/// The first reading only establishes a baseline; a rate of change needs two
/// points, so the estimate stays at zero until the second reading arrives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VariabilityEstimator {
    prev_power: f64,
    estimate: f64,
    has_baseline: bool,
}

impl VariabilityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reading and returns the updated estimate.
    pub fn update(&mut self, observed: f64, alpha: f64) -> f64 {
        if !self.has_baseline {
            self.prev_power = observed;
            self.has_baseline = true;
            return self.estimate;
        }

        let delta = (observed - self.prev_power).abs();
        self.estimate = alpha * delta + (1.0 - alpha) * self.estimate;
        self.prev_power = observed;
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn prev_power(&self) -> f64 {
        self.prev_power
    }

    pub fn has_baseline(&self) -> bool {
        self.has_baseline
    }

    /// Forgets everything, as if the channel had never been sampled.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
