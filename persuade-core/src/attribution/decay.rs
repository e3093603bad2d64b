//! Staleness attenuation for delayed conversions
//!
//! A choice made `elapsed` turns before the conversion keeps full weight for
//! `grace_turns`, then decays along the configured curve down to `floor`.

use crate::config::{StalenessConfig, StalenessCurve};

#[derive(Debug, Clone)]
pub struct StalenessDecay {
    config: StalenessConfig,
}

impl StalenessDecay {
    /// A NaN or out-of-range `floor` is clamped into `[0, 1]`, NaN as 0.
    pub fn new(mut config: StalenessConfig) -> Self {
        config.floor = if config.floor.is_nan() {
            0.0
        } else {
            config.floor.clamp(0.0, 1.0)
        };
        Self { config }
    }

    /// No attenuation at any distance.
    pub fn none() -> Self {
        Self::new(StalenessConfig {
            grace_turns: u32::MAX,
            ..StalenessConfig::default()
        })
    }

    /// Weight in `[floor, 1]` for a choice `elapsed` turns old.
    pub fn weight(&self, elapsed: u32) -> f64 {
        if elapsed <= self.config.grace_turns {
            return 1.0;
        }
        let over = f64::from(elapsed - self.config.grace_turns);
        let raw = match self.config.curve {
            StalenessCurve::Exponential { rate } => (-rate * over).exp(),
            StalenessCurve::Linear { slope } => 1.0 - slope * over,
        };
        if raw.is_nan() {
            return self.config.floor;
        }
        raw.clamp(self.config.floor, 1.0)
    }
}

impl Default for StalenessDecay {
    fn default() -> Self {
        Self::new(StalenessConfig::default())
    }
}
