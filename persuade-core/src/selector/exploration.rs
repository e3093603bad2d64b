//! Exploration schedule
//!
//! Decay is per selection: `eps_t = max(min_rate, initial_rate * decay^t)`,
//! where `t` counts selections made by the owning selector. No wall clock is
//! involved, so a fixed seed reproduces a run exactly.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ExplorationConfig;

/// Pure schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplorationSchedule {
    pub initial_rate: f64,
    pub decay: f64,
    pub min_rate: f64,
}

impl ExplorationSchedule {
    /// Rates are clamped to `[0, 1]` and NaN reads as 0; a NaN decay reads as 1.
    pub fn new(initial_rate: f64, decay: f64, min_rate: f64) -> Self {
        Self {
            initial_rate: unit_or_zero(initial_rate),
            decay: if decay.is_nan() { 1.0 } else { decay.clamp(0.0, 1.0) },
            min_rate: unit_or_zero(min_rate),
        }
    }

    /// Constant exploration probability.
    pub fn fixed(rate: f64) -> Self {
        Self::new(rate, 1.0, rate)
    }

    pub fn from_config(config: &ExplorationConfig) -> Self {
        Self::new(config.initial_rate, config.decay, config.min_rate)
    }

    /// Exploration probability at selection index `t`.
    pub fn epsilon_at(&self, t: u64) -> f64 {
        let exponent = i32::try_from(t).unwrap_or(i32::MAX);
        f64::max(self.min_rate, self.initial_rate * self.decay.powi(exponent))
    }
}

/// Probability clamped to `[0, 1]`, NaN as 0.
pub(crate) fn unit_or_zero(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

/// Schedule plus the selection counter it is evaluated at.
#[derive(Debug)]
pub struct ExplorationState {
    schedule: ExplorationSchedule,
    selections: AtomicU64,
}

impl ExplorationState {
    pub fn new(schedule: ExplorationSchedule) -> Self {
        Self::starting_at(schedule, 0)
    }

    /// Resume the schedule at selection index `t`.
    pub fn starting_at(schedule: ExplorationSchedule, t: u64) -> Self {
        Self {
            schedule,
            selections: AtomicU64::new(t),
        }
    }

    /// Claim the next selection index and its exploration probability.
    pub fn advance(&self) -> (u64, f64) {
        let t = self.selections.fetch_add(1, Ordering::Relaxed);
        (t, self.schedule.epsilon_at(t))
    }

    /// Probability the next selection will use.
    pub fn current_epsilon(&self) -> f64 {
        self.schedule.epsilon_at(self.selections())
    }

    pub fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }

    pub fn schedule(&self) -> ExplorationSchedule {
        self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsilon_matches_closed_form() {
        let schedule = ExplorationSchedule::new(0.2, 0.95, 0.01);
        for t in [0u64, 1, 2, 10, 37, 58, 59, 60, 1000] {
            let expected = f64::max(0.01, 0.2 * 0.95f64.powi(t as i32));
            assert_eq!(schedule.epsilon_at(t), expected);
        }
        assert_eq!(schedule.epsilon_at(0), 0.2);
    }

    #[test]
    fn test_epsilon_reaches_floor() {
        let schedule = ExplorationSchedule::new(0.2, 0.95, 0.01);
        assert_eq!(schedule.epsilon_at(10_000), 0.01);
        assert_eq!(schedule.epsilon_at(u64::MAX), 0.01);
    }

    #[test]
    fn test_fixed_schedule() {
        let schedule = ExplorationSchedule::fixed(0.3);
        assert_eq!(schedule.epsilon_at(0), 0.3);
        assert_eq!(schedule.epsilon_at(500), 0.3);
    }

    #[test]
    fn test_nan_and_out_of_range_rates_are_sanitized() {
        let schedule = ExplorationSchedule::new(f64::NAN, f64::NAN, f64::NAN);
        assert_eq!(schedule.epsilon_at(0), 0.0);
        assert_eq!(schedule.epsilon_at(10), 0.0);

        let schedule = ExplorationSchedule::new(3.0, 0.5, -1.0);
        assert_eq!(schedule.epsilon_at(0), 1.0);
        assert_eq!(schedule.epsilon_at(1), 0.5);
    }

    #[test]
    fn test_advance_counts_selections() {
        let state = ExplorationState::new(ExplorationSchedule::new(0.2, 0.5, 0.0));
        assert_eq!(state.advance(), (0, 0.2));
        assert_eq!(state.advance(), (1, 0.1));
        assert_eq!(state.selections(), 2);
        assert_eq!(state.current_epsilon(), 0.05);
    }

    #[test]
    fn test_resume_from_index() {
        let schedule = ExplorationSchedule::new(0.2, 0.95, 0.01);
        let state = ExplorationState::starting_at(schedule, 40);
        assert_eq!(state.advance().1, schedule.epsilon_at(40));
    }
}
