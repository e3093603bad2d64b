//! Attribution rules: which past choices receive a conversion's reward

use crate::config::AttributionPolicy;
use crate::ledger::RewardEntry;
use crate::session::StrategyChoice;
use crate::strategy::Strategy;

use super::decay::StalenessDecay;

/// Reward to distribute for one conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward {
    /// Reward mass before attenuation.
    pub unit: f64,
    pub revenue: f64,
}

/// Maps a conversation's history to ledger entries.
pub trait AttributionRule: Send + Sync {
    fn policy(&self) -> AttributionPolicy;

    /// Entries to apply. Empty when the history is empty.
    ///
    /// `current_turn` is the conversation's turn count at conversion time.
    fn allocate(
        &self,
        history: &[StrategyChoice],
        current_turn: u32,
        reward: Reward,
    ) -> Vec<RewardEntry>;
}

/// Credit the most recent choice only.
pub struct LastTouch {
    decay: StalenessDecay,
}

impl LastTouch {
    pub fn new(decay: StalenessDecay) -> Self {
        Self { decay }
    }
}

impl AttributionRule for LastTouch {
    fn policy(&self) -> AttributionPolicy {
        AttributionPolicy::LastTouch
    }

    fn allocate(
        &self,
        history: &[StrategyChoice],
        current_turn: u32,
        reward: Reward,
    ) -> Vec<RewardEntry> {
        let Some(last) = history.last() else {
            return Vec::new();
        };
        let weight = self.decay.weight(current_turn.saturating_sub(last.turn));
        vec![
            RewardEntry::new(last.strategy, reward.unit * weight, reward.revenue)
                .in_bucket(last.bucket.clone()),
        ]
    }
}

/// Split credit uniformly across the distinct strategies used.
///
/// Each strategy's share is attenuated by the age of its most recent use and
/// lands in that choice's bucket. Revenue is split evenly and never attenuated.
pub struct MultiTouch {
    decay: StalenessDecay,
}

impl MultiTouch {
    pub fn new(decay: StalenessDecay) -> Self {
        Self { decay }
    }
}

impl AttributionRule for MultiTouch {
    fn policy(&self) -> AttributionPolicy {
        AttributionPolicy::MultiTouch
    }

    fn allocate(
        &self,
        history: &[StrategyChoice],
        current_turn: u32,
        reward: Reward,
    ) -> Vec<RewardEntry> {
        // Latest choice per strategy, in first-use order.
        let mut latest: Vec<(Strategy, &StrategyChoice)> = Vec::new();
        for choice in history {
            match latest.iter_mut().find(|(s, _)| *s == choice.strategy) {
                Some(slot) => slot.1 = choice,
                None => latest.push((choice.strategy, choice)),
            }
        }
        if latest.is_empty() {
            return Vec::new();
        }

        let share = 1.0 / latest.len() as f64;
        latest
            .into_iter()
            .map(|(strategy, choice)| {
                let weight = self.decay.weight(current_turn.saturating_sub(choice.turn));
                RewardEntry::new(strategy, reward.unit * share * weight, reward.revenue * share)
                    .in_bucket(choice.bucket.clone())
            })
            .collect()
    }
}

/// Rule for the configured policy.
pub fn rule_for(policy: AttributionPolicy, decay: StalenessDecay) -> Box<dyn AttributionRule> {
    match policy {
        AttributionPolicy::LastTouch => Box::new(LastTouch::new(decay)),
        AttributionPolicy::MultiTouch => Box::new(MultiTouch::new(decay)),
    }
}
