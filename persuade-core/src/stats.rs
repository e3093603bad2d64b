//! Learning statistics for dashboards and operators

use serde::{Deserialize, Serialize};

use crate::ledger::StrategySnapshot;
use crate::strategy::Strategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: Strategy,
    pub attempts: u64,
    pub successes: f64,
    pub revenue: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStatistics {
    /// One row per strategy, in enumeration order.
    pub strategies: Vec<StrategyStats>,
    pub total_attempts: u64,
    pub total_successes: f64,
    pub total_revenue: f64,
    /// `total_successes / total_attempts`, 0 when nothing was tried.
    pub overall_success_rate: f64,
    /// Highest success rate among tried strategies.
    pub best_strategy: Option<Strategy>,
    /// Lowest success rate among tried strategies.
    pub worst_strategy: Option<Strategy>,
    /// Exploration probability the next selection will use.
    pub exploration_rate: f64,
    pub selections: u64,
}

impl LearningStatistics {
    pub fn from_snapshot(snapshot: &StrategySnapshot, exploration_rate: f64, selections: u64) -> Self {
        let strategies: Vec<StrategyStats> = Strategy::all()
            .iter()
            .map(|s| {
                let record = snapshot.get(s).cloned().unwrap_or_default();
                StrategyStats {
                    strategy: *s,
                    attempts: record.attempts,
                    successes: record.successes,
                    revenue: record.revenue,
                    success_rate: record.success_rate(),
                }
            })
            .collect();

        let total_attempts = strategies.iter().map(|s| s.attempts).sum::<u64>();
        let total_successes = strategies.iter().map(|s| s.successes).sum::<f64>();
        let total_revenue = strategies.iter().map(|s| s.revenue).sum::<f64>();
        let overall_success_rate = if total_attempts == 0 {
            0.0
        } else {
            total_successes / total_attempts as f64
        };

        let mut best: Option<&StrategyStats> = None;
        let mut worst: Option<&StrategyStats> = None;
        for row in strategies.iter().filter(|s| s.attempts > 0) {
            if best.is_none_or(|b| row.success_rate > b.success_rate) {
                best = Some(row);
            }
            if worst.is_none_or(|w| row.success_rate < w.success_rate) {
                worst = Some(row);
            }
        }
        let best_strategy = best.map(|s| s.strategy);
        let worst_strategy = worst.map(|s| s.strategy);

        Self {
            strategies,
            total_attempts,
            total_successes,
            total_revenue,
            overall_success_rate,
            best_strategy,
            worst_strategy,
            exploration_rate,
            selections,
        }
    }

    pub fn get(&self, strategy: Strategy) -> Option<&StrategyStats> {
        self.strategies.iter().find(|s| s.strategy == strategy)
    }
}
