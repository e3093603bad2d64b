//! Ledger record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;
use crate::types::{ContextBucket, ConversationId, OutcomeId, RewardKey};

/// Ledger partition key: one record per (bucket, strategy).
pub type LedgerKey = (ContextBucket, Strategy);

/// Counters for one strategy in one context bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Times this strategy was chosen and exposed to a customer. Never decreases.
    pub attempts: u64,
    /// Attributed reward mass; may be fractional.
    pub successes: f64,
    /// Attributed monetary value.
    pub revenue: f64,
    pub updated_at: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            successes: 0.0,
            revenue: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// `successes / attempts`, or 0 for an untried strategy.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes / self.attempts as f64
        }
    }

    pub fn is_untried(&self) -> bool {
        self.attempts == 0
    }

    pub(crate) fn add_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = Utc::now();
    }

    pub(crate) fn add_reward(&mut self, amount: f64, revenue: f64) {
        self.successes += amount;
        self.revenue += revenue;
        self.updated_at = Utc::now();
    }
}

impl Default for PerformanceRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One strategy's share of a reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub bucket: ContextBucket,
    pub strategy: Strategy,
    /// Added to `successes`.
    pub amount: f64,
    /// Added to `revenue`.
    pub revenue: f64,
}

impl RewardEntry {
    pub fn new(strategy: Strategy, amount: f64, revenue: f64) -> Self {
        Self {
            bucket: ContextBucket::global(),
            strategy,
            amount,
            revenue,
        }
    }

    #[must_use]
    pub fn in_bucket(mut self, bucket: ContextBucket) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn key(&self) -> LedgerKey {
        (self.bucket.clone(), self.strategy)
    }
}

/// A committed reward: the idempotency key plus the entries it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub key: RewardKey,
    pub conversation_id: ConversationId,
    pub outcome_id: OutcomeId,
    pub entries: Vec<RewardEntry>,
    pub recorded_at: DateTime<Utc>,
}

impl RewardEvent {
    pub fn new(
        conversation_id: ConversationId,
        outcome_id: OutcomeId,
        entries: Vec<RewardEntry>,
    ) -> Self {
        Self {
            key: RewardKey::for_outcome(&conversation_id, &outcome_id),
            conversation_id,
            outcome_id,
            entries,
            recorded_at: Utc::now(),
        }
    }

    /// Whether the event credits a conversation's conversion, as opposed to
    /// a direct [`record_reward`](super::PerformanceLedger::record_reward).
    pub fn is_attributed(&self) -> bool {
        !self.conversation_id.as_str().is_empty()
    }

    /// An event with a fresh one-off key, for callers that have no outcome id.
    pub fn unkeyed(entries: Vec<RewardEntry>) -> Self {
        let outcome_id = OutcomeId::new(uuid::Uuid::now_v7().to_string());
        Self {
            key: RewardKey::new(format!("unkeyed#{outcome_id}")),
            conversation_id: ConversationId::new(""),
            outcome_id,
            entries,
            recorded_at: Utc::now(),
        }
    }
}
