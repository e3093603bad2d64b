//! Reward attribution
//!
//! Turns a confirmed conversion into ledger updates for the choices that led
//! to it. The conversation's converted flag is claimed first, so duplicate
//! notifications (webhook retries, replays) never reach the ledger; the
//! reward event's idempotency key covers replays across restarts.

pub mod decay;
pub mod rules;

pub use decay::StalenessDecay;
pub use rules::{AttributionRule, LastTouch, MultiTouch, Reward, rule_for};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AttributionConfig, AttributionPolicy};
use crate::error::{PersuadeError, Result};
use crate::ledger::{PerformanceLedger, RewardApplied, RewardEvent};
use crate::session::SessionStrategyTracker;
use crate::types::{ConversationId, ConversionOutcome};

/// What happened to an outcome notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDisposition {
    /// Reward committed to the ledger.
    Applied,
    /// Conversation already converted; nothing changed.
    Duplicate,
    /// Conversation never seen; nothing to attribute.
    UnknownConversation,
    /// Conversation converted without any recorded strategy choice.
    NoHistory,
}

impl OutcomeDisposition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub struct RewardAttributor {
    tracker: Arc<SessionStrategyTracker>,
    ledger: Arc<PerformanceLedger>,
    rule: Box<dyn AttributionRule>,
    unit_reward: f64,
}

impl RewardAttributor {
    pub fn new(
        tracker: Arc<SessionStrategyTracker>,
        ledger: Arc<PerformanceLedger>,
        config: &AttributionConfig,
    ) -> Self {
        let decay = StalenessDecay::new(config.staleness.clone());
        Self {
            tracker,
            ledger,
            rule: rule_for(config.policy, decay),
            unit_reward: config.unit_reward,
        }
    }

    pub fn policy(&self) -> AttributionPolicy {
        self.rule.policy()
    }

    /// Credit `outcome` to the conversation's history.
    ///
    /// Errors only on invalid input or when the reward cannot be persisted;
    /// in the latter case the conversion claim is released so the caller can
    /// retry the same notification.
    pub async fn attribute(
        &self,
        conversation_id: &ConversationId,
        outcome: &ConversionOutcome,
    ) -> Result<OutcomeDisposition> {
        outcome.validate()?;

        match self.tracker.mark_converted(conversation_id, outcome) {
            Ok(true) => {}
            Ok(false) => {
                let duplicate = PersuadeError::DuplicateOutcome {
                    conversation_id: conversation_id.clone(),
                    outcome_id: outcome.outcome_id.clone(),
                };
                warn!(conversation_id = %conversation_id, "{duplicate}, suppressed");
                return Ok(OutcomeDisposition::Duplicate);
            }
            Err(e @ PersuadeError::UnknownConversation(_)) => {
                warn!(
                    outcome_id = %outcome.outcome_id,
                    "{e}, outcome ignored"
                );
                return Ok(OutcomeDisposition::UnknownConversation);
            }
            Err(e) => return Err(e),
        }

        let Some(state) = self.tracker.get(conversation_id)? else {
            return Ok(OutcomeDisposition::UnknownConversation);
        };

        let reward = Reward {
            unit: self.unit_reward,
            revenue: outcome.revenue,
        };
        let entries = self
            .rule
            .allocate(&state.strategy_history, state.turns, reward);
        if entries.is_empty() {
            warn!(
                conversation_id = %conversation_id,
                outcome_id = %outcome.outcome_id,
                "Conversion with no strategy history, nothing to credit"
            );
            self.tracker
                .persist_conversion(conversation_id, &outcome.outcome_id)
                .await;
            return Ok(OutcomeDisposition::NoHistory);
        }

        let event = RewardEvent::new(
            conversation_id.clone(),
            outcome.outcome_id.clone(),
            entries,
        );
        match self.ledger.apply_reward(&event).await {
            Ok(RewardApplied::Applied) => {
                for entry in &event.entries {
                    info!(
                        conversation_id = %conversation_id,
                        strategy = %entry.strategy,
                        bucket = %entry.bucket,
                        amount = entry.amount,
                        revenue = entry.revenue,
                        policy = self.rule.policy().as_str(),
                        "Reward attributed"
                    );
                }
                Ok(OutcomeDisposition::Applied)
            }
            Ok(RewardApplied::Duplicate) => {
                warn!(
                    conversation_id = %conversation_id,
                    reward_key = %event.key,
                    "Reward already committed, suppressed"
                );
                Ok(OutcomeDisposition::Duplicate)
            }
            Err(e) => {
                self.tracker
                    .revert_conversion(conversation_id, &outcome.outcome_id)?;
                Err(e)
            }
        }
    }
}
