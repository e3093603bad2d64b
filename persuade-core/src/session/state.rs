//! Per-conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;
use crate::types::{ChoiceId, ContextBucket, ConversationId, OutcomeId};

/// One strategy decision recorded against a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyChoice {
    pub choice_id: ChoiceId,
    pub strategy: Strategy,
    /// Ledger bucket the attempt was counted in.
    pub bucket: ContextBucket,
    /// When the turn happened, if the transport supplied it.
    pub timestamp: Option<DateTime<Utc>>,
    /// Conversation turn the choice was made on.
    pub turn: u32,
}

impl StrategyChoice {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            choice_id: ChoiceId::new(),
            strategy,
            bucket: ContextBucket::global(),
            timestamp: None,
            turn: 0,
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn in_bucket(mut self, bucket: ContextBucket) -> Self {
        self.bucket = bucket;
        self
    }

    #[must_use]
    pub fn on_turn(mut self, turn: u32) -> Self {
        self.turn = turn;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub conversation_id: ConversationId,
    /// Choices ordered by timestamp where known, arrival order otherwise.
    pub strategy_history: Vec<StrategyChoice>,
    /// Turns observed so far; the first turn is 1.
    pub turns: u32,
    /// Set once, on the first observed conversion.
    pub converted: bool,
    pub conversion: Option<OutcomeId>,
    /// Idle past the inactivity window. Cleared on the next turn; the
    /// conversion survives archiving.
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    pub fn new(conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            strategy_history: Vec::new(),
            turns: 0,
            converted: false,
            conversion: None,
            archived: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn last_choice(&self) -> Option<&StrategyChoice> {
        self.strategy_history.last()
    }

    /// Insert keeping timestamp order.
    ///
    /// A timestamped choice moves back past later-stamped entries but never
    /// past an unstamped one, whose arrival position is authoritative.
    pub(crate) fn insert_choice(&mut self, choice: StrategyChoice) {
        let mut pos = self.strategy_history.len();
        if let Some(ts) = choice.timestamp {
            while pos > 0 {
                match self.strategy_history[pos - 1].timestamp {
                    Some(prev) if prev > ts => pos -= 1,
                    _ => break,
                }
            }
        }
        self.strategy_history.insert(pos, choice);
        self.last_activity = Utc::now();
    }

    /// Distinct strategies in first-use order.
    pub fn strategies_used(&self) -> Vec<Strategy> {
        let mut used = Vec::new();
        for choice in &self.strategy_history {
            if !used.contains(&choice.strategy) {
                used.push(choice.strategy);
            }
        }
        used
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            conversation_id: self.conversation_id.clone(),
            strategies_used: self.strategies_used(),
            choices: self.strategy_history.len(),
            turns: self.turns,
            converted: self.converted,
        }
    }
}

/// What a conversation looked like when it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub conversation_id: ConversationId,
    pub strategies_used: Vec<Strategy>,
    pub choices: usize,
    pub turns: u32,
    pub converted: bool,
}
