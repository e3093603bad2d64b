//! Per-conversation strategy tracking
//!
//! [`SessionStrategyTracker`] owns every [`SessionState`]. All access goes
//! through a single mutex with short critical sections; concurrent outcome
//! notifications for the same conversation serialize on it, which is what
//! makes [`SessionStrategyTracker::mark_converted`] a reliable idempotence
//! guard.
//!
//! With a [`LedgerStore`] attached, history and turns are mirrored into the
//! store on a best-effort basis, like attempt counts. Conversions are durable:
//! they are written in the reward transaction, so a restarted tracker never
//! forgets that a conversation already paid out.

mod state;

pub use state::{SessionState, SessionSummary, StrategyChoice};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{PersuadeError, Result};
use crate::ledger::LedgerStore;
use crate::strategy::Strategy;
use crate::types::{ConversationId, ConversionOutcome, OutcomeId};

#[derive(Default)]
pub struct SessionStrategyTracker {
    sessions: Mutex<HashMap<ConversationId, SessionState>>,
    store: Option<Arc<dyn LedgerStore>>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl SessionStrategyTracker {
    /// Tracker that keeps sessions in memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker backed by `store`, reloading every persisted conversation.
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let sessions: HashMap<ConversationId, SessionState> = store
            .load_sessions()
            .await?
            .into_iter()
            .map(|state| (state.conversation_id.clone(), state))
            .collect();
        debug!(sessions = sessions.len(), "Loaded conversations");
        Ok(Self {
            sessions: Mutex::new(sessions),
            store: Some(store),
            persist_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Advance the conversation by one turn, creating it on first contact.
    ///
    /// A converted conversation stays converted until [`reset`](Self::reset).
    /// An archived conversation becomes active again.
    pub fn next_turn(&self, conversation_id: &ConversationId) -> Result<SessionState> {
        let mut sessions = self.lock()?;
        let state = sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                debug!(conversation_id = %conversation_id, "New conversation");
                SessionState::new(conversation_id.clone())
            });
        state.turns = state.turns.saturating_add(1);
        state.archived = false;
        state.last_activity = Utc::now();
        Ok(state.clone())
    }

    /// Record `strategy` on the conversation's current turn in the global bucket.
    pub fn append_choice(
        &self,
        conversation_id: &ConversationId,
        strategy: Strategy,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut choice = StrategyChoice::new(strategy);
        choice.timestamp = timestamp;
        self.append(conversation_id, choice, true)
    }

    /// Record a fully specified choice.
    ///
    /// With `current_turn` set, the choice's turn is overwritten with the
    /// conversation's current turn count.
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        mut choice: StrategyChoice,
        current_turn: bool,
    ) -> Result<()> {
        let mut sessions = self.lock()?;
        let state = sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| SessionState::new(conversation_id.clone()));
        if current_turn {
            choice.turn = state.turns;
        }
        state.insert_choice(choice);
        Ok(())
    }

    /// Flip `converted`. Returns `true` only for the first call per conversation.
    pub fn mark_converted(
        &self,
        conversation_id: &ConversationId,
        outcome: &ConversionOutcome,
    ) -> Result<bool> {
        let mut sessions = self.lock()?;
        let state = sessions
            .get_mut(conversation_id)
            .ok_or_else(|| PersuadeError::UnknownConversation(conversation_id.clone()))?;
        if state.converted {
            return Ok(false);
        }
        state.converted = true;
        state.conversion = Some(outcome.outcome_id.clone());
        state.last_activity = Utc::now();
        Ok(true)
    }

    /// Undo a conversion whose reward could not be persisted, so a retried
    /// notification can claim it again. Only the matching outcome is reverted.
    pub fn revert_conversion(
        &self,
        conversation_id: &ConversationId,
        outcome_id: &OutcomeId,
    ) -> Result<bool> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(conversation_id) {
            Some(state) if state.conversion.as_ref() == Some(outcome_id) => {
                state.converted = false;
                state.conversion = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Start a new sales cycle: clear history, turns and the converted flag.
    ///
    /// The stored conversion is removed first; if that fails nothing changes.
    pub async fn reset(&self, conversation_id: &ConversationId) -> Result<bool> {
        if self.get(conversation_id)?.is_none() {
            return Ok(false);
        }
        if let Some(store) = &self.store {
            let _gate = self.persist_gate.lock().await;
            store.clear_conversion(conversation_id).await?;
        }
        {
            let mut sessions = self.lock()?;
            let Some(state) = sessions.get_mut(conversation_id) else {
                return Ok(false);
            };
            let created_at = state.created_at;
            *state = SessionState::new(conversation_id.clone());
            state.created_at = created_at;
        }
        self.persist(conversation_id).await;
        Ok(true)
    }

    /// Flag sessions idle for longer than `inactivity` as of `now` as archived
    /// and return them. Archived sessions keep their history and conversion.
    pub async fn archive_inactive(
        &self,
        now: DateTime<Utc>,
        inactivity: Duration,
    ) -> Result<Vec<SessionState>> {
        let archived: Vec<SessionState> = {
            let mut sessions = self.lock()?;
            sessions
                .values_mut()
                .filter(|s| !s.archived && now - s.last_activity > inactivity)
                .map(|s| {
                    s.archived = true;
                    s.clone()
                })
                .collect()
        };
        for state in &archived {
            self.persist(&state.conversation_id).await;
        }
        if !archived.is_empty() {
            debug!(count = archived.len(), "Archived inactive conversations");
        }
        Ok(archived)
    }

    /// Mirror the conversation's current state into the store.
    ///
    /// Best effort: a failed write is logged and the in-memory state stands.
    pub async fn persist(&self, conversation_id: &ConversationId) {
        let Some(store) = &self.store else {
            return;
        };
        let _gate = self.persist_gate.lock().await;
        let state = match self.get(conversation_id) {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Session not persisted");
                return;
            }
        };
        if let Err(e) = store.save_session(&state).await {
            warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Session not persisted, keeping in-memory state"
            );
        }
    }

    /// Store a conversion that produced no ledger update.
    pub async fn persist_conversion(&self, conversation_id: &ConversationId, outcome_id: &OutcomeId) {
        let Some(store) = &self.store else {
            return;
        };
        let _gate = self.persist_gate.lock().await;
        if let Err(e) = store.save_conversion(conversation_id, outcome_id).await {
            warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Conversion not persisted"
            );
        }
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Result<Option<SessionState>> {
        Ok(self.lock()?.get(conversation_id).cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ConversationId, SessionState>>> {
        self.sessions
            .lock()
            .map_err(|_| PersuadeError::LockPoisoned("session tracker"))
    }
}
