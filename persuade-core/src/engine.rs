//! Strategy engine facade
//!
//! Wires the ledger, session tracker, selector and attributor together and
//! exposes the three operations collaborators use: [`StrategyEngine::select_strategy`],
//! [`StrategyEngine::notify_outcome`] and [`StrategyEngine::get_performance_snapshot`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::attribution::{OutcomeDisposition, RewardAttributor};
use crate::config::{AttributionPolicy, PersuadeConfig, StorageKind};
use crate::error::Result;
use crate::ledger::{LedgerStore, PerformanceLedger, StrategySnapshot, open_store};
use crate::selector::{BanditSelector, Selection};
use crate::session::{SessionState, SessionStrategyTracker, SessionSummary};
use crate::stats::LearningStatistics;
use crate::strategy::Strategy;
use crate::types::{ContextBucket, ContextFeatures, ConversationId, ConversionOutcome, OutcomeId};

pub struct StrategyEngine {
    config: PersuadeConfig,
    ledger: Arc<PerformanceLedger>,
    tracker: Arc<SessionStrategyTracker>,
    selector: BanditSelector,
    attributor: RewardAttributor,
}

impl StrategyEngine {
    /// Open the engine on the store named by `config.ledger`.
    pub async fn open(config: PersuadeConfig) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.ledger)?;
        Self::with_store(config, store).await
    }

    /// Engine on Cozo's in-memory engine, regardless of `config.ledger.storage`.
    pub async fn in_memory(mut config: PersuadeConfig) -> Result<Self> {
        config.ledger.storage = StorageKind::Memory;
        Self::open(config).await
    }

    /// Engine over an explicit store.
    ///
    /// The exploration schedule resumes at the number of attempts already in
    /// the ledger, so a restart does not reset epsilon.
    pub async fn with_store(config: PersuadeConfig, store: Arc<dyn LedgerStore>) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(
            PerformanceLedger::open(store.clone(), config.ledger.retry.clone()).await?,
        );
        let tracker = Arc::new(SessionStrategyTracker::open(store).await?);

        let prior_selections = ledger
            .snapshot_all()?
            .values()
            .map(|r| r.attempts)
            .sum::<u64>();
        let selector = BanditSelector::starting_at(
            ledger.clone(),
            tracker.clone(),
            &config.exploration,
            prior_selections,
        );
        let attributor = RewardAttributor::new(tracker.clone(), ledger.clone(), &config.attribution);

        info!(
            storage = ?config.ledger.storage,
            policy = config.attribution.policy.as_str(),
            contextual = config.contextual.enabled,
            prior_selections,
            conversations = tracker.len()?,
            "Strategy engine ready"
        );

        Ok(Self {
            config,
            ledger,
            tracker,
            selector,
            attributor,
        })
    }

    /// Pick the strategy for the conversation's next outbound turn.
    pub async fn select_strategy(
        &self,
        conversation_id: &ConversationId,
        context: Option<&ContextFeatures>,
    ) -> Result<Strategy> {
        Ok(self
            .select_detailed(conversation_id, context, None)
            .await?
            .strategy)
    }

    /// Like [`select_strategy`](Self::select_strategy), returning how the
    /// choice was made. `timestamp` orders the choice within the conversation.
    #[instrument(skip(self, context), fields(conversation_id = %conversation_id))]
    pub async fn select_detailed(
        &self,
        conversation_id: &ConversationId,
        context: Option<&ContextFeatures>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Selection> {
        conversation_id.validate()?;
        if let Some(features) = context {
            features.validate()?;
        }

        let bucket = self.bucket_for(context);
        if let Err(e) = self.tracker.next_turn(conversation_id) {
            warn!(error = %e, "Could not advance conversation turn");
        }
        Ok(self.selector.select(conversation_id, &bucket, timestamp).await)
    }

    /// Record a conversation turn on which no strategy was selected, such as
    /// an inbound message the agent did not answer with a persuasion turn.
    ///
    /// Turns drive staleness decay: a conversion credited to a choice made
    /// many turns earlier is attenuated. Returns the conversation's turn count.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub async fn observe_turn(&self, conversation_id: &ConversationId) -> Result<u32> {
        conversation_id.validate()?;
        let state = self.tracker.next_turn(conversation_id)?;
        self.tracker.persist(conversation_id).await;
        Ok(state.turns)
    }

    /// Report a confirmed sale for the conversation.
    ///
    /// Duplicate notifications and unknown conversations are not errors; see
    /// the returned [`OutcomeDisposition`].
    #[instrument(skip(self, outcome_id), fields(conversation_id = %conversation_id))]
    pub async fn notify_outcome(
        &self,
        conversation_id: &ConversationId,
        revenue: f64,
        outcome_id: impl Into<OutcomeId>,
    ) -> Result<OutcomeDisposition> {
        conversation_id.validate()?;
        let outcome = ConversionOutcome::new(outcome_id, revenue);
        self.attributor.attribute(conversation_id, &outcome).await
    }

    /// Report a conversation that ended without a sale.
    ///
    /// Attempts were counted at selection time, so the ledger is unchanged.
    pub fn notify_session_end(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<SessionSummary>> {
        conversation_id.validate()?;
        let Some(state) = self.tracker.get(conversation_id)? else {
            warn!(conversation_id = %conversation_id, "Session end for unknown conversation");
            return Ok(None);
        };
        let summary = state.summary();
        if !summary.converted {
            info!(
                event = "no_purchase",
                conversation_id = %conversation_id,
                turns = summary.turns,
                strategies = ?summary.strategies_used,
                "Conversation ended without a sale"
            );
        }
        Ok(Some(summary))
    }

    /// Global ledger, every strategy present.
    pub fn get_performance_snapshot(&self) -> Result<StrategySnapshot> {
        self.ledger.snapshot()
    }

    pub fn bucket_snapshot(&self, bucket: &ContextBucket) -> Result<StrategySnapshot> {
        self.ledger.snapshot_bucket(bucket)
    }

    /// Statistics over every context bucket combined.
    pub fn learning_statistics(&self) -> Result<LearningStatistics> {
        let snapshot = self.ledger.snapshot_totals()?;
        let exploration = self.selector.exploration();
        Ok(LearningStatistics::from_snapshot(
            &snapshot,
            exploration.current_epsilon(),
            exploration.selections(),
        ))
    }

    /// Archive sessions idle longer than `sessions.inactivity_minutes`.
    ///
    /// Archived sessions keep their history and conversion; the next turn
    /// reactivates them.
    pub async fn archive_inactive(&self, now: DateTime<Utc>) -> Result<Vec<SessionState>> {
        self.tracker
            .archive_inactive(now, self.config.sessions.inactivity())
            .await
    }

    /// Start a new sales cycle for a converted conversation.
    pub async fn reset_conversation(&self, conversation_id: &ConversationId) -> Result<bool> {
        self.tracker.reset(conversation_id).await
    }

    pub fn session(&self, conversation_id: &ConversationId) -> Result<Option<SessionState>> {
        self.tracker.get(conversation_id)
    }

    pub fn attribution_policy(&self) -> AttributionPolicy {
        self.attributor.policy()
    }

    pub fn config(&self) -> &PersuadeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<PerformanceLedger> {
        &self.ledger
    }

    fn bucket_for(&self, context: Option<&ContextFeatures>) -> ContextBucket {
        match context {
            Some(features) if self.config.contextual.enabled => {
                ContextBucket::from_features(features)
            }
            _ => ContextBucket::global(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersuadeError;
    use crate::selector::SelectionMode;

    fn seeded(seed: u64) -> PersuadeConfig {
        let mut config = PersuadeConfig::default();
        config.exploration.seed = Some(seed);
        config
    }

    #[tokio::test]
    async fn test_select_strategy_counts_attempt() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let conv = ConversationId::from("5511999990000");
        let strategy = engine.select_strategy(&conv, None).await.unwrap();

        let snapshot = engine.get_performance_snapshot().unwrap();
        assert_eq!(snapshot[&strategy].attempts, 1);
        let session = engine.session(&conv).unwrap().unwrap();
        assert_eq!(session.turns, 1);
        assert_eq!(session.last_choice().unwrap().strategy, strategy);
    }

    #[tokio::test]
    async fn test_malformed_conversation_id_rejected() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let err = engine
            .select_strategy(&ConversationId::from(""), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PersuadeError::InvalidArgument(_)));
        assert_eq!(engine.learning_statistics().unwrap().total_attempts, 0);
    }

    #[tokio::test]
    async fn test_negative_revenue_rejected() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let conv = ConversationId::from("conv-1");
        engine.select_strategy(&conv, None).await.unwrap();
        let err = engine.notify_outcome(&conv, -1.0, "sale-1").await.unwrap_err();
        assert!(matches!(err, PersuadeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_context_ignored_unless_enabled() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let features = ContextFeatures::default()
            .with_intent("price_inquiry")
            .with_sentiment(-0.5);
        let selection = engine
            .select_detailed(&ConversationId::from("c"), Some(&features), None)
            .await
            .unwrap();
        assert!(selection.bucket.is_global());
    }

    #[tokio::test]
    async fn test_contextual_buckets_are_separate() {
        let mut config = seeded(1);
        config.contextual.enabled = true;
        let engine = StrategyEngine::in_memory(config).await.unwrap();
        let features = ContextFeatures::default()
            .with_intent("price_inquiry")
            .with_sentiment(-0.5);

        let selection = engine
            .select_detailed(&ConversationId::from("c"), Some(&features), None)
            .await
            .unwrap();
        assert_eq!(selection.bucket.as_str(), "price_inquiry/negative");
        assert_eq!(selection.mode, SelectionMode::ColdStart);

        let segment = engine.bucket_snapshot(&selection.bucket).unwrap();
        assert_eq!(segment[&selection.strategy].attempts, 1);
        let global = engine.get_performance_snapshot().unwrap();
        assert!(global.values().all(|r| r.attempts == 0));
        assert_eq!(engine.learning_statistics().unwrap().total_attempts, 1);
    }

    #[tokio::test]
    async fn test_contextual_reward_lands_in_choice_bucket() {
        let mut config = seeded(1);
        config.contextual.enabled = true;
        let engine = StrategyEngine::in_memory(config).await.unwrap();
        let features = ContextFeatures::default().with_intent("objection");
        let conv = ConversationId::from("c");

        let selection = engine
            .select_detailed(&conv, Some(&features), None)
            .await
            .unwrap();
        engine.notify_outcome(&conv, 10.0, "sale-1").await.unwrap();

        let segment = engine.bucket_snapshot(&selection.bucket).unwrap();
        assert_eq!(segment[&selection.strategy].successes, 1.0);
    }

    #[tokio::test]
    async fn test_session_end_reports_summary() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let conv = ConversationId::from("conv-1");
        engine.select_strategy(&conv, None).await.unwrap();
        engine.select_strategy(&conv, None).await.unwrap();
        let before = engine.get_performance_snapshot().unwrap();

        let summary = engine.notify_session_end(&conv).unwrap().unwrap();
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.choices, 2);
        assert!(!summary.converted);
        assert_eq!(engine.get_performance_snapshot().unwrap(), before);

        assert!(
            engine
                .notify_session_end(&ConversationId::from("ghost"))
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_reset_allows_second_sale() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let conv = ConversationId::from("conv-1");
        engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(
            engine.notify_outcome(&conv, 10.0, "sale-1").await.unwrap(),
            OutcomeDisposition::Applied
        );
        assert_eq!(
            engine.notify_outcome(&conv, 10.0, "sale-2").await.unwrap(),
            OutcomeDisposition::Duplicate
        );

        assert!(engine.reset_conversation(&conv).await.unwrap());
        engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(
            engine.notify_outcome(&conv, 10.0, "sale-2").await.unwrap(),
            OutcomeDisposition::Applied
        );
        assert_eq!(engine.learning_statistics().unwrap().total_successes, 2.0);
    }

    #[tokio::test]
    async fn test_archive_uses_configured_window() {
        let mut config = seeded(1);
        config.sessions.inactivity_minutes = 30;
        let engine = StrategyEngine::in_memory(config).await.unwrap();
        engine
            .select_strategy(&ConversationId::from("conv-1"), None)
            .await
            .unwrap();

        assert!(engine.archive_inactive(Utc::now()).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::minutes(31);
        assert_eq!(engine.archive_inactive(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archived_conversion_stays_converted() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let conv = ConversationId::from("conv-1");
        engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(
            engine.notify_outcome(&conv, 10.0, "sale-1").await.unwrap(),
            OutcomeDisposition::Applied
        );

        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(engine.archive_inactive(later).await.unwrap().len(), 1);

        engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(
            engine.notify_outcome(&conv, 10.0, "sale-2").await.unwrap(),
            OutcomeDisposition::Duplicate
        );
        assert_eq!(engine.learning_statistics().unwrap().total_successes, 1.0);
    }

    #[tokio::test]
    async fn test_separator_in_ids_does_not_suppress_sale() {
        let engine = StrategyEngine::in_memory(seeded(1)).await.unwrap();
        let first = ConversationId::from("a#b");
        let second = ConversationId::from("a");
        engine.select_strategy(&first, None).await.unwrap();
        engine.select_strategy(&second, None).await.unwrap();

        assert_eq!(
            engine.notify_outcome(&first, 10.0, "c").await.unwrap(),
            OutcomeDisposition::Applied
        );
        assert_eq!(
            engine.notify_outcome(&second, 20.0, "b#c").await.unwrap(),
            OutcomeDisposition::Applied
        );
        let stats = engine.learning_statistics().unwrap();
        assert_eq!(stats.total_successes, 2.0);
        assert_eq!(stats.total_revenue, 30.0);
    }

    #[tokio::test]
    async fn test_observed_turns_attenuate_last_touch() {
        let mut config = seeded(1);
        config.attribution.staleness.grace_turns = 0;
        config.attribution.staleness.curve =
            crate::config::StalenessCurve::Linear { slope: 0.25 };
        config.attribution.staleness.floor = 0.0;
        let engine = StrategyEngine::in_memory(config).await.unwrap();
        let conv = ConversationId::from("conv-1");

        let strategy = engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(engine.observe_turn(&conv).await.unwrap(), 2);
        assert_eq!(engine.observe_turn(&conv).await.unwrap(), 3);
        engine.notify_outcome(&conv, 80.0, "sale-1").await.unwrap();

        // Two turns past the choice: 1 - 0.25 * 2.
        let record = &engine.get_performance_snapshot().unwrap()[&strategy];
        assert_eq!(record.successes, 0.5);
        assert_eq!(record.revenue, 80.0);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = PersuadeConfig::default();
        config.exploration.decay = 2.0;
        assert!(StrategyEngine::in_memory(config).await.is_err());
    }
}
