//! Durability of the ledger across restarts and storage failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use persuade_core::{
    ContextBucket, ConversationId, CozoLedgerStore, LedgerKey, LedgerStore, OutcomeDisposition,
    OutcomeId, PerformanceLedger, PerformanceRecord, PersuadeConfig, PersuadeError, RetryConfig,
    RewardApplied, RewardEntry, RewardEvent, RewardKey, SessionState, StorageKind, Strategy,
    StrategyEngine,
};

fn rocksdb_config(path: &std::path::Path) -> PersuadeConfig {
    let mut config = PersuadeConfig::default();
    config.ledger.storage = StorageKind::Rocksdb;
    config.ledger.path = path.to_path_buf();
    config.exploration.seed = Some(1);
    config
}

#[tokio::test]
async fn ledger_survives_restart_on_rocksdb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");

    let (strategy, before) = {
        let engine = StrategyEngine::open(rocksdb_config(&path)).await.unwrap();
        let conv = ConversationId::from("conv-1");
        let strategy = engine.select_strategy(&conv, None).await.unwrap();
        for i in 0..5 {
            let other = ConversationId::new(format!("other-{i}"));
            engine.select_strategy(&other, None).await.unwrap();
        }
        engine.notify_outcome(&conv, 49.90, "pay-1").await.unwrap();
        (strategy, engine.get_performance_snapshot().unwrap())
    };

    let engine = StrategyEngine::open(rocksdb_config(&path)).await.unwrap();
    let after = engine.get_performance_snapshot().unwrap();
    for s in Strategy::all() {
        assert_eq!(after[s].attempts, before[s].attempts, "{s} attempts");
        assert_eq!(after[s].successes, before[s].successes, "{s} successes");
        assert_eq!(after[s].revenue, before[s].revenue, "{s} revenue");
    }
    assert_eq!(after[&strategy].successes, 1.0);
    assert_eq!(engine.ledger().reward_count().await.unwrap(), 1);

    // Exploration resumes where it left off.
    assert_eq!(engine.learning_statistics().unwrap().selections, 6);
}

#[tokio::test]
async fn replayed_reward_after_restart_is_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");
    let event = RewardEvent::new(
        ConversationId::from("conv-9"),
        OutcomeId::from("pay-9"),
        vec![RewardEntry::new(Strategy::Rational, 1.0, 75.0)],
    );

    {
        let store = Arc::new(CozoLedgerStore::open(&path).unwrap());
        let ledger = PerformanceLedger::open(store, RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(ledger.apply_reward(&event).await.unwrap(), RewardApplied::Applied);
    }

    let store = Arc::new(CozoLedgerStore::open(&path).unwrap());
    let ledger = PerformanceLedger::open(store, RetryConfig::default())
        .await
        .unwrap();
    assert_eq!(
        ledger.apply_reward(&event).await.unwrap(),
        RewardApplied::Duplicate
    );
    let record = &ledger.snapshot().unwrap()[&Strategy::Rational];
    assert_eq!(record.successes, 1.0);
    assert_eq!(record.revenue, 75.0);
}

/// Store whose writes can be switched off.
struct SwitchableStore {
    inner: CozoLedgerStore,
    down: AtomicBool,
}

impl SwitchableStore {
    fn new() -> Self {
        Self {
            inner: CozoLedgerStore::in_memory().unwrap(),
            down: AtomicBool::new(false),
        }
    }

    fn check(&self) -> persuade_core::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(PersuadeError::Database("storage offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for SwitchableStore {
    async fn load_records(&self) -> persuade_core::Result<BTreeMap<LedgerKey, PerformanceRecord>> {
        self.inner.load_records().await
    }

    async fn save_record(&self, key: &LedgerKey, record: &PerformanceRecord) -> persuade_core::Result<()> {
        self.check()?;
        self.inner.save_record(key, record).await
    }

    async fn has_reward(&self, key: &RewardKey) -> persuade_core::Result<bool> {
        self.inner.has_reward(key).await
    }

    async fn commit_reward(
        &self,
        event: &RewardEvent,
        records: &[(LedgerKey, PerformanceRecord)],
    ) -> persuade_core::Result<()> {
        self.check()?;
        self.inner.commit_reward(event, records).await
    }

    async fn reward_count(&self) -> persuade_core::Result<usize> {
        self.inner.reward_count().await
    }

    async fn load_sessions(&self) -> persuade_core::Result<Vec<SessionState>> {
        self.inner.load_sessions().await
    }

    async fn save_session(&self, state: &SessionState) -> persuade_core::Result<()> {
        self.check()?;
        self.inner.save_session(state).await
    }

    async fn save_conversion(
        &self,
        conversation_id: &ConversationId,
        outcome_id: &OutcomeId,
    ) -> persuade_core::Result<()> {
        self.check()?;
        self.inner.save_conversion(conversation_id, outcome_id).await
    }

    async fn clear_conversion(&self, conversation_id: &ConversationId) -> persuade_core::Result<()> {
        self.check()?;
        self.inner.clear_conversion(conversation_id).await
    }
}

fn fast_retry_config() -> PersuadeConfig {
    let mut config = PersuadeConfig::default();
    config.exploration.seed = Some(4);
    config.ledger.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
    };
    config
}

#[tokio::test]
async fn selection_survives_storage_outage() {
    let store = Arc::new(SwitchableStore::new());
    let engine = StrategyEngine::with_store(fast_retry_config(), store.clone())
        .await
        .unwrap();
    store.down.store(true, Ordering::SeqCst);

    let conv = ConversationId::from("conv-1");
    let strategy = engine.select_strategy(&conv, None).await.unwrap();
    assert_eq!(engine.get_performance_snapshot().unwrap()[&strategy].attempts, 1);
    assert_eq!(engine.ledger().degraded_writes(), 1);
    assert!(store.inner.load_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn reward_outage_surfaces_and_can_be_retried() {
    let store = Arc::new(SwitchableStore::new());
    let engine = StrategyEngine::with_store(fast_retry_config(), store.clone())
        .await
        .unwrap();
    let conv = ConversationId::from("conv-1");
    let strategy = engine.select_strategy(&conv, None).await.unwrap();

    store.down.store(true, Ordering::SeqCst);
    let err = engine.notify_outcome(&conv, 30.0, "pay-1").await.unwrap_err();
    assert!(matches!(
        err,
        PersuadeError::PersistenceUnavailable { attempts: 3, .. }
    ));
    assert_eq!(engine.get_performance_snapshot().unwrap()[&strategy].successes, 0.0);
    assert!(!engine.session(&conv).unwrap().unwrap().converted);

    store.down.store(false, Ordering::SeqCst);
    assert_eq!(
        engine.notify_outcome(&conv, 30.0, "pay-1").await.unwrap(),
        OutcomeDisposition::Applied
    );
    let record = &engine.get_performance_snapshot().unwrap()[&strategy];
    assert_eq!(record.successes, 1.0);
    assert_eq!(record.revenue, 30.0);

    let persisted = store.inner.load_records().await.unwrap();
    assert_eq!(
        persisted[&(ContextBucket::global(), strategy)].successes,
        1.0
    );
}

#[tokio::test]
async fn sale_after_restart_credits_choice_made_before_it() {
    let store: Arc<dyn LedgerStore> = Arc::new(CozoLedgerStore::in_memory().unwrap());
    let conv = ConversationId::from("5511933332222");

    let strategy = {
        let engine = StrategyEngine::with_store(fast_retry_config(), store.clone())
            .await
            .unwrap();
        engine.select_strategy(&conv, None).await.unwrap()
    };

    let engine = StrategyEngine::with_store(fast_retry_config(), store)
        .await
        .unwrap();
    let session = engine.session(&conv).unwrap().unwrap();
    assert_eq!(session.turns, 1);
    assert_eq!(session.last_choice().unwrap().strategy, strategy);

    assert_eq!(
        engine.notify_outcome(&conv, 49.90, "pay-1").await.unwrap(),
        OutcomeDisposition::Applied
    );
    let record = &engine.get_performance_snapshot().unwrap()[&strategy];
    assert_eq!(record.successes, 1.0);
    assert_eq!(record.revenue, 49.90);
}

#[tokio::test]
async fn converted_conversation_stays_converted_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");
    let conv = ConversationId::from("conv-1");

    {
        let engine = StrategyEngine::open(rocksdb_config(&path)).await.unwrap();
        engine.select_strategy(&conv, None).await.unwrap();
        assert_eq!(
            engine.notify_outcome(&conv, 30.0, "sale-1").await.unwrap(),
            OutcomeDisposition::Applied
        );
    }

    let engine = StrategyEngine::open(rocksdb_config(&path)).await.unwrap();
    let session = engine.session(&conv).unwrap().unwrap();
    assert!(session.converted);
    assert_eq!(session.conversion, Some(OutcomeId::from("sale-1")));

    engine.select_strategy(&conv, None).await.unwrap();
    assert_eq!(
        engine.notify_outcome(&conv, 30.0, "sale-2").await.unwrap(),
        OutcomeDisposition::Duplicate
    );
    let stats = engine.learning_statistics().unwrap();
    assert_eq!(stats.total_successes, 1.0);
    assert_eq!(stats.total_revenue, 30.0);
}

#[tokio::test]
async fn archived_conversion_survives_restart_and_reset_clears_it() {
    let store: Arc<dyn LedgerStore> = Arc::new(CozoLedgerStore::in_memory().unwrap());
    let conv = ConversationId::from("conv-7");

    {
        let engine = StrategyEngine::with_store(fast_retry_config(), store.clone())
            .await
            .unwrap();
        engine.select_strategy(&conv, None).await.unwrap();
        engine.notify_outcome(&conv, 12.0, "sale-1").await.unwrap();
        let later = chrono::Utc::now() + chrono::Duration::days(30);
        assert_eq!(engine.archive_inactive(later).await.unwrap().len(), 1);
    }

    let engine = StrategyEngine::with_store(fast_retry_config(), store.clone())
        .await
        .unwrap();
    let session = engine.session(&conv).unwrap().unwrap();
    assert!(session.archived);
    assert!(session.converted);
    assert_eq!(
        engine.notify_outcome(&conv, 12.0, "sale-2").await.unwrap(),
        OutcomeDisposition::Duplicate
    );

    assert!(engine.reset_conversation(&conv).await.unwrap());
    let engine = StrategyEngine::with_store(fast_retry_config(), store)
        .await
        .unwrap();
    assert!(!engine.session(&conv).unwrap().unwrap().converted);
    engine.select_strategy(&conv, None).await.unwrap();
    assert_eq!(
        engine.notify_outcome(&conv, 12.0, "sale-2").await.unwrap(),
        OutcomeDisposition::Applied
    );
    assert_eq!(engine.learning_statistics().unwrap().total_successes, 2.0);
}
