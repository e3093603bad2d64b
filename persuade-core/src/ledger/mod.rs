//! Per-strategy performance ledger.
//!
//! The ledger keeps the committed counters in memory behind a short-lived
//! `RwLock` so snapshots never wait on storage, and mirrors every change into
//! a [`LedgerStore`]. Store writes are serialized by an async gate, and the
//! value written is always read from memory under that gate, so the store
//! never regresses to an older record.
//!
//! Attempt writes are best effort: a failing store is logged and the in-memory
//! count stands. Reward writes are durable before they are acknowledged: they
//! are retried with backoff and surface [`PersuadeError::PersistenceUnavailable`]
//! once the retry budget is spent.

pub mod record;
pub mod retry;
pub mod store;

pub use record::{LedgerKey, PerformanceRecord, RewardEntry, RewardEvent};
pub use retry::RetryPolicy;
pub use store::{CozoLedgerStore, LEDGER_SCHEMA, LedgerStore};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, error, warn};

use crate::config::{LedgerConfig, RetryConfig, StorageKind};
use crate::error::{PersuadeError, Result};
use crate::strategy::Strategy;
use crate::types::ContextBucket;

/// Point-in-time copy of one bucket, with every strategy present.
pub type StrategySnapshot = BTreeMap<Strategy, PerformanceRecord>;

/// Result of applying a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardApplied {
    Applied,
    /// The idempotency key was already committed; nothing changed.
    Duplicate,
}

/// Open the store selected by `config.storage`.
pub fn open_store(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    let store = match config.storage {
        StorageKind::Memory => CozoLedgerStore::in_memory()?,
        StorageKind::Rocksdb => CozoLedgerStore::open(&config.path)?,
    };
    Ok(Arc::new(store))
}

pub struct PerformanceLedger {
    records: RwLock<BTreeMap<LedgerKey, PerformanceRecord>>,
    store: Arc<dyn LedgerStore>,
    persist_gate: tokio::sync::Mutex<()>,
    retry: RetryConfig,
    degraded_writes: AtomicU64,
}

impl PerformanceLedger {
    /// Build a ledger over `store`, reloading any persisted records.
    pub async fn open(store: Arc<dyn LedgerStore>, retry: RetryConfig) -> Result<Self> {
        let records = store.load_records().await?;
        debug!(records = records.len(), "Loaded performance ledger");
        Ok(Self {
            records: RwLock::new(records),
            store,
            persist_gate: tokio::sync::Mutex::new(()),
            retry,
            degraded_writes: AtomicU64::new(0),
        })
    }

    /// Ledger on a fresh in-memory Cozo store.
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(CozoLedgerStore::in_memory()?), RetryConfig::default()).await
    }

    /// Count one exposure of `strategy` in the global bucket.
    pub async fn record_attempt(&self, strategy: Strategy) -> Result<()> {
        self.record_attempt_in(&ContextBucket::global(), strategy)
            .await
            .map(|_| ())
    }

    /// Count one exposure of `strategy` in `bucket`, returning the new count.
    ///
    /// Only a poisoned lock fails this call; store errors are absorbed.
    pub async fn record_attempt_in(&self, bucket: &ContextBucket, strategy: Strategy) -> Result<u64> {
        let key = (bucket.clone(), strategy);
        let attempts = {
            let mut records = self.write_records()?;
            let record = records.entry(key.clone()).or_default();
            record.add_attempt();
            record.attempts
        };
        self.persist_attempt(&key).await;
        Ok(attempts)
    }

    async fn persist_attempt(&self, key: &LedgerKey) {
        let _gate = self.persist_gate.lock().await;
        let current = match self.read_records() {
            Ok(records) => records.get(key).cloned(),
            Err(_) => None,
        };
        let Some(current) = current else {
            return;
        };
        if let Err(e) = self.store.save_record(key, &current).await {
            self.degraded_writes.fetch_add(1, Ordering::Relaxed);
            warn!(
                bucket = %key.0,
                strategy = %key.1,
                error = %e,
                "Attempt not persisted, keeping in-memory count"
            );
        }
    }

    /// Credit `strategy` in the global bucket with an unkeyed reward.
    ///
    /// Prefer [`PerformanceLedger::apply_reward`] with a keyed event so retries
    /// are safe.
    pub async fn record_reward(&self, strategy: Strategy, amount: f64, revenue: f64) -> Result<()> {
        let event = RewardEvent::unkeyed(vec![RewardEntry::new(strategy, amount, revenue)]);
        self.apply_reward(&event).await.map(|_| ())
    }

    /// Durably apply every entry of `event` at most once per `event.key`.
    pub async fn apply_reward(&self, event: &RewardEvent) -> Result<RewardApplied> {
        validate_entries(&event.entries)?;

        let mut policy = RetryPolicy::from_config(&self.retry);
        loop {
            match self.try_commit(event).await {
                Ok(applied) => return Ok(applied),
                Err(e) if e.is_retryable() => match policy.next_delay() {
                    Some(delay) => {
                        warn!(
                            reward_key = %event.key,
                            attempt = policy.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Reward write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(
                            reward_key = %event.key,
                            attempts = policy.attempts(),
                            error = %e,
                            "Reward write failed permanently"
                        );
                        return Err(PersuadeError::PersistenceUnavailable {
                            attempts: policy.attempts(),
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_commit(&self, event: &RewardEvent) -> Result<RewardApplied> {
        let _gate = self.persist_gate.lock().await;

        // Idempotency lives in the store: the key is committed in the same
        // transaction as the records, and this check runs under the gate.
        if self.store.has_reward(&event.key).await? {
            return Ok(RewardApplied::Duplicate);
        }

        let updated: Vec<(LedgerKey, PerformanceRecord)> = {
            let records = self.read_records()?;
            let mut updated: BTreeMap<LedgerKey, PerformanceRecord> = BTreeMap::new();
            for entry in &event.entries {
                let key = entry.key();
                let record = updated
                    .entry(key.clone())
                    .or_insert_with(|| records.get(&key).cloned().unwrap_or_default());
                record.add_reward(entry.amount, entry.revenue);
            }
            updated.into_iter().collect()
        };

        self.store.commit_reward(event, &updated).await?;

        // Deltas rather than the computed records, so attempts counted since
        // the read above survive.
        {
            let mut records = self.write_records()?;
            for entry in &event.entries {
                records
                    .entry(entry.key())
                    .or_default()
                    .add_reward(entry.amount, entry.revenue);
            }
        }
        debug!(reward_key = %event.key, entries = event.entries.len(), "Reward committed");
        Ok(RewardApplied::Applied)
    }

    /// Global bucket, every strategy present.
    pub fn snapshot(&self) -> Result<StrategySnapshot> {
        self.snapshot_bucket(&ContextBucket::global())
    }

    /// One bucket, every strategy present. Missing records read as untried.
    pub fn snapshot_bucket(&self, bucket: &ContextBucket) -> Result<StrategySnapshot> {
        let records = self.read_records()?;
        Ok(Strategy::all()
            .iter()
            .map(|s| {
                let record = records
                    .get(&(bucket.clone(), *s))
                    .cloned()
                    .unwrap_or_default();
                (*s, record)
            })
            .collect())
    }

    /// Per-strategy totals summed over every bucket.
    pub fn snapshot_totals(&self) -> Result<StrategySnapshot> {
        let records = self.read_records()?;
        let mut totals: StrategySnapshot = Strategy::all()
            .iter()
            .map(|s| (*s, PerformanceRecord::default()))
            .collect();
        for ((_, strategy), record) in records.iter() {
            if let Some(total) = totals.get_mut(strategy) {
                total.attempts += record.attempts;
                total.successes += record.successes;
                total.revenue += record.revenue;
                total.updated_at = total.updated_at.max(record.updated_at);
            }
        }
        Ok(totals)
    }

    /// Every record in every bucket.
    pub fn snapshot_all(&self) -> Result<BTreeMap<LedgerKey, PerformanceRecord>> {
        Ok(self.read_records()?.clone())
    }

    /// Committed reward events in the store.
    pub async fn reward_count(&self) -> Result<usize> {
        self.store.reward_count().await
    }

    /// Attempt writes that failed and were kept in memory only.
    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.load(Ordering::Relaxed)
    }

    fn read_records(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<LedgerKey, PerformanceRecord>>> {
        self.records
            .read()
            .map_err(|_| PersuadeError::LockPoisoned("ledger records"))
    }

    fn write_records(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<LedgerKey, PerformanceRecord>>> {
        self.records
            .write()
            .map_err(|_| PersuadeError::LockPoisoned("ledger records"))
    }
}

fn validate_entries(entries: &[RewardEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(PersuadeError::InvalidArgument(
            "reward has no entries".into(),
        ));
    }
    for entry in entries {
        if !entry.amount.is_finite() || entry.amount < 0.0 {
            return Err(PersuadeError::InvalidArgument(format!(
                "reward amount must be a finite value >= 0, got {}",
                entry.amount
            )));
        }
        if !entry.revenue.is_finite() || entry.revenue < 0.0 {
            return Err(PersuadeError::InvalidArgument(format!(
                "revenue must be a finite value >= 0, got {}",
                entry.revenue
            )));
        }
    }
    Ok(())
}
