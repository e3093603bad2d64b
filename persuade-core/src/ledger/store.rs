//! Ledger storage trait and CozoDB implementation

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeZone;
use cozo::{DataValue, DbInstance, NamedRows, ScriptMutability};

use crate::error::{PersuadeError, Result};
use crate::session::{SessionState, StrategyChoice};
use crate::strategy::Strategy;
use crate::types::{ContextBucket, ConversationId, OutcomeId, RewardKey};

use super::record::{LedgerKey, PerformanceRecord, RewardEvent};

/// CozoDB relations backing the ledger, created on demand by `ensure_schema`.
pub const LEDGER_SCHEMA: &[(&str, &str)] = &[
    (
        "performance_record",
        r#"
        :create performance_record {
            bucket: String,
            strategy: String =>
            attempts: Int,
            successes: Float,
            revenue: Float,
            updated_at: Int
        }
        "#,
    ),
    (
        "reward_event",
        r#"
        :create reward_event {
            reward_key: String =>
            conversation_id: String,
            outcome_id: String,
            allocations_json: String,
            recorded_at: Int
        }
        "#,
    ),
    (
        "session_state",
        r#"
        :create session_state {
            conversation_id: String =>
            history_json: String,
            turns: Int,
            created_at: Int,
            last_activity: Int,
            archived: Bool
        }
        "#,
    ),
    (
        "session_conversion",
        r#"
        :create session_conversion {
            conversation_id: String =>
            outcome_id: String,
            converted_at: Int
        }
        "#,
    ),
];

/// Durability seam behind [`PerformanceLedger`](super::PerformanceLedger).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All persisted records, used to rebuild the in-memory ledger on open.
    async fn load_records(&self) -> Result<BTreeMap<LedgerKey, PerformanceRecord>>;

    /// Upsert one record. Used on the best-effort attempt path.
    async fn save_record(&self, key: &LedgerKey, record: &PerformanceRecord) -> Result<()>;

    /// Whether a reward with this idempotency key was already committed.
    async fn has_reward(&self, key: &RewardKey) -> Result<bool>;

    /// Write the reward event and the updated records in one transaction.
    ///
    /// An event attributed to a conversation also records that conversation's
    /// conversion in the same transaction.
    async fn commit_reward(
        &self,
        event: &RewardEvent,
        records: &[(LedgerKey, PerformanceRecord)],
    ) -> Result<()>;

    /// Number of committed reward events.
    async fn reward_count(&self) -> Result<usize>;

    /// Every persisted conversation, with its conversion if one was recorded.
    async fn load_sessions(&self) -> Result<Vec<SessionState>>;

    /// Upsert a conversation's history, turns and archive flag.
    ///
    /// The conversion is not part of this row; it is written with the reward.
    async fn save_session(&self, state: &SessionState) -> Result<()>;

    /// Record a conversion that carried no reward.
    async fn save_conversion(
        &self,
        conversation_id: &ConversationId,
        outcome_id: &OutcomeId,
    ) -> Result<()>;

    /// Forget a conversation's conversion, starting a new sales cycle.
    async fn clear_conversion(&self, conversation_id: &ConversationId) -> Result<()>;
}

/// CozoDB-backed ledger store
pub struct CozoLedgerStore {
    db: Arc<DbInstance>,
}

impl CozoLedgerStore {
    /// Wrap an existing database and make sure the ledger relations exist.
    pub fn new(db: Arc<DbInstance>) -> Result<Self> {
        let store = Self { db };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open or create a RocksDB-backed ledger at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| PersuadeError::Database(format!("Failed to create directory: {e}")))?;

        let db = DbInstance::new("rocksdb", path, "")
            .map_err(|e| PersuadeError::Database(format!("Failed to open database: {e}")))?;

        Self::new(Arc::new(db))
    }

    /// Ledger on Cozo's in-memory engine.
    pub fn in_memory() -> Result<Self> {
        let db = DbInstance::new("mem", "", "")
            .map_err(|e| PersuadeError::Database(format!("Failed to open database: {e}")))?;
        Self::new(Arc::new(db))
    }

    /// Underlying database handle
    pub fn db(&self) -> Arc<DbInstance> {
        self.db.clone()
    }

    /// Create any missing ledger relations. Safe to call on an existing database.
    pub fn ensure_schema(&self) -> Result<()> {
        let existing = self.relation_names()?;
        for (name, script) in LEDGER_SCHEMA {
            if existing.contains(*name) {
                continue;
            }
            self.db
                .run_script(script, Default::default(), ScriptMutability::Mutable)
                .map_err(|e| PersuadeError::Database(format!("Schema init failed for {name}: {e}")))?;
            tracing::debug!(relation = name, "Created ledger relation");
        }
        Ok(())
    }

    fn relation_names(&self) -> Result<HashSet<String>> {
        let rows = self
            .db
            .run_script("::relations", Default::default(), ScriptMutability::Immutable)
            .map_err(|e| PersuadeError::Database(format!("Listing relations failed: {e}")))?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.get_str()).map(str::to_string))
            .collect())
    }

    async fn run_query(&self, query: &str, params: BTreeMap<String, DataValue>) -> Result<NamedRows> {
        self.db
            .run_script(query, params, ScriptMutability::Immutable)
            .map_err(|e| PersuadeError::Database(format!("Query failed: {e}")))
    }

    async fn run_mutation(
        &self,
        query: &str,
        params: BTreeMap<String, DataValue>,
    ) -> Result<NamedRows> {
        self.db
            .run_script(query, params, ScriptMutability::Mutable)
            .map_err(|e| PersuadeError::Database(format!("Mutation failed: {e}")))
    }
}

#[async_trait]
impl LedgerStore for CozoLedgerStore {
    async fn load_records(&self) -> Result<BTreeMap<LedgerKey, PerformanceRecord>> {
        let query = r#"
            ?[bucket, strategy, attempts, successes, revenue, updated_at] :=
            *performance_record{bucket, strategy, attempts, successes, revenue, updated_at}
        "#;

        let rows = self.run_query(query, Default::default()).await?;
        let mut records = BTreeMap::new();
        for row in &rows.rows {
            let (key, record) = parse_record_row(row)?;
            records.insert(key, record);
        }
        Ok(records)
    }

    async fn save_record(&self, key: &LedgerKey, record: &PerformanceRecord) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("rows".to_string(), DataValue::List(vec![record_row(key, record)]));

        let query = r#"
            ?[bucket, strategy, attempts, successes, revenue, updated_at] <- $rows
            :put performance_record {
                bucket, strategy => attempts, successes, revenue, updated_at
            }
        "#;

        self.run_mutation(query, params).await?;
        Ok(())
    }

    async fn has_reward(&self, key: &RewardKey) -> Result<bool> {
        let mut params = BTreeMap::new();
        params.insert("reward_key".to_string(), DataValue::Str(key.as_str().into()));

        let query = r#"
            ?[reward_key] := *reward_event{reward_key}, reward_key = $reward_key
        "#;

        let rows = self.run_query(query, params).await?;
        Ok(!rows.rows.is_empty())
    }

    async fn commit_reward(
        &self,
        event: &RewardEvent,
        records: &[(LedgerKey, PerformanceRecord)],
    ) -> Result<()> {
        let allocations_json = serde_json::to_string(&event.entries)
            .map_err(|e| PersuadeError::Serialization(e.to_string()))?;

        let mut params = BTreeMap::new();
        params.insert(
            "reward_key".to_string(),
            DataValue::Str(event.key.as_str().into()),
        );
        params.insert(
            "conversation_id".to_string(),
            DataValue::Str(event.conversation_id.as_str().into()),
        );
        params.insert(
            "outcome_id".to_string(),
            DataValue::Str(event.outcome_id.as_str().into()),
        );
        params.insert(
            "allocations_json".to_string(),
            DataValue::Str(allocations_json.into()),
        );
        params.insert(
            "recorded_at".to_string(),
            DataValue::from(event.recorded_at.timestamp_millis()),
        );
        params.insert(
            "rows".to_string(),
            DataValue::List(
                records
                    .iter()
                    .map(|(key, record)| record_row(key, record))
                    .collect(),
            ),
        );

        // Chained blocks run in a single transaction.
        let mut query = String::from(
            r#"
            {
                ?[reward_key, conversation_id, outcome_id, allocations_json, recorded_at] <- [[
                    $reward_key, $conversation_id, $outcome_id, $allocations_json, $recorded_at
                ]]
                :put reward_event {
                    reward_key => conversation_id, outcome_id, allocations_json, recorded_at
                }
            }
            {
                ?[bucket, strategy, attempts, successes, revenue, updated_at] <- $rows
                :put performance_record {
                    bucket, strategy => attempts, successes, revenue, updated_at
                }
            }
        "#,
        );
        if event.is_attributed() {
            query.push_str(
                r#"
            {
                ?[conversation_id, outcome_id, converted_at] <- [[
                    $conversation_id, $outcome_id, $recorded_at
                ]]
                :put session_conversion { conversation_id => outcome_id, converted_at }
            }
        "#,
            );
        }

        self.run_mutation(&query, params).await?;
        Ok(())
    }

    async fn reward_count(&self) -> Result<usize> {
        let query = "?[count(reward_key)] := *reward_event{reward_key}";
        let rows = self.run_query(query, Default::default()).await?;
        let count = rows
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.get_int())
            .unwrap_or(0);
        Ok(count as usize)
    }

    async fn load_sessions(&self) -> Result<Vec<SessionState>> {
        let query = r#"
            ?[conversation_id, history_json, turns, created_at, last_activity, archived] :=
            *session_state{conversation_id, history_json, turns, created_at, last_activity, archived}
        "#;
        let rows = self.run_query(query, Default::default()).await?;
        let mut sessions: BTreeMap<ConversationId, SessionState> = BTreeMap::new();
        for row in &rows.rows {
            let state = parse_session_row(row)?;
            sessions.insert(state.conversation_id.clone(), state);
        }

        let query = r#"
            ?[conversation_id, outcome_id] := *session_conversion{conversation_id, outcome_id}
        "#;
        let rows = self.run_query(query, Default::default()).await?;
        for row in &rows.rows {
            let conversation_id = row[0]
                .get_str()
                .ok_or_else(|| PersuadeError::Database("Invalid conversation_id".into()))?;
            let outcome_id = row[1]
                .get_str()
                .ok_or_else(|| PersuadeError::Database("Invalid outcome_id".into()))?;
            let id = ConversationId::new(conversation_id);
            // A conversion may outlive a session row that was never written.
            let state = sessions
                .entry(id.clone())
                .or_insert_with(|| SessionState::new(id));
            state.converted = true;
            state.conversion = Some(OutcomeId::new(outcome_id));
        }

        Ok(sessions.into_values().collect())
    }

    async fn save_session(&self, state: &SessionState) -> Result<()> {
        let history_json = serde_json::to_string(&state.strategy_history)
            .map_err(|e| PersuadeError::Serialization(e.to_string()))?;

        let mut params = BTreeMap::new();
        params.insert(
            "conversation_id".to_string(),
            DataValue::Str(state.conversation_id.as_str().into()),
        );
        params.insert("history_json".to_string(), DataValue::Str(history_json.into()));
        params.insert("turns".to_string(), DataValue::from(i64::from(state.turns)));
        params.insert(
            "created_at".to_string(),
            DataValue::from(state.created_at.timestamp_millis()),
        );
        params.insert(
            "last_activity".to_string(),
            DataValue::from(state.last_activity.timestamp_millis()),
        );
        params.insert("archived".to_string(), DataValue::Bool(state.archived));

        let query = r#"
            ?[conversation_id, history_json, turns, created_at, last_activity, archived] <- [[
                $conversation_id, $history_json, $turns, $created_at, $last_activity, $archived
            ]]
            :put session_state {
                conversation_id => history_json, turns, created_at, last_activity, archived
            }
        "#;

        self.run_mutation(query, params).await?;
        Ok(())
    }

    async fn save_conversion(
        &self,
        conversation_id: &ConversationId,
        outcome_id: &OutcomeId,
    ) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert(
            "conversation_id".to_string(),
            DataValue::Str(conversation_id.as_str().into()),
        );
        params.insert("outcome_id".to_string(), DataValue::Str(outcome_id.as_str().into()));
        params.insert(
            "converted_at".to_string(),
            DataValue::from(chrono::Utc::now().timestamp_millis()),
        );

        let query = r#"
            ?[conversation_id, outcome_id, converted_at] <- [[
                $conversation_id, $outcome_id, $converted_at
            ]]
            :put session_conversion { conversation_id => outcome_id, converted_at }
        "#;

        self.run_mutation(query, params).await?;
        Ok(())
    }

    async fn clear_conversion(&self, conversation_id: &ConversationId) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert(
            "conversation_id".to_string(),
            DataValue::Str(conversation_id.as_str().into()),
        );

        let query = r#"
            ?[conversation_id] <- [[$conversation_id]]
            :rm session_conversion { conversation_id }
        "#;

        self.run_mutation(query, params).await?;
        Ok(())
    }
}

fn parse_session_row(row: &[DataValue]) -> Result<SessionState> {
    let conversation_id = row[0]
        .get_str()
        .ok_or_else(|| PersuadeError::Database("Invalid conversation_id".into()))?;
    let history_json = row[1]
        .get_str()
        .ok_or_else(|| PersuadeError::Database("Invalid history_json".into()))?;
    let turns = row[2]
        .get_int()
        .ok_or_else(|| PersuadeError::Database("Invalid turns".into()))?;
    let created_at = row[3]
        .get_int()
        .ok_or_else(|| PersuadeError::Database("Invalid created_at".into()))?;
    let last_activity = row[4]
        .get_int()
        .ok_or_else(|| PersuadeError::Database("Invalid last_activity".into()))?;
    let archived = row[5]
        .get_bool()
        .ok_or_else(|| PersuadeError::Database("Invalid archived".into()))?;

    let strategy_history: Vec<StrategyChoice> = serde_json::from_str(history_json)
        .map_err(|e| PersuadeError::Serialization(e.to_string()))?;

    let mut state = SessionState::new(ConversationId::new(conversation_id));
    state.strategy_history = strategy_history;
    state.turns = u32::try_from(turns).unwrap_or(u32::MAX);
    state.created_at = millis_to_utc(created_at)?;
    state.last_activity = millis_to_utc(last_activity)?;
    state.archived = archived;
    Ok(state)
}

fn millis_to_utc(millis: i64) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PersuadeError::Database("Invalid timestamp".into()))
}

fn record_row(key: &LedgerKey, record: &PerformanceRecord) -> DataValue {
    let (bucket, strategy) = key;
    DataValue::List(vec![
        DataValue::Str(bucket.as_str().into()),
        DataValue::Str(strategy.as_str().into()),
        DataValue::from(i64::try_from(record.attempts).unwrap_or(i64::MAX)),
        DataValue::from(record.successes),
        DataValue::from(record.revenue),
        DataValue::from(record.updated_at.timestamp_millis()),
    ])
}

fn parse_record_row(row: &[DataValue]) -> Result<(LedgerKey, PerformanceRecord)> {
    let bucket = row[0]
        .get_str()
        .ok_or_else(|| PersuadeError::Database("Invalid bucket".into()))?;
    let strategy_str = row[1]
        .get_str()
        .ok_or_else(|| PersuadeError::Database("Invalid strategy".into()))?;
    let attempts = row[2]
        .get_int()
        .ok_or_else(|| PersuadeError::Database("Invalid attempts".into()))?;
    let successes = row[3]
        .get_float()
        .ok_or_else(|| PersuadeError::Database("Invalid successes".into()))?;
    let revenue = row[4]
        .get_float()
        .ok_or_else(|| PersuadeError::Database("Invalid revenue".into()))?;
    let updated_at = row[5]
        .get_int()
        .ok_or_else(|| PersuadeError::Database("Invalid updated_at".into()))?;

    let strategy = Strategy::from_str(strategy_str)
        .map_err(|e| PersuadeError::Database(format!("Invalid strategy: {e}")))?;

    Ok((
        (ContextBucket::new(bucket), strategy),
        PerformanceRecord {
            attempts: u64::try_from(attempts).unwrap_or(0),
            successes,
            revenue,
            updated_at: millis_to_utc(updated_at)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RewardEntry;
    use crate::types::{ConversationId, OutcomeId};

    fn create_test_store() -> CozoLedgerStore {
        let db = DbInstance::new("mem", "", Default::default()).unwrap();
        CozoLedgerStore::new(Arc::new(db)).unwrap()
    }

    fn global(strategy: Strategy) -> LedgerKey {
        (ContextBucket::global(), strategy)
    }

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let store = create_test_store();
        assert!(store.load_records().await.unwrap().is_empty());
        assert_eq!(store.reward_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_and_load_record() {
        let store = create_test_store();
        let mut record = PerformanceRecord::new();
        record.attempts = 7;
        record.successes = 1.5;
        record.revenue = 99.8;

        store
            .save_record(&global(Strategy::Rational), &record)
            .await
            .unwrap();

        let loaded = store.load_records().await.unwrap();
        let got = &loaded[&global(Strategy::Rational)];
        assert_eq!(got.attempts, 7);
        assert_eq!(got.successes, 1.5);
        assert_eq!(got.revenue, 99.8);
    }

    #[tokio::test]
    async fn test_save_record_overwrites() {
        let store = create_test_store();
        let mut record = PerformanceRecord::new();
        record.attempts = 1;
        store
            .save_record(&global(Strategy::Consultive), &record)
            .await
            .unwrap();
        record.attempts = 2;
        store
            .save_record(&global(Strategy::Consultive), &record)
            .await
            .unwrap();

        let loaded = store.load_records().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&global(Strategy::Consultive)].attempts, 2);
    }

    #[tokio::test]
    async fn test_commit_reward_writes_event_and_records() {
        let store = create_test_store();
        let event = RewardEvent::new(
            ConversationId::from("conv-1"),
            OutcomeId::from("sale-1"),
            vec![RewardEntry::new(Strategy::Scarcity, 1.0, 49.90)],
        );
        let mut record = PerformanceRecord::new();
        record.attempts = 3;
        record.successes = 1.0;
        record.revenue = 49.90;

        assert!(!store.has_reward(&event.key).await.unwrap());
        store
            .commit_reward(&event, &[(global(Strategy::Scarcity), record)])
            .await
            .unwrap();

        assert!(store.has_reward(&event.key).await.unwrap());
        assert_eq!(store.reward_count().await.unwrap(), 1);
        let loaded = store.load_records().await.unwrap();
        assert_eq!(loaded[&global(Strategy::Scarcity)].revenue, 49.90);
    }

    #[tokio::test]
    async fn test_records_kept_per_bucket() {
        let store = create_test_store();
        let mut record = PerformanceRecord::new();
        record.attempts = 1;
        let segment = (ContextBucket::new("price_inquiry/negative"), Strategy::Emotional);
        store.save_record(&segment, &record).await.unwrap();
        store
            .save_record(&global(Strategy::Emotional), &record)
            .await
            .unwrap();

        let loaded = store.load_records().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains_key(&segment));
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let store = create_test_store();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
    }
}
