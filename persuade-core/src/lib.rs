//! persuade-core - Online persuasion strategy selection
//!
//! An epsilon-greedy bandit picks one of a fixed set of persuasion strategies
//! for each outbound turn of a sales conversation, and learns from confirmed
//! conversions. The pieces, leaves first:
//!
//! - [`PerformanceLedger`]: durable per-strategy counters on CozoDB
//! - [`RewardAttributor`]: credits a conversion to the choices behind it
//! - [`BanditSelector`]: exploration schedule and arm choice
//! - [`SessionStrategyTracker`]: per-conversation history and conversion guard
//!
//! [`StrategyEngine`] wires them together for callers.

pub mod attribution;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod selector;
pub mod session;
pub mod stats;
pub mod strategy;
pub mod types;

pub use attribution::{
    AttributionRule, LastTouch, MultiTouch, OutcomeDisposition, Reward, RewardAttributor,
    StalenessDecay,
};
pub use config::{
    AttributionConfig, AttributionPolicy, ContextualConfig, ExplorationConfig, LedgerConfig,
    PersuadeConfig, RetryConfig, SessionConfig, StalenessConfig, StalenessCurve, StorageKind,
};
pub use engine::StrategyEngine;
pub use error::{PersuadeError, Result};
pub use ledger::{
    CozoLedgerStore, LEDGER_SCHEMA, LedgerKey, LedgerStore, PerformanceLedger, PerformanceRecord,
    RewardApplied, RewardEntry, RewardEvent, StrategySnapshot,
};
pub use selector::{BanditSelector, ExplorationSchedule, ExplorationState, Selection, SelectionMode};
pub use session::{SessionState, SessionStrategyTracker, SessionSummary, StrategyChoice};
pub use stats::{LearningStatistics, StrategyStats};
pub use strategy::Strategy;
pub use types::{
    ChoiceId, ContextBucket, ContextFeatures, ConversationId, ConversionOutcome, OutcomeId,
    RewardKey, SentimentBand,
};
