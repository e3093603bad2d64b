//! Epsilon-greedy strategy selection
//!
//! Every call to [`BanditSelector::select`]:
//!
//! 1. claims the next selection index and its exploration probability
//! 2. picks an untried strategy if cold start applies, otherwise flips the
//!    exploration coin and either explores uniformly or exploits the best
//!    success rate in the ledger snapshot
//! 3. counts the attempt in the ledger and appends the choice to the
//!    conversation before returning
//!
//! Storage trouble never prevents a selection: an unreadable snapshot falls
//! back to a uniform pick, and recording failures are logged.

mod exploration;

pub use exploration::{ExplorationSchedule, ExplorationState};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::ExplorationConfig;
use crate::ledger::{PerformanceLedger, StrategySnapshot};
use crate::session::{SessionStrategyTracker, StrategyChoice};
use crate::strategy::Strategy;
use crate::types::{ContextBucket, ConversationId};

/// How a selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// An untried strategy was picked ahead of the coin flip.
    ColdStart,
    /// Uniform pick with probability epsilon.
    Explore,
    /// Highest success rate.
    Exploit,
    /// Ledger unreadable; uniform pick.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub strategy: Strategy,
    pub mode: SelectionMode,
    /// Exploration probability in effect.
    pub epsilon: f64,
    /// Selection index.
    pub t: u64,
    pub bucket: ContextBucket,
}

pub struct BanditSelector {
    ledger: Arc<PerformanceLedger>,
    tracker: Arc<SessionStrategyTracker>,
    exploration: ExplorationState,
    cold_start_optimism: Option<f64>,
    rng: Mutex<StdRng>,
}

impl BanditSelector {
    pub fn new(
        ledger: Arc<PerformanceLedger>,
        tracker: Arc<SessionStrategyTracker>,
        config: &ExplorationConfig,
    ) -> Self {
        Self::starting_at(ledger, tracker, config, 0)
    }

    /// Selector whose schedule resumes at selection index `t`.
    pub fn starting_at(
        ledger: Arc<PerformanceLedger>,
        tracker: Arc<SessionStrategyTracker>,
        config: &ExplorationConfig,
        t: u64,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            ledger,
            tracker,
            exploration: ExplorationState::starting_at(
                ExplorationSchedule::from_config(config),
                t,
            ),
            cold_start_optimism: config.cold_start_optimism,
            rng: Mutex::new(rng),
        }
    }

    pub fn exploration(&self) -> &ExplorationState {
        &self.exploration
    }

    /// Choose a strategy for the conversation's current turn and record it.
    pub async fn select(
        &self,
        conversation_id: &ConversationId,
        bucket: &ContextBucket,
        timestamp: Option<DateTime<Utc>>,
    ) -> Selection {
        let (t, epsilon) = self.exploration.advance();

        let (strategy, mode) = match self.ledger.snapshot_bucket(bucket) {
            Ok(snapshot) => {
                self.with_rng(|rng| choose(&snapshot, epsilon, self.cold_start_optimism, rng))
            }
            Err(e) => {
                warn!(error = %e, "Ledger snapshot unavailable, choosing uniformly");
                (self.with_rng(|rng| uniform(rng)), SelectionMode::Fallback)
            }
        };

        debug!(
            conversation_id = %conversation_id,
            strategy = %strategy,
            mode = ?mode,
            epsilon,
            t,
            bucket = %bucket,
            "Strategy selected"
        );

        if let Err(e) = self.ledger.record_attempt_in(bucket, strategy).await {
            error!(strategy = %strategy, error = %e, "Failed to count attempt");
        }

        let mut choice = StrategyChoice::new(strategy).in_bucket(bucket.clone());
        choice.timestamp = timestamp;
        match self.tracker.append(conversation_id, choice, true) {
            Ok(()) => self.tracker.persist(conversation_id).await,
            Err(e) => error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to record choice"
            ),
        }

        Selection {
            strategy,
            mode,
            epsilon,
            t,
            bucket: bucket.clone(),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        match self.rng.lock() {
            Ok(mut rng) => f(&mut *rng),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

/// One epsilon-greedy decision over `snapshot`.
///
/// With `optimism` unset, the first untried strategy in enumeration order is
/// returned before any coin flip. With it set, untried strategies compete at
/// that rate.
pub fn choose<R: Rng + ?Sized>(
    snapshot: &StrategySnapshot,
    epsilon: f64,
    optimism: Option<f64>,
    rng: &mut R,
) -> (Strategy, SelectionMode) {
    if optimism.is_none()
        && let Some(untried) = Strategy::all()
            .iter()
            .find(|s| snapshot.get(*s).is_none_or(|r| r.is_untried()))
    {
        return (*untried, SelectionMode::ColdStart);
    }

    if rng.gen_bool(exploration::unit_or_zero(epsilon)) {
        return (uniform(rng), SelectionMode::Explore);
    }
    (best(snapshot, optimism), SelectionMode::Exploit)
}

/// Highest success rate; ties go to fewer attempts, then enumeration order.
pub fn best(snapshot: &StrategySnapshot, optimism: Option<f64>) -> Strategy {
    let mut best: Option<(Strategy, f64, u64)> = None;
    for strategy in Strategy::all() {
        let (rate, attempts) = match snapshot.get(strategy) {
            Some(r) if !r.is_untried() => (r.success_rate(), r.attempts),
            _ => (optimism.unwrap_or(f64::INFINITY), 0),
        };
        let better = match best {
            None => true,
            Some((_, best_rate, best_attempts)) => {
                rate > best_rate || (rate == best_rate && attempts < best_attempts)
            }
        };
        if better {
            best = Some((*strategy, rate, attempts));
        }
    }
    best.map(|(s, _, _)| s).unwrap_or(Strategy::Consultive)
}

fn uniform<R: Rng + ?Sized>(rng: &mut R) -> Strategy {
    let all = Strategy::all();
    all[rng.gen_range(0..all.len())]
}
