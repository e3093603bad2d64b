//! Synthetic conversations for exercising the engine end to end.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use clap::{Args, ValueEnum};
use persuade_core::{
    AttributionPolicy, ContextFeatures, ConversationId, LearningStatistics, OutcomeDisposition,
    Strategy, StrategyEngine,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::output::print_statistics;

const INTENTS: &[&str] = &["greeting", "product_question", "price_inquiry", "objection"];

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of conversations
    #[arg(short = 'n', long, default_value_t = 200)]
    pub conversations: usize,

    /// Maximum customer turns per conversation
    #[arg(long, default_value_t = 6)]
    pub max_turns: u32,

    /// Seed for the exploration coin and the synthetic customers
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Per-turn conversion probability, e.g. `--rate scarcity=0.2` (repeatable)
    #[arg(long = "rate", value_parser = parse_rate)]
    pub rates: Vec<(Strategy, f64)>,

    /// Average ticket value
    #[arg(long, default_value_t = 100.0)]
    pub ticket: f64,

    /// Attribution policy override
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Condition selection on synthetic intent and sentiment
    #[arg(long)]
    pub contextual: bool,

    /// Write to the configured ledger instead of a throwaway in-memory one
    #[arg(long)]
    pub persist: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    LastTouch,
    MultiTouch,
}

impl From<PolicyArg> for AttributionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::LastTouch => Self::LastTouch,
            PolicyArg::MultiTouch => Self::MultiTouch,
        }
    }
}

/// Synthetic customer behavior.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub conversations: usize,
    pub max_turns: u32,
    pub rates: BTreeMap<Strategy, f64>,
    pub ticket: f64,
    pub contextual: bool,
}

impl Scenario {
    fn default_rates() -> BTreeMap<Strategy, f64> {
        BTreeMap::from([
            (Strategy::Consultive, 0.06),
            (Strategy::Scarcity, 0.12),
            (Strategy::Emotional, 0.04),
            (Strategy::Rational, 0.08),
        ])
    }

    fn rate(&self, strategy: Strategy) -> f64 {
        self.rates.get(&strategy).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub conversations: usize,
    pub conversions: usize,
    pub revenue: f64,
    pub statistics: LearningStatistics,
}

pub async fn run(args: SimulateArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.exploration.seed = Some(args.seed);
    if let Some(policy) = args.policy {
        config.attribution.policy = policy.into();
    }
    if args.contextual {
        config.contextual.enabled = true;
    }

    let engine = if args.persist {
        StrategyEngine::open(config).await?
    } else {
        StrategyEngine::in_memory(config).await?
    };

    let mut rates = Scenario::default_rates();
    rates.extend(args.rates.iter().copied());
    let scenario = Scenario {
        conversations: args.conversations,
        max_turns: args.max_turns,
        rates,
        ticket: args.ticket,
        contextual: args.contextual,
    };

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    let report = simulate(&engine, &scenario, &mut rng).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} conversations, {} conversions, revenue {:.2}",
            report.conversations, report.conversions, report.revenue
        );
        println!();
        print_statistics(&report.statistics);
    }
    Ok(())
}

/// Drive `scenario.conversations` conversations through `engine`.
pub async fn simulate(
    engine: &StrategyEngine,
    scenario: &Scenario,
    rng: &mut StdRng,
) -> Result<SimulationReport> {
    let mut conversions = 0;
    let mut revenue = 0.0;
    // Persisted ledgers outlive a run; ids must not collide with converted ones.
    let run = engine.learning_statistics()?.total_attempts;

    for i in 0..scenario.conversations {
        let conv = ConversationId::new(format!("sim-{run}-{i}"));
        let mut converted = false;

        for _ in 0..scenario.max_turns {
            let context = scenario.contextual.then(|| random_features(rng));
            let strategy = engine.select_strategy(&conv, context.as_ref()).await?;

            if rng.gen_bool(scenario.rate(strategy).clamp(0.0, 1.0)) {
                let ticket = round_cents(scenario.ticket * rng.gen_range(0.5..1.5));
                let disposition = engine
                    .notify_outcome(&conv, ticket, format!("sim-order-{run}-{i}"))
                    .await?;
                if disposition == OutcomeDisposition::Applied {
                    conversions += 1;
                    revenue += ticket;
                }
                converted = true;
                break;
            }
        }

        if !converted {
            engine.notify_session_end(&conv)?;
        }
    }

    info!(
        conversations = scenario.conversations,
        conversions, revenue, "Simulation finished"
    );

    Ok(SimulationReport {
        conversations: scenario.conversations,
        conversions,
        revenue,
        statistics: engine.learning_statistics()?,
    })
}

fn random_features(rng: &mut StdRng) -> ContextFeatures {
    let intent = INTENTS[rng.gen_range(0..INTENTS.len())];
    ContextFeatures::default()
        .with_intent(intent)
        .with_sentiment(rng.gen_range(-1.0..=1.0))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse `strategy=probability`.
fn parse_rate(s: &str) -> Result<(Strategy, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected STRATEGY=PROBABILITY, got '{s}'"))?;
    let strategy: Strategy = name.parse().map_err(|e| format!("{e}"))?;
    let rate: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid probability '{value}'"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("probability must be in [0, 1], got {rate}"));
    }
    Ok((strategy, rate))
}
