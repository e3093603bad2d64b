//! Engine configuration.
//!
//! Every section carries `#[serde(default)]`, so a config file only needs the
//! keys it overrides:
//!
//! ```toml
//! [exploration]
//! initial_rate = 0.3
//!
//! [attribution]
//! policy = "multi_touch"
//!
//! [attribution.staleness.curve]
//! kind = "linear"
//! slope = 0.05
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PersuadeError, Result};

/// Top-level configuration for the strategy engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersuadeConfig {
    /// Exploration schedule and cold-start behavior.
    pub exploration: ExplorationConfig,
    /// How conversions are credited to past choices.
    pub attribution: AttributionConfig,
    /// Durable performance ledger.
    pub ledger: LedgerConfig,
    /// Session retention.
    pub sessions: SessionConfig,
    /// Contextual bandit extension.
    pub contextual: ContextualConfig,
}

impl PersuadeConfig {
    /// Default config file location, `<config_dir>/persuade/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("persuade/config.toml")
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| PersuadeError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PersuadeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PersuadeError::Serialization(e.to_string()))
    }

    /// Reject values outside their domain.
    pub fn validate(&self) -> Result<()> {
        let e = &self.exploration;
        check_unit("exploration.initial_rate", e.initial_rate)?;
        check_unit("exploration.min_rate", e.min_rate)?;
        if !(e.decay > 0.0 && e.decay <= 1.0) {
            return Err(invalid(format!(
                "exploration.decay must be in (0, 1], got {}",
                e.decay
            )));
        }
        if e.min_rate > e.initial_rate {
            return Err(invalid(format!(
                "exploration.min_rate ({}) exceeds initial_rate ({})",
                e.min_rate, e.initial_rate
            )));
        }
        if let Some(optimism) = e.cold_start_optimism
            && !(optimism.is_finite() && optimism >= 0.0)
        {
            return Err(invalid(format!(
                "exploration.cold_start_optimism must be finite and >= 0, got {optimism}"
            )));
        }

        let a = &self.attribution;
        if !(a.unit_reward.is_finite() && a.unit_reward >= 0.0) {
            return Err(invalid(format!(
                "attribution.unit_reward must be finite and >= 0, got {}",
                a.unit_reward
            )));
        }
        check_unit("attribution.staleness.floor", a.staleness.floor)?;
        match a.staleness.curve {
            StalenessCurve::Exponential { rate } if !(rate.is_finite() && rate >= 0.0) => {
                return Err(invalid(format!(
                    "exponential staleness rate must be finite and >= 0, got {rate}"
                )));
            }
            StalenessCurve::Linear { slope } if !(slope.is_finite() && slope >= 0.0) => {
                return Err(invalid(format!(
                    "linear staleness slope must be finite and >= 0, got {slope}"
                )));
            }
            _ => {}
        }

        let r = &self.ledger.retry;
        if r.max_attempts == 0 {
            return Err(invalid("ledger.retry.max_attempts must be >= 1".into()));
        }
        if !(r.multiplier.is_finite() && r.multiplier >= 1.0) {
            return Err(invalid(format!(
                "ledger.retry.multiplier must be >= 1, got {}",
                r.multiplier
            )));
        }

        if self.sessions.inactivity_minutes == 0 {
            return Err(invalid("sessions.inactivity_minutes must be >= 1".into()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> PersuadeError {
    PersuadeError::InvalidArgument(msg)
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be in [0, 1], got {value}")))
    }
}

/// Epsilon-greedy schedule: `eps_t = max(min_rate, initial_rate * decay^t)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Exploration probability at selection 0.
    pub initial_rate: f64,
    /// Multiplicative decay applied per selection.
    pub decay: f64,
    /// Lower bound for the exploration probability.
    pub min_rate: f64,
    /// Seed for the exploration RNG. Unset means seeded from OS entropy.
    pub seed: Option<u64>,
    /// Success rate assumed for untried strategies. Unset means untried
    /// strategies are always picked before any coin flip.
    pub cold_start_optimism: Option<f64>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            initial_rate: 0.2,
            decay: 0.95,
            min_rate: 0.01,
            seed: None,
            cold_start_optimism: None,
        }
    }
}

/// Which past choices receive credit for a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionPolicy {
    /// Credit only the most recent strategy in the conversation.
    #[default]
    LastTouch,
    /// Split credit uniformly across the distinct strategies used.
    MultiTouch,
}

impl AttributionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastTouch => "last_touch",
            Self::MultiTouch => "multi_touch",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub policy: AttributionPolicy,
    /// Reward mass added to `successes` per conversion.
    pub unit_reward: f64,
    pub staleness: StalenessConfig,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            policy: AttributionPolicy::LastTouch,
            unit_reward: 1.0,
            staleness: StalenessConfig::default(),
        }
    }
}

/// Attenuation of reward mass for choices made many turns before the conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Turns after a choice during which its reward is not attenuated.
    pub grace_turns: u32,
    pub curve: StalenessCurve,
    /// Minimum weight once attenuation applies.
    pub floor: f64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            grace_turns: 3,
            curve: StalenessCurve::default(),
            floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StalenessCurve {
    /// `weight = e^(-rate * turns_over_grace)`
    Exponential { rate: f64 },
    /// `weight = 1 - slope * turns_over_grace`
    Linear { slope: f64 },
}

impl Default for StalenessCurve {
    fn default() -> Self {
        Self::Exponential { rate: 0.2 }
    }
}

/// Backing engine for the performance ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Cozo in-memory engine; nothing survives the process.
    Memory,
    /// Cozo on RocksDB at `ledger.path`.
    #[default]
    Rocksdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub storage: StorageKind,
    pub path: PathBuf,
    pub retry: RetryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("persuade/ledger");
        Self {
            storage: StorageKind::default(),
            path,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for durable reward writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total write attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            multiplier: 2.0,
            max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session may be archived.
    pub inactivity_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_minutes: 24 * 60,
        }
    }
}

impl SessionConfig {
    /// Capped at roughly a century so the conversion never overflows.
    pub fn inactivity(&self) -> chrono::Duration {
        const MAX_MINUTES: u64 = 100 * 365 * 24 * 60;
        chrono::Duration::minutes(self.inactivity_minutes.min(MAX_MINUTES) as i64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextualConfig {
    /// Keep one ledger record per (context bucket, strategy) instead of per strategy.
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersuadeConfig::default();
        assert_eq!(config.exploration.initial_rate, 0.2);
        assert_eq!(config.exploration.decay, 0.95);
        assert_eq!(config.attribution.policy, AttributionPolicy::LastTouch);
        assert_eq!(config.attribution.unit_reward, 1.0);
        assert_eq!(config.ledger.retry.max_attempts, 5);
        assert!(!config.contextual.enabled);
        assert!(config.ledger.path.to_string_lossy().contains("persuade"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [exploration]
            initial_rate = 0.3
            seed = 7

            [attribution]
            policy = "multi_touch"

            [attribution.staleness.curve]
            kind = "linear"
            slope = 0.05
        "#;
        let config = PersuadeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.exploration.initial_rate, 0.3);
        assert_eq!(config.exploration.decay, 0.95);
        assert_eq!(config.exploration.seed, Some(7));
        assert_eq!(config.attribution.policy, AttributionPolicy::MultiTouch);
        assert_eq!(
            config.attribution.staleness.curve,
            StalenessCurve::Linear { slope: 0.05 }
        );
        assert_eq!(config.attribution.staleness.grace_turns, 3);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PersuadeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = PersuadeConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.exploration.min_rate, config.exploration.min_rate);
        assert_eq!(parsed.ledger.storage, config.ledger.storage);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = PersuadeConfig::default();
        config.exploration.initial_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(PersuadeError::InvalidArgument(_))
        ));

        let mut config = PersuadeConfig::default();
        config.exploration.decay = 0.0;
        assert!(config.validate().is_err());

        let mut config = PersuadeConfig::default();
        config.ledger.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PersuadeConfig::default();
        config.attribution.staleness.curve = StalenessCurve::Exponential { rate: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = PersuadeConfig::from_toml_str("[exploration\ninitial_rate = ").unwrap_err();
        assert!(matches!(err, PersuadeError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            PersuadeConfig::load(&path),
            Err(PersuadeError::Config(_))
        ));
        assert!(PersuadeConfig::load_or_default(&path).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ledger]\nstorage = \"memory\"\n").unwrap();
        let config = PersuadeConfig::load(&path).unwrap();
        assert_eq!(config.ledger.storage, StorageKind::Memory);
    }
}
