//! The closed set of persuasion strategies the selector chooses from.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PersuadeError;

/// A persuasion approach used to render one outbound turn.
///
/// Adding a strategy is a schema change: the ledger stores records keyed by
/// [`Strategy::as_str`], and [`Strategy::all`] fixes enumeration order for
/// tie-breaking and cold start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ask questions, diagnose the need, recommend.
    Consultive,
    /// Limited stock or time-boxed offers.
    Scarcity,
    /// Appeal to aspirations and feelings.
    Emotional,
    /// Facts, specs and price comparisons.
    Rational,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consultive => "consultive",
            Self::Scarcity => "scarcity",
            Self::Emotional => "emotional",
            Self::Rational => "rational",
        }
    }

    /// All strategies in stable enumeration order
    pub fn all() -> &'static [Strategy] {
        &[
            Self::Consultive,
            Self::Scarcity,
            Self::Emotional,
            Self::Rational,
        ]
    }

    /// Position in [`Strategy::all`]
    pub fn index(&self) -> usize {
        match self {
            Self::Consultive => 0,
            Self::Scarcity => 1,
            Self::Emotional => 2,
            Self::Rational => 3,
        }
    }
}

impl FromStr for Strategy {
    type Err = PersuadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "consultive" | "consultivo" => Ok(Self::Consultive),
            "scarcity" | "escassez" => Ok(Self::Scarcity),
            "emotional" | "emocional" => Ok(Self::Emotional),
            "rational" | "racional" => Ok(Self::Rational),
            _ => Err(PersuadeError::InvalidArgument(format!(
                "unknown strategy: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
