//! Identifier and context types shared by the tracker, selector and ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PersuadeError, Result};

/// Longest conversation identifier accepted from the transport layer.
pub const MAX_CONVERSATION_ID_LEN: usize = 128;

/// Opaque conversation identifier supplied by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a conversation ID without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a conversation ID, rejecting empty, oversized or control-character ids.
    pub fn parse(id: &str) -> Result<Self> {
        let id = Self::new(id);
        id.validate()?;
        Ok(id)
    }

    /// Check that this identifier is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(PersuadeError::InvalidArgument(
                "conversation id must not be empty".into(),
            ));
        }
        if self.0.len() > MAX_CONVERSATION_ID_LEN {
            return Err(PersuadeError::InvalidArgument(format!(
                "conversation id longer than {MAX_CONVERSATION_ID_LEN} bytes"
            )));
        }
        if self.0.chars().any(char::is_control) {
            return Err(PersuadeError::InvalidArgument(
                "conversation id contains control characters".into(),
            ));
        }
        Ok(())
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a business outcome (payment id, order number, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomeId(String);

impl OutcomeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OutcomeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OutcomeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time-ordered identifier for a single strategy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChoiceId(Uuid);

impl ChoiceId {
    /// Create a new time-ordered choice ID using UUIDv7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChoiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key for a reward application.
///
/// Derived from the attributing conversation and the outcome id, so a
/// retried notification maps to the same key. The conversation part is
/// length-prefixed, so ids containing the separator cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RewardKey(String);

impl RewardKey {
    #[must_use]
    pub fn for_outcome(conversation_id: &ConversationId, outcome_id: &OutcomeId) -> Self {
        Self(format!(
            "{}:{conversation_id}#{outcome_id}",
            conversation_id.as_str().len()
        ))
    }

    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RewardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A realized conversion reported by the business collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub outcome_id: OutcomeId,
    /// Transaction value; must be non-negative.
    pub revenue: f64,
    pub occurred_at: DateTime<Utc>,
}

impl ConversionOutcome {
    pub fn new(outcome_id: impl Into<OutcomeId>, revenue: f64) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            revenue,
            occurred_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.revenue.is_finite() || self.revenue < 0.0 {
            return Err(PersuadeError::InvalidArgument(format!(
                "revenue must be a finite value >= 0, got {}",
                self.revenue
            )));
        }
        if self.outcome_id.as_str().trim().is_empty() {
            return Err(PersuadeError::InvalidArgument(
                "outcome id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Per-turn observation features produced by the classification collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    /// Detected customer intent (e.g. "price_inquiry").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Sentiment score in [-1, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ContextFeatures {
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    #[must_use]
    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(sentiment) = self.sentiment
            && !(-1.0..=1.0).contains(&sentiment)
        {
            return Err(PersuadeError::InvalidArgument(format!(
                "sentiment must be within [-1, 1], got {sentiment}"
            )));
        }
        Ok(())
    }
}

/// Sentiment band used when bucketing contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentBand {
    Negative,
    Neutral,
    Positive,
    Unknown,
}

impl SentimentBand {
    /// Scores at or beyond this magnitude leave the neutral band.
    pub const THRESHOLD: f64 = 0.25;

    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            None => Self::Unknown,
            Some(s) if s <= -Self::THRESHOLD => Self::Negative,
            Some(s) if s >= Self::THRESHOLD => Self::Positive,
            Some(_) => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
            Self::Unknown => "unknown",
        }
    }
}

/// Partition of the ledger used by the contextual extension.
///
/// The non-contextual baseline keeps every record in [`ContextBucket::global`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextBucket(String);

impl ContextBucket {
    pub const GLOBAL: &'static str = "global";

    #[must_use]
    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Bucket a turn by intent and sentiment band, e.g. `price_inquiry/negative`.
    #[must_use]
    pub fn from_features(features: &ContextFeatures) -> Self {
        let intent = features
            .intent
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "any".to_string());
        let band = SentimentBand::from_score(features.sentiment);
        Self(format!("{intent}/{}", band.as_str()))
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextBucket {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Display for ContextBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
