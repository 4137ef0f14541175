//! Odds and score providers.
//!
//! Defines the `OddsProvider` trait (the budgeted "fetch now" contract),
//! the raw payload types providers hand back before validation, and the
//! sources of external win-probability estimates.
//!
//! - `http`: JSON-over-HTTP odds feed
//! - `estimates`: model probability files

pub mod estimates;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{FinalScore, Game, MarketKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Provider call failures. `Unreachable` is the only variant for which no
/// request left the process, so it is the only one that spends no budget.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the request reached the provider (and therefore counts
    /// against the daily budget).
    pub fn reached_network(&self) -> bool {
        !matches!(self, ProviderError::Unreachable(_))
    }

    /// Rate limits, server errors and transport failures are worth retrying;
    /// client errors and undecodable payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Upstream { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Decode(_) => false,
            ProviderError::Unreachable(_)
            | ProviderError::Timeout(_)
            | ProviderError::Transport(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Price as the provider quoted it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawPrice {
    Decimal(f64),
    American(f64),
}

/// One unvalidated quote straight from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub game_id: String,
    /// Bookmaker the quote came from.
    pub source: String,
    /// Market name as the provider spells it (`h2h`, `spreads`, ...).
    pub market: String,
    pub side: String,
    pub line: Option<f64>,
    pub price: RawPrice,
    /// Provider timestamp; ingestion time is used when absent.
    pub observed_at: Option<DateTime<Utc>>,
}

/// Everything one odds call returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSnapshot {
    pub games: Vec<Game>,
    pub quotes: Vec<RawQuote>,
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub sport: String,
    pub markets: Vec<MarketKind>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over odds feeds. Every call is one budgeted request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Fetch current games and quotes for one sport.
    async fn fetch_odds(&self, request: &FetchRequest) -> Result<ProviderSnapshot, ProviderError>;

    /// Fetch final scores of recently completed games.
    async fn fetch_scores(&self, request: &FetchRequest) -> Result<Vec<FinalScore>, ProviderError>;

    /// Provider name, used as the budget ledger key.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
