//! Budget-gated ingestion.
//!
//! Every provider call goes through `BudgetLedger::try_reserve` first. A
//! reserved slot is committed when the request reached the provider (even if
//! it then failed) and released when it never left the process. Retries use
//! capped exponential backoff and each attempt takes its own slot. When the
//! budget is spent or the provider stays down, the stored quotes of upcoming
//! games are served instead.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, SourcesConfig};
use crate::providers::{FetchRequest, OddsProvider, ProviderError, RawPrice, RawQuote};
use crate::storage::budget::BudgetLedger;
use crate::storage::games::GameStore;
use crate::storage::quotes::QuoteStore;
use crate::strategy::odds::american_to_decimal;
use crate::types::{MarketKey, MarketKind, Quote, SharplineError, TotalSide};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one budgeted provider call (retries included).
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Fetched(T),
    /// No slot left today; nothing was sent.
    BudgetExhausted,
    /// Every attempt failed.
    Failed(ProviderError),
}

/// What one odds ingestion did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub provider: String,
    pub sport: String,
    pub games: usize,
    pub fetched: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Quotes dropped by the source allow-list.
    pub filtered: usize,
    /// Cached quotes served instead of a live fetch.
    pub from_cache: usize,
    pub budget_exhausted: bool,
    pub provider_failed: bool,
}

/// What one score ingestion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoresOutcome {
    pub received: usize,
    pub recorded: usize,
    pub skipped: bool,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Validate and normalize one raw quote.
///
/// Returns `Ok(None)` for sources outside the allow-list and
/// `MalformedQuote` for anything that cannot be stored.
pub fn normalize(
    raw: &RawQuote,
    sources: &SourcesConfig,
    now: DateTime<Utc>,
    max_skew: ChronoDuration,
) -> Result<Option<Quote>, SharplineError> {
    let malformed = |msg: String| SharplineError::MalformedQuote(msg);

    if raw.game_id.trim().is_empty() || raw.source.trim().is_empty() || raw.side.trim().is_empty() {
        return Err(malformed(format!("missing identity fields: {raw:?}")));
    }
    if !sources.is_allowed(&raw.source) {
        return Ok(None);
    }

    let market: MarketKind = raw.market.parse()?;
    if market == MarketKind::Total && TotalSide::parse(&raw.side).is_none() {
        return Err(malformed(format!("total side must be over/under, got {}", raw.side)));
    }

    let price = match raw.price {
        RawPrice::Decimal(p) => p,
        RawPrice::American(a) => american_to_decimal(a).map_err(|e| malformed(e.to_string()))?,
    };
    if !price.is_finite() || price <= 1.0 {
        return Err(malformed(format!("price must be > 1, got {price}")));
    }

    let line = if market.has_line() {
        match raw.line {
            Some(l) if l.is_finite() => Some(l),
            Some(l) => return Err(malformed(format!("non-finite line {l}"))),
            None => return Err(malformed(format!("{market} quote without a line"))),
        }
    } else {
        None
    };

    let observed_at = raw.observed_at.unwrap_or(now);
    if observed_at > now + max_skew {
        return Err(malformed(format!(
            "observed_at {} is in the future",
            observed_at.to_rfc3339()
        )));
    }

    let key = MarketKey::new(raw.game_id.trim(), market, raw.side.as_str());
    Ok(Some(Quote::new(&key, raw.source.trim(), line, price, observed_at)))
}

/// Capped exponential delay before retry `attempt` (1-based).
pub fn backoff_delay(config: &IngestConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
        config
            .base_backoff_ms
            .saturating_mul(factor)
            .min(config.max_backoff_ms),
    )
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Ingestor {
    ledger: BudgetLedger,
    quotes: QuoteStore,
    games: GameStore,
    sources: SourcesConfig,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        ledger: BudgetLedger,
        quotes: QuoteStore,
        games: GameStore,
        sources: SourcesConfig,
        config: IngestConfig,
    ) -> Self {
        Self {
            ledger,
            quotes,
            games,
            sources,
            config,
        }
    }

    /// Run `call` under the budget, retrying retryable failures.
    pub async fn budgeted<T, F, Fut>(&self, provider: &str, now: DateTime<Utc>, call: F) -> FetchOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let day = self.ledger.day_for(now);
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(&self.config, attempt);
                debug!(provider, attempt, delay_ms = delay.as_millis() as u64, "Retrying provider call");
                tokio::time::sleep(delay).await;
            }

            let reservation = self.ledger.try_reserve(provider, day).await;
            if !reservation.allowed {
                return match last_error {
                    Some(e) => FetchOutcome::Failed(e),
                    None => FetchOutcome::BudgetExhausted,
                };
            }

            let result = call().await;
            let spent = match &result {
                Ok(_) => true,
                Err(e) => e.reached_network(),
            };
            let settle = if spent {
                self.ledger.commit(provider, day).await
            } else {
                self.ledger.release(provider, day).await
            };
            if let Err(e) = settle {
                warn!(provider, error = %e, "Failed to settle budget reservation");
            }

            match result {
                Ok(value) => return FetchOutcome::Fetched(value),
                Err(e) if e.is_retryable() => {
                    warn!(provider, attempt, error = %e, "Retryable provider error");
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(provider, attempt, error = %e, "Provider call failed");
                    return FetchOutcome::Failed(e);
                }
            }
        }

        match last_error {
            Some(e) => FetchOutcome::Failed(e),
            None => FetchOutcome::BudgetExhausted,
        }
    }

    /// Fetch odds for one sport and record them. Falls back to cached quotes
    /// when no live fetch happens.
    pub async fn ingest_odds(
        &self,
        provider: &dyn OddsProvider,
        request: &FetchRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let name = provider.name();
        let mut outcome = IngestOutcome {
            provider: name.to_string(),
            sport: request.sport.clone(),
            ..Default::default()
        };

        let snapshot = match self.budgeted(name, now, || provider.fetch_odds(request)).await {
            FetchOutcome::Fetched(snapshot) => snapshot,
            FetchOutcome::BudgetExhausted => {
                outcome.budget_exhausted = true;
                outcome.from_cache = self.quotes.cached_count(now).await? as usize;
                let err = SharplineError::BudgetExhausted {
                    provider: name.to_string(),
                    day: self.ledger.day_for(now).to_string(),
                };
                info!(sport = %request.sport, cached = outcome.from_cache, reason = %err, "Serving cached quotes");
                return Ok(outcome);
            }
            FetchOutcome::Failed(e) => {
                outcome.provider_failed = true;
                outcome.from_cache = self.quotes.cached_count(now).await? as usize;
                let err = SharplineError::ProviderUnavailable {
                    provider: name.to_string(),
                    message: e.to_string(),
                };
                warn!(sport = %request.sport, cached = outcome.from_cache, error = %err, "Serving cached quotes");
                return Ok(outcome);
            }
        };

        for game in &snapshot.games {
            self.games.upsert(game).await?;
        }
        outcome.games = snapshot.games.len();
        outcome.fetched = snapshot.quotes.len();

        let max_skew = ChronoDuration::seconds(self.config.max_clock_skew_secs);
        let mut accepted = Vec::with_capacity(snapshot.quotes.len());
        for raw in &snapshot.quotes {
            match normalize(raw, &self.sources, now, max_skew) {
                Ok(Some(quote)) => accepted.push(quote),
                Ok(None) => outcome.filtered += 1,
                Err(e) => {
                    warn!(provider = name, source = %raw.source, game_id = %raw.game_id, error = %e, "Rejected quote");
                    outcome.rejected += 1;
                }
            }
        }

        let summary = self.quotes.insert_batch(&accepted).await?;
        outcome.stored = summary.stored;
        outcome.duplicates = summary.duplicates;

        info!(
            provider = name,
            sport = %request.sport,
            games = outcome.games,
            fetched = outcome.fetched,
            stored = outcome.stored,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected,
            "Odds ingested"
        );
        Ok(outcome)
    }

    /// Fetch final scores, but only while some started game still lacks one.
    pub async fn ingest_scores(
        &self,
        provider: &dyn OddsProvider,
        request: &FetchRequest,
        now: DateTime<Utc>,
    ) -> Result<ScoresOutcome> {
        if self.games.awaiting_scores(now).await? == 0 {
            return Ok(ScoresOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        let name = provider.name();
        let scores = match self.budgeted(name, now, || provider.fetch_scores(request)).await {
            FetchOutcome::Fetched(scores) => scores,
            FetchOutcome::BudgetExhausted => {
                info!(provider = name, "Budget exhausted, score fetch skipped");
                return Ok(ScoresOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
            FetchOutcome::Failed(e) => {
                warn!(provider = name, error = %e, "Score fetch failed");
                return Ok(ScoresOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        let mut outcome = ScoresOutcome {
            received: scores.len(),
            ..Default::default()
        };
        for score in &scores {
            if self.games.record_final_score(score).await? {
                outcome.recorded += 1;
            }
        }
        if outcome.recorded > 0 {
            info!(provider = name, recorded = outcome.recorded, "Final scores recorded");
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
