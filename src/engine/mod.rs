//! Core engine: the ingest → close → strategy → settle cycles.
//!
//! Each cycle is an idempotent batch pass that can run on its own schedule.
//! The binary drives them from a `tokio::select!` loop; integration tests
//! call them directly with a fixed clock.

pub mod ingest;
pub mod settlement;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::consensus::closing::{ClosingLineResolver, ResolveSummary};
use crate::consensus::fresh_consensus_at;
use crate::providers::estimates::EstimateSource;
use crate::providers::{FetchRequest, OddsProvider};
use crate::storage::budget::BudgetLedger;
use crate::storage::closing::ClosingStore;
use crate::storage::games::GameStore;
use crate::storage::picks::PickStore;
use crate::storage::quotes::QuoteStore;
use crate::storage::Database;
use crate::strategy::gates::GatePolicy;
use crate::strategy::kelly::KellyCalculator;
use crate::strategy::{DecisionLog, StrategyInput, StrategyOrchestrator};
use crate::types::MarketKind;
use ingest::{IngestOutcome, Ingestor};
use settlement::{SettlementEngine, SettlementSummary};

/// One odds feed and what to ask it for.
#[derive(Clone)]
pub struct ProviderFeed {
    pub provider: Arc<dyn OddsProvider>,
    pub sports: Vec<String>,
    pub markets: Vec<MarketKind>,
}

impl ProviderFeed {
    fn requests(&self) -> impl Iterator<Item = FetchRequest> + '_ {
        self.sports.iter().map(|sport| FetchRequest {
            sport: sport.clone(),
            markets: self.markets.clone(),
        })
    }
}

/// What one strategy pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyReport {
    pub evaluated: usize,
    pub selected: usize,
    pub recorded: usize,
    /// Selected, but an OPEN pick already exists for the key.
    pub already_open: usize,
}

/// What one settle cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub scores_recorded: usize,
    pub closing: ResolveSummary,
    pub settlement: SettlementSummary,
}

pub struct Engine {
    feeds: Vec<ProviderFeed>,
    estimates: Option<Arc<dyn EstimateSource>>,
    ingestor: Ingestor,
    resolver: ClosingLineResolver,
    settlement: SettlementEngine,
    orchestrator: StrategyOrchestrator,
    decisions: DecisionLog,
    quotes: QuoteStore,
    games: GameStore,
    picks: PickStore,
    record_picks: bool,
}

impl Engine {
    pub fn new(
        db: Database,
        config: &AppConfig,
        feeds: Vec<ProviderFeed>,
        estimates: Option<Arc<dyn EstimateSource>>,
        decisions: DecisionLog,
    ) -> Result<Self> {
        let tz = config.settlement.tz()?;
        let quotes = QuoteStore::new(
            db.clone(),
            chrono::Duration::seconds(config.ingest.dedup_window_secs),
        );
        let games = GameStore::new(db.clone());
        let closing = ClosingStore::new(db.clone());
        let picks = PickStore::new(db.clone());
        let ledger = BudgetLedger::new(db, config.budget.clone(), tz);

        Ok(Self {
            feeds,
            estimates,
            ingestor: Ingestor::new(
                ledger,
                quotes.clone(),
                games.clone(),
                config.sources.clone(),
                config.ingest.clone(),
            ),
            resolver: ClosingLineResolver::new(quotes.clone(), closing.clone()),
            settlement: SettlementEngine::new(games.clone(), closing, picks.clone()),
            orchestrator: StrategyOrchestrator::new(
                GatePolicy::from_config(&config.gates, &config.staking),
                KellyCalculator::new(config.staking.clone()),
            ),
            decisions,
            quotes,
            games,
            picks,
            record_picks: config.staking.record_picks,
        })
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    /// Fetch odds from every feed. A failing feed is logged and skipped.
    pub async fn ingest_cycle(&self, now: DateTime<Utc>) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::new();
        for feed in &self.feeds {
            for request in feed.requests() {
                match self.ingestor.ingest_odds(feed.provider.as_ref(), &request, now).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => error!(
                        provider = feed.provider.name(),
                        sport = %request.sport,
                        error = %e,
                        "Ingestion failed"
                    ),
                }
            }
        }
        outcomes
    }

    /// Persist closing lines for every started game not closed yet. A game
    /// is visited once; after that its closing lines are final.
    pub async fn close_cycle(&self, now: DateTime<Utc>) -> Result<ResolveSummary> {
        let mut total = ResolveSummary::default();
        for game in self.games.awaiting_close(now).await? {
            let s = self.resolver.resolve_game(&game, now).await?;
            total.resolved += s.resolved;
            total.unavailable += s.unavailable;
            total.already_closed += s.already_closed;
            self.games.mark_closed(&game.game_id, now).await?;
        }
        Ok(total)
    }

    /// Evaluate every external estimate against the live consensus and
    /// record the selected picks. Sources with no quote inside the gate's
    /// recency window are left out of the consensus.
    pub async fn strategy_cycle(&self, now: DateTime<Utc>) -> Result<StrategyReport> {
        let Some(source) = &self.estimates else {
            debug!("No estimate source configured, strategy pass skipped");
            return Ok(StrategyReport::default());
        };

        let max_quote_age = self.orchestrator.policy().max_quote_age;
        let mut inputs = Vec::new();
        for estimate in source.estimates().await? {
            let key = estimate.key();
            let commence_time = self
                .games
                .get(&key.game_id)
                .await?
                .and_then(|g| g.commence_time);
            let consensus = fresh_consensus_at(&self.quotes, &key, now, max_quote_age).await?;
            inputs.push(StrategyInput {
                estimate,
                consensus,
                commence_time,
            });
        }

        let (bets, decisions) = self.orchestrator.select_bets(&inputs, now);
        let mut report = StrategyReport {
            evaluated: inputs.len(),
            selected: bets.len(),
            ..Default::default()
        };

        if self.record_picks {
            for pick in StrategyOrchestrator::to_picks(&bets, &decisions, now) {
                if self.picks.has_open(&pick.key).await? {
                    report.already_open += 1;
                    continue;
                }
                self.picks.insert(&pick).await?;
                info!(pick = %pick, "Pick recorded");
                report.recorded += 1;
            }
        }
        self.decisions.extend(decisions).await;
        Ok(report)
    }

    /// Fetch final scores, make sure closing lines exist, then settle.
    pub async fn settle_cycle(&self, now: DateTime<Utc>) -> Result<SettleReport> {
        let mut report = SettleReport::default();
        for feed in &self.feeds {
            for request in feed.requests() {
                match self.ingestor.ingest_scores(feed.provider.as_ref(), &request, now).await {
                    Ok(outcome) => report.scores_recorded += outcome.recorded,
                    Err(e) => error!(
                        provider = feed.provider.name(),
                        sport = %request.sport,
                        error = %e,
                        "Score ingestion failed"
                    ),
                }
            }
        }

        report.closing = self.close_cycle(now).await?;
        report.settlement = self.settlement.settle_completed(now).await?;
        Ok(report)
    }
}
