//! End-to-end pipeline tests against the mock feed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use sharpline::config::AppConfig;
use sharpline::consensus::closing::ResolveSummary;
use sharpline::engine::settlement::SettlementSummary;
use sharpline::engine::{Engine, ProviderFeed};
use sharpline::providers::estimates::{EstimateSource, StaticEstimates};
use sharpline::storage::budget::BudgetLedger;
use sharpline::storage::closing::ClosingStore;
use sharpline::storage::picks::PickStore;
use sharpline::storage::Database;
use sharpline::strategy::gates::ReasonCode;
use sharpline::strategy::{DecisionLog, DecisionRecord};
use sharpline::types::{
    FinalScore, MarketKey, MarketKind, MarketOutcome, ModelEstimate, PickOutcome, PickStatus,
};

use crate::mock_provider::{lakers_celtics, MockFeed};

const GAME: &str = "nba-lal-bos";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn pregame() -> DateTime<Utc> {
    start() - Duration::hours(3)
}

fn config(limit: u32) -> AppConfig {
    AppConfig::from_toml(&format!(
        r#"
        [agent]
        name = "SHARPLINE-IT"
        ingest_interval_secs = 900
        settle_interval_secs = 1800

        [database]
        url = "sqlite::memory:"

        [budget]
        default_daily_limit = {limit}

        [ingest]
        max_attempts = 2
        base_backoff_ms = 1
        max_backoff_ms = 2
        request_timeout_secs = 5
        dedup_window_secs = 300
        max_clock_skew_secs = 120

        [settlement]
        timezone = "America/New_York"
        "#
    ))
    .unwrap()
}

fn estimate(game_id: &str, selection: &str, probability: f64) -> ModelEstimate {
    ModelEstimate {
        game_id: game_id.into(),
        market: MarketKind::Spread,
        selection: selection.into(),
        probability,
        stats_updated_at: Some(pregame() - Duration::hours(2)),
        sample_size: 40,
    }
}

struct Harness {
    engine: Engine,
    feed: Arc<MockFeed>,
    ledger: BudgetLedger,
    picks: PickStore,
    closing: ClosingStore,
}

fn harness(db: Database, limit: u32, estimates: Vec<ModelEstimate>) -> Harness {
    let cfg = config(limit);
    let feed = Arc::new(MockFeed::new("mockfeed", lakers_celtics(start(), pregame())));
    let feeds = vec![ProviderFeed {
        provider: feed.clone(),
        sports: vec!["basketball_nba".into()],
        markets: MarketKind::ALL.to_vec(),
    }];
    let source: Arc<dyn EstimateSource> = Arc::new(StaticEstimates(estimates));
    let engine = Engine::new(db.clone(), &cfg, feeds, Some(source), DecisionLog::default()).unwrap();
    Harness {
        engine,
        feed,
        ledger: BudgetLedger::new(db.clone(), cfg.budget.clone(), cfg.settlement.tz().unwrap()),
        picks: PickStore::new(db.clone()),
        closing: ClosingStore::new(db),
    }
}

async fn calls_made(h: &Harness, now: DateTime<Utc>) -> i64 {
    h.ledger
        .usage(h.ledger.day_for(now))
        .await
        .unwrap()
        .iter()
        .map(|u| u.calls_made)
        .sum()
}

#[tokio::test]
async fn test_full_pipeline_ingest_close_gate_settle() {
    let db = Database::in_memory().await.unwrap();
    let h = harness(
        db,
        5,
        vec![
            estimate(GAME, "Lakers", 0.60),
            estimate(GAME, "Celtics", 0.45),
            estimate("nba-unknown", "Knicks", 0.70),
        ],
    );

    // -- Ingest --------------------------------------------------------------
    let outcomes = h.engine.ingest_cycle(pregame()).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].fetched, 17);
    assert_eq!(outcomes[0].stored, 16);
    assert_eq!(outcomes[0].rejected, 1);

    // Nothing has started yet.
    let closing = h.engine.close_cycle(pregame()).await.unwrap();
    assert_eq!(closing.resolved + closing.unavailable, 0);

    // -- Gate ----------------------------------------------------------------
    let report = h.engine.strategy_cycle(pregame()).await.unwrap();
    assert_eq!(report.evaluated, 3);
    assert_eq!(report.selected, 1);
    assert_eq!(report.recorded, 1);

    let decisions = h.engine.decisions().recent(10).await;
    assert_eq!(decisions.len(), 3);
    let unknown = decisions
        .iter()
        .find(|d| d.decision().key.game_id == "nba-unknown")
        .unwrap();
    assert!(matches!(unknown, DecisionRecord::GateRejected { .. }));
    assert!(unknown.decision().codes().contains(&ReasonCode::NoOddsRecent));
    assert!(unknown.decision().codes().contains(&ReasonCode::MissingCommenceTime));

    // A second pass does not duplicate the open pick.
    let again = h.engine.strategy_cycle(pregame()).await.unwrap();
    assert_eq!(again.recorded, 0);
    assert_eq!(again.already_open, 1);

    let picks = h.picks.recent(10).await.unwrap();
    assert_eq!(picks.len(), 1);
    let pick = &picks[0];
    assert_eq!(pick.key, MarketKey::new(GAME, MarketKind::Spread, "Lakers"));
    // The outlier book is ignored.
    assert_eq!(pick.entry_line, Some(-3.5));
    assert_eq!(pick.stake_units, dec!(3.00));

    // -- Settle --------------------------------------------------------------
    h.feed.set_scores(vec![FinalScore {
        game_id: GAME.into(),
        home_score: 110,
        away_score: 104,
    }]);
    let after = start() + Duration::hours(3);
    let settle = h.engine.settle_cycle(after).await.unwrap();
    assert_eq!(settle.scores_recorded, 1);
    assert_eq!(settle.closing.resolved, 5);
    assert_eq!(settle.closing.unavailable, 1);
    assert_eq!(settle.settlement.results, 6);
    assert_eq!(settle.settlement.no_market, 1);
    assert_eq!(settle.settlement.picks_settled, 1);

    let results = h.closing.results_for_game(GAME).await.unwrap();
    let outcome_of = |market: MarketKind, side: &str| {
        results
            .iter()
            .find(|r| r.key == MarketKey::new(GAME, market, side))
            .map(|r| r.outcome)
    };
    assert_eq!(outcome_of(MarketKind::Spread, "Lakers"), Some(MarketOutcome::Cover));
    assert_eq!(outcome_of(MarketKind::Spread, "Celtics"), Some(MarketOutcome::Miss));
    assert_eq!(outcome_of(MarketKind::Total, "over"), Some(MarketOutcome::Under));
    assert_eq!(outcome_of(MarketKind::Total, "under"), Some(MarketOutcome::NoMarket));
    assert_eq!(outcome_of(MarketKind::Moneyline, "Lakers"), Some(MarketOutcome::Won));

    let result = h.picks.result(&pick.id).await.unwrap().unwrap();
    assert_eq!(result.outcome, PickOutcome::Win);
    assert_eq!(result.profit_units, dec!(2.73));
    assert_eq!(result.closing_line, Some(-3.5));
    assert_eq!(result.clv_points, Some(0.0));
    assert_eq!(h.picks.get(&pick.id).await.unwrap().unwrap().status, PickStatus::Settled);

    // -- Re-run: nothing left to do, no new provider calls ---------------------
    let rerun = h.engine.settle_cycle(after + Duration::hours(1)).await.unwrap();
    assert_eq!(rerun.scores_recorded, 0);
    assert_eq!(rerun.closing, ResolveSummary::default());
    assert_eq!(rerun.settlement, SettlementSummary::default());
    assert_eq!(h.picks.result_count().await.unwrap(), 1);
    assert_eq!(h.picks.result(&pick.id).await.unwrap().unwrap(), result);
    assert_eq!(h.feed.score_calls(), 1);

    let perf = h.picks.performance().await.unwrap();
    assert_eq!(perf.wins, 1);
    assert_eq!(perf.profit_units, dec!(2.73));

    assert_eq!(calls_made(&h, after).await, 2);
}

#[tokio::test]
async fn test_exhausted_budget_serves_cache() {
    let db = Database::in_memory().await.unwrap();
    let h = harness(db, 1, Vec::new());

    let first = h.engine.ingest_cycle(pregame()).await;
    assert!(!first[0].budget_exhausted);

    let second = h.engine.ingest_cycle(pregame() + Duration::minutes(15)).await;
    assert!(second[0].budget_exhausted);
    assert_eq!(second[0].fetched, 0);
    assert_eq!(second[0].from_cache, 16);

    assert_eq!(h.feed.odds_calls(), 1);
    assert_eq!(calls_made(&h, pregame()).await, 1);
}

#[tokio::test]
async fn test_unreachable_feed_spends_no_budget() {
    let db = Database::in_memory().await.unwrap();
    let h = harness(db, 3, Vec::new());
    h.feed.set_unreachable("connection refused");

    let outcomes = h.engine.ingest_cycle(pregame()).await;
    assert!(outcomes[0].provider_failed);
    assert!(!outcomes[0].budget_exhausted);

    // Both attempts reached the mock, neither reached the network.
    assert_eq!(h.feed.odds_calls(), 2);
    assert_eq!(calls_made(&h, pregame()).await, 0);
}

#[tokio::test]
async fn test_concurrent_ingest_never_exceeds_budget() {
    let mut path = std::env::temp_dir();
    path.push(format!("sharpline_it_{}.db", uuid::Uuid::new_v4()));
    let db = Database::connect(&format!("sqlite://{}", path.display()), 4)
        .await
        .unwrap();
    let h = harness(db, 5, Vec::new());

    let runs = (0..12).map(|_| h.engine.ingest_cycle(pregame()));
    let outcomes: Vec<_> = futures::future::join_all(runs)
        .await
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(outcomes.len(), 12);
    assert_eq!(outcomes.iter().filter(|o| o.budget_exhausted).count(), 7);
    assert_eq!(h.feed.odds_calls(), 5);
    assert_eq!(calls_made(&h, pregame()).await, 5);
    // Every stored quote is unique despite the concurrent writers.
    assert_eq!(outcomes.iter().map(|o| o.stored).sum::<usize>(), 16);

    let _ = std::fs::remove_file(&path);
}
