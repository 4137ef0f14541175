//! SHARPLINE: Betting-market consensus, gating and settlement engine
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the database and runs the independent ingest and settle cycles with
//! graceful shutdown.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use sharpline::config::{AppConfig, ProviderConfig};
use sharpline::dashboard::{self, routes::DashboardState};
use sharpline::engine::{Engine, ProviderFeed};
use sharpline::providers::estimates::{EstimateSource, FileEstimates};
use sharpline::providers::http::HttpOddsProvider;
use sharpline::storage::budget::BudgetLedger;
use sharpline::storage::Database;
use sharpline::strategy::DecisionLog;

const BANNER: &str = r#"
 ____  _   _    _    ____  ____  _     ___ _   _ _____
/ ___|| | | |  / \  |  _ \|  _ \| |   |_ _| \ | | ____|
\___ \| |_| | / _ \ | |_) | |_) | |    | ||  \| |  _|
 ___) |  _  |/ ___ \|  _ <|  __/| |___ | || |\  | |___
|____/|_| |_/_/   \_\_| \_\_|   |_____|___|_| \_|_____|

  Consensus lines, quality gates, closing-line settlement
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("SHARPLINE_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        ingest_interval_secs = cfg.agent.ingest_interval_secs,
        settle_interval_secs = cfg.agent.settle_interval_secs,
        timezone = %cfg.settlement.timezone,
        "SHARPLINE starting up"
    );

    // -- Initialise components -------------------------------------------

    let db = Database::connect(&cfg.database.url, cfg.database.max_connections).await?;
    let feeds = build_feeds(&cfg)?;
    if feeds.is_empty() {
        warn!("No enabled providers configured — running on stored quotes only");
    }

    let estimates: Option<Arc<dyn EstimateSource>> = cfg
        .estimates
        .path
        .as_ref()
        .map(|p| Arc::new(FileEstimates::new(p)) as Arc<dyn EstimateSource>);
    if estimates.is_none() {
        warn!("No estimates file configured — strategy pass disabled");
    }

    let decisions = DecisionLog::default();
    let engine = Engine::new(db.clone(), &cfg, feeds, estimates, decisions.clone())?;

    if cfg.dashboard.enabled {
        let ledger = BudgetLedger::new(db.clone(), cfg.budget.clone(), cfg.settlement.tz()?);
        let state = DashboardState::new(
            db.clone(),
            chrono::Duration::seconds(cfg.ingest.dedup_window_secs),
            ledger,
            decisions,
        );
        dashboard::spawn_dashboard(Arc::new(state), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let mut ingest_tick = tokio::time::interval(Duration::from_secs(cfg.agent.ingest_interval_secs.max(1)));
    let mut settle_tick = tokio::time::interval(Duration::from_secs(cfg.agent.settle_interval_secs.max(1)));
    ingest_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    settle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = ingest_tick.tick() => run_ingest(&engine).await,
            _ = settle_tick.tick() => run_settle(&engine).await,
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("SHARPLINE shut down cleanly.");
    Ok(())
}

/// Ingest odds, then evaluate the estimates against the fresh consensus.
async fn run_ingest(engine: &Engine) {
    let now = Utc::now();
    let outcomes = engine.ingest_cycle(now).await;
    info!(
        feeds = outcomes.len(),
        stored = outcomes.iter().map(|o| o.stored).sum::<usize>(),
        duplicates = outcomes.iter().map(|o| o.duplicates).sum::<usize>(),
        rejected = outcomes.iter().map(|o| o.rejected).sum::<usize>(),
        exhausted = outcomes.iter().filter(|o| o.budget_exhausted).count(),
        "Ingest cycle complete"
    );

    match engine.strategy_cycle(now).await {
        Ok(report) => info!(
            evaluated = report.evaluated,
            selected = report.selected,
            recorded = report.recorded,
            "Strategy cycle complete"
        ),
        Err(e) => error!(error = %e, "Strategy cycle failed — continuing to next"),
    }
}

/// Record scores, close started games and settle finished ones.
async fn run_settle(engine: &Engine) {
    match engine.settle_cycle(Utc::now()).await {
        Ok(report) => info!(
            scores = report.scores_recorded,
            closing_resolved = report.closing.resolved,
            closing_unavailable = report.closing.unavailable,
            games_settled = report.settlement.games,
            picks_settled = report.settlement.picks_settled,
            picks_pending = report.settlement.picks_pending,
            "Settle cycle complete"
        ),
        Err(e) => error!(error = %e, "Settle cycle failed — continuing to next"),
    }
}

/// Build one HTTP feed per enabled provider. A missing API key is logged
/// and the provider runs keyless.
fn build_feeds(cfg: &AppConfig) -> Result<Vec<ProviderFeed>> {
    cfg.providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| build_feed(cfg, p))
        .collect()
}

fn build_feed(cfg: &AppConfig, p: &ProviderConfig) -> Result<ProviderFeed> {
    let api_key = match p.api_key_env.as_deref() {
        Some(env) => match AppConfig::resolve_env(env) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(provider = %p.name, error = %e, "Provider API key missing");
                None
            }
        },
        None => None,
    };
    let client = HttpOddsProvider::new(&p.name, &p.base_url, api_key, cfg.ingest.request_timeout())?;
    info!(provider = %p.name, sports = ?p.sports, "Provider enabled");
    Ok(ProviderFeed {
        provider: Arc::new(client),
        sports: p.sports.clone(),
        markets: p.markets.clone(),
    })
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sharpline=info"));

    let json_logging = std::env::var("SHARPLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
