//! Read-only API route handlers.
//!
//! All endpoints return JSON and never write. State is shared via
//! `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::consensus::consensus_at;
use crate::storage::budget::{BudgetLedger, BudgetUsage};
use crate::storage::closing::ClosingStore;
use crate::storage::picks::{PerformanceSummary, PickStore};
use crate::storage::quotes::QuoteStore;
use crate::storage::Database;
use crate::strategy::DecisionLog;
use crate::types::{
    ClosingLine, Consensus, GameResult, MarketKey, MarketKind, Pick, Quote,
};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1_000;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub quotes: QuoteStore,
    pub closing: ClosingStore,
    pub picks: PickStore,
    pub ledger: BudgetLedger,
    pub decisions: DecisionLog,
}

impl DashboardState {
    pub fn new(
        db: Database,
        dedup_window: chrono::Duration,
        ledger: BudgetLedger,
        decisions: DecisionLog,
    ) -> Self {
        Self {
            quotes: QuoteStore::new(db.clone(), dedup_window),
            closing: ClosingStore::new(db.clone()),
            picks: PickStore::new(db),
            ledger,
            decisions,
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                warn!(error = %e, "API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct KeyPath {
    pub game_id: String,
    pub market: String,
    pub side: String,
}

impl KeyPath {
    fn key(&self) -> Result<MarketKey, ApiError> {
        let market: MarketKind = self
            .market
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("unknown market: {}", self.market)))?;
        Ok(MarketKey::new(self.game_id.clone(), market, self.side.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AtQuery {
    /// Cutoff instant; defaults to now.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DayQuery {
    pub day: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosingResponse {
    pub game_id: String,
    pub closing_lines: Vec<ClosingLine>,
    pub results: Vec<GameResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetResponse {
    pub day: NaiveDate,
    pub counters: Vec<BudgetUsage>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/consensus/:game_id/:market/:side?at=
pub async fn get_consensus(
    State(state): State<AppState>,
    Path(path): Path<KeyPath>,
    Query(query): Query<AtQuery>,
) -> ApiResult<Consensus> {
    let key = path.key()?;
    let cutoff = query.at.unwrap_or_else(Utc::now);
    Ok(Json(consensus_at(&state.quotes, &key, cutoff).await?))
}

/// GET /api/history/:game_id/:market/:side?limit=
pub async fn get_history(
    State(state): State<AppState>,
    Path(path): Path<KeyPath>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Quote>> {
    let key = path.key()?;
    Ok(Json(state.quotes.history(&key, query.limit()).await?))
}

/// GET /api/closing/:game_id
pub async fn get_closing(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> ApiResult<ClosingResponse> {
    Ok(Json(ClosingResponse {
        closing_lines: state.closing.for_game(&game_id).await?,
        results: state.closing.results_for_game(&game_id).await?,
        game_id,
    }))
}

/// GET /api/decisions?limit=
pub async fn get_decisions(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<crate::strategy::DecisionRecord>> {
    Json(state.decisions.recent(query.limit() as usize).await)
}

/// GET /api/budget?day=
pub async fn get_budget(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> ApiResult<BudgetResponse> {
    let day = query.day.unwrap_or_else(|| state.ledger.day_for(Utc::now()));
    Ok(Json(BudgetResponse {
        day,
        counters: state.ledger.usage(day).await?,
    }))
}

/// GET /api/picks?limit=
pub async fn get_picks(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Pick>> {
    Ok(Json(state.picks.recent(query.limit()).await?))
}

/// GET /api/performance
pub async fn get_performance(State(state): State<AppState>) -> ApiResult<PerformanceSummary> {
    Ok(Json(state.picks.performance().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_path_parses_aliases() {
        let path = KeyPath {
            game_id: "g1".into(),
            market: "totals".into(),
            side: "Over".into(),
        };
        let key = path.key().unwrap();
        assert_eq!(key.market, MarketKind::Total);
        assert_eq!(key.side, "over");
    }

    #[test]
    fn test_key_path_rejects_unknown_market() {
        let path = KeyPath {
            game_id: "g1".into(),
            market: "corners".into(),
            side: "x".into(),
        };
        assert!(matches!(path.key(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_limit_clamped() {
        assert_eq!(LimitQuery { limit: None }.limit(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(LimitQuery { limit: Some(50_000) }.limit(), MAX_LIMIT);
    }
}
