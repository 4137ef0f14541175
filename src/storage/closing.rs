//! Closing lines and per-market game results.
//!
//! `closing_lines` is write-once: the insert is `ON CONFLICT DO NOTHING`, so
//! the first writer for a (game, market, side) wins and every later attempt
//! is a silent no-op. `game_results` is a plain upsert; recomputing it from
//! the same inputs yields the same row.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, parse_market, to_millis, Database};
use crate::types::{
    ClosingLine, ConsensusMethod, ConsensusResult, GameResult, MarketKey, MarketOutcome,
    SharplineError,
};

#[derive(Clone, Debug)]
pub struct ClosingStore {
    db: Database,
}

impl ClosingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a closing line. Returns `false` if one already existed.
    pub async fn insert(&self, closing: &ClosingLine) -> Result<bool> {
        let c = closing.consensus.as_ref();
        let sources = serde_json::to_string(&c.map(|c| c.sources.clone()).unwrap_or_default())
            .context("Failed to encode closing sources")?;

        let result = sqlx::query(
            r#"
            INSERT INTO closing_lines (
                game_id, market, side, available, line, price, cutoff, sample_count,
                sources, outliers_removed, method, latest_observed_at, oldest_observed_at,
                computed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (game_id, market, side) DO NOTHING
            "#,
        )
        .bind(&closing.key.game_id)
        .bind(closing.key.market.as_str())
        .bind(&closing.key.side)
        .bind(c.is_some())
        .bind(c.and_then(|c| c.line))
        .bind(c.map(|c| c.price))
        .bind(to_millis(closing.cutoff))
        .bind(c.map(|c| c.sample_count as i64).unwrap_or(0))
        .bind(sources)
        .bind(c.map(|c| c.outliers_removed as i64).unwrap_or(0))
        .bind(c.map(|c| c.method.as_str()))
        .bind(c.map(|c| to_millis(c.latest_observed_at)))
        .bind(c.map(|c| to_millis(c.oldest_observed_at)))
        .bind(to_millis(closing.computed_at))
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to insert closing line {}", closing.key))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, key: &MarketKey) -> Result<Option<ClosingLine>> {
        let row = sqlx::query(
            "SELECT * FROM closing_lines WHERE game_id = ? AND market = ? AND side = ?",
        )
        .bind(&key.game_id)
        .bind(key.market.as_str())
        .bind(&key.side)
        .fetch_optional(self.db.pool())
        .await
        .with_context(|| format!("Failed to load closing line {key}"))?;
        Ok(row.as_ref().map(closing_from_row).transpose()?)
    }

    pub async fn for_game(&self, game_id: &str) -> Result<Vec<ClosingLine>> {
        let rows = sqlx::query("SELECT * FROM closing_lines WHERE game_id = ? ORDER BY market, side")
            .bind(game_id)
            .fetch_all(self.db.pool())
            .await
            .with_context(|| format!("Failed to load closing lines for {game_id}"))?;
        Ok(rows.iter().map(closing_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Upsert the classification of one market key.
    pub async fn upsert_result(&self, result: &GameResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO game_results (game_id, market, side, outcome, margin, closing_line)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (game_id, market, side) DO UPDATE SET
                outcome = excluded.outcome,
                margin = excluded.margin,
                closing_line = excluded.closing_line
            "#,
        )
        .bind(&result.key.game_id)
        .bind(result.key.market.as_str())
        .bind(&result.key.side)
        .bind(result.outcome.as_str())
        .bind(result.margin)
        .bind(result.closing_line)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to upsert game result {}", result.key))?;
        Ok(())
    }

    pub async fn results_for_game(&self, game_id: &str) -> Result<Vec<GameResult>> {
        let rows = sqlx::query("SELECT * FROM game_results WHERE game_id = ? ORDER BY market, side")
            .bind(game_id)
            .fetch_all(self.db.pool())
            .await
            .with_context(|| format!("Failed to load results for {game_id}"))?;
        Ok(rows.iter().map(result_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn storage(e: sqlx::Error) -> SharplineError {
    SharplineError::Storage(e.to_string())
}

fn key_from_row(row: &SqliteRow) -> Result<MarketKey, SharplineError> {
    let market: String = row.try_get("market").map_err(storage)?;
    Ok(MarketKey {
        game_id: row.try_get("game_id").map_err(storage)?,
        market: parse_market(&market)?,
        side: row.try_get("side").map_err(storage)?,
    })
}

fn closing_from_row(row: &SqliteRow) -> Result<ClosingLine, SharplineError> {
    let key = key_from_row(row)?;
    let cutoff: DateTime<Utc> = from_millis(row.try_get("cutoff").map_err(storage)?)?;
    let available: bool = row.try_get("available").map_err(storage)?;

    let consensus = if available {
        let sources: String = row.try_get("sources").map_err(storage)?;
        let method: Option<String> = row.try_get("method").map_err(storage)?;
        let latest: Option<i64> = row.try_get("latest_observed_at").map_err(storage)?;
        let oldest: Option<i64> = row.try_get("oldest_observed_at").map_err(storage)?;
        let latest = latest.unwrap_or_else(|| cutoff.timestamp_millis());
        let price: Option<f64> = row.try_get("price").map_err(storage)?;
        Some(ConsensusResult {
            key: key.clone(),
            line: row.try_get("line").map_err(storage)?,
            price: price.ok_or_else(|| SharplineError::Storage(format!("closing {key} has no price")))?,
            cutoff,
            sample_count: row.try_get::<i64, _>("sample_count").map_err(storage)? as usize,
            sources: serde_json::from_str(&sources)
                .map_err(|e| SharplineError::Storage(format!("bad sources for {key}: {e}")))?,
            outliers_removed: row.try_get::<i64, _>("outliers_removed").map_err(storage)? as usize,
            method: method
                .as_deref()
                .and_then(ConsensusMethod::parse)
                .ok_or_else(|| SharplineError::Storage(format!("closing {key} has no method")))?,
            latest_observed_at: from_millis(latest)?,
            oldest_observed_at: from_millis(oldest.unwrap_or(latest))?,
        })
    } else {
        None
    };

    Ok(ClosingLine {
        key,
        cutoff,
        consensus,
        computed_at: from_millis(row.try_get("computed_at").map_err(storage)?)?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<GameResult, SharplineError> {
    let outcome: String = row.try_get("outcome").map_err(storage)?;
    Ok(GameResult {
        key: key_from_row(row)?,
        outcome: MarketOutcome::parse(&outcome)
            .ok_or_else(|| SharplineError::Storage(format!("unknown outcome {outcome}")))?,
        margin: row.try_get("margin").map_err(storage)?,
        closing_line: row.try_get("closing_line").map_err(storage)?,
    })
}
