//! Quote store: append-only, deduplicated market snapshots.
//!
//! Quotes are never updated or deleted. An incoming quote is dropped when a
//! quote with the same content fingerprint was stored within the dedup
//! window around its observation time; the check and the insert are one
//! statement, so concurrent ingesters cannot both store the same snapshot.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{from_millis, parse_market, to_millis, Database};
use crate::types::{MarketKey, Quote, SharplineError};

/// Outcome of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub stored: usize,
    pub duplicates: usize,
}

#[derive(Clone, Debug)]
pub struct QuoteStore {
    db: Database,
    dedup_window: Duration,
}

impl QuoteStore {
    pub fn new(db: Database, dedup_window: Duration) -> Self {
        Self { db, dedup_window }
    }

    /// Store a quote. Returns `false` if it was a duplicate.
    pub async fn insert(&self, quote: &Quote) -> Result<bool> {
        let observed = to_millis(quote.observed_at);
        let window = self.dedup_window.num_milliseconds();
        let result = sqlx::query(
            r#"
            INSERT INTO quotes (fingerprint, game_id, source, market, side, line, price, observed_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM quotes
                WHERE fingerprint = ?1
                  AND observed_at > ?8 - ?9
                  AND observed_at < ?8 + ?9
            )
            ON CONFLICT (fingerprint, observed_at) DO NOTHING
            "#,
        )
        .bind(&quote.fingerprint)
        .bind(&quote.game_id)
        .bind(&quote.source)
        .bind(quote.market.as_str())
        .bind(&quote.side)
        .bind(quote.line)
        .bind(quote.price)
        .bind(observed)
        .bind(window)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to insert quote {}", quote.key()))?;

        let stored = result.rows_affected() == 1;
        if !stored {
            debug!(key = %quote.key(), source = %quote.source, "Duplicate quote skipped");
        }
        Ok(stored)
    }

    /// Store a batch of quotes, counting duplicates.
    pub async fn insert_batch(&self, quotes: &[Quote]) -> Result<InsertSummary> {
        let mut summary = InsertSummary::default();
        for quote in quotes {
            if self.insert(quote).await? {
                summary.stored += 1;
            } else {
                summary.duplicates += 1;
            }
        }
        Ok(summary)
    }

    /// Every quote for `key` observed at or before `cutoff`.
    pub async fn quotes_at(&self, key: &MarketKey, cutoff: DateTime<Utc>) -> Result<Vec<Quote>> {
        let rows = sqlx::query(
            r#"
            SELECT fingerprint, game_id, source, market, side, line, price, observed_at
            FROM quotes
            WHERE game_id = ? AND market = ? AND side = ? AND observed_at <= ?
            ORDER BY observed_at, source, fingerprint
            "#,
        )
        .bind(&key.game_id)
        .bind(key.market.as_str())
        .bind(&key.side)
        .bind(to_millis(cutoff))
        .fetch_all(self.db.pool())
        .await
        .with_context(|| format!("Failed to load quotes for {key}"))?;

        Ok(rows.iter().map(quote_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Line-movement history for `key`, oldest first, at most `limit` rows
    /// (the most recent ones).
    pub async fn history(&self, key: &MarketKey, limit: u32) -> Result<Vec<Quote>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT fingerprint, game_id, source, market, side, line, price, observed_at
                FROM quotes
                WHERE game_id = ? AND market = ? AND side = ?
                ORDER BY observed_at DESC, source DESC
                LIMIT ?
            )
            ORDER BY observed_at, source
            "#,
        )
        .bind(&key.game_id)
        .bind(key.market.as_str())
        .bind(&key.side)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await
        .with_context(|| format!("Failed to load history for {key}"))?;

        Ok(rows.iter().map(quote_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct (market, side) keys ever quoted for a game.
    pub async fn keys_for_game(&self, game_id: &str) -> Result<Vec<MarketKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT market, side FROM quotes WHERE game_id = ? ORDER BY market, side",
        )
        .bind(game_id)
        .fetch_all(self.db.pool())
        .await
        .with_context(|| format!("Failed to list market keys for {game_id}"))?;

        rows.into_iter()
            .map(|(market, side)| -> Result<MarketKey, SharplineError> {
                Ok(MarketKey {
                    game_id: game_id.to_string(),
                    market: parse_market(&market)?,
                    side,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Size of the cached view served when a live fetch is skipped or
    /// fails: one latest quote per (game, source, market, side) across games
    /// that have not started.
    pub async fn cached_count(&self, now: DateTime<Utc>) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT DISTINCT q.game_id, q.source, q.market, q.side
                FROM quotes q
                JOIN games g ON g.game_id = q.game_id
                WHERE g.completed = 0 AND (g.commence_time IS NULL OR g.commence_time > ?)
            )
            "#,
        )
        .bind(to_millis(now))
        .fetch_one(self.db.pool())
        .await
        .context("Failed to count cached quotes")?;
        Ok(n as u64)
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes")
            .fetch_one(self.db.pool())
            .await?;
        Ok(n as u64)
    }
}

fn quote_from_row(row: &SqliteRow) -> Result<Quote, SharplineError> {
    let storage = |e: sqlx::Error| SharplineError::Storage(e.to_string());
    let market: String = row.try_get("market").map_err(storage)?;
    Ok(Quote {
        fingerprint: row.try_get("fingerprint").map_err(storage)?,
        game_id: row.try_get("game_id").map_err(storage)?,
        source: row.try_get("source").map_err(storage)?,
        market: parse_market(&market)?,
        side: row.try_get("side").map_err(storage)?,
        line: row.try_get("line").map_err(storage)?,
        price: row.try_get("price").map_err(storage)?,
        observed_at: from_millis(row.try_get("observed_at").map_err(storage)?)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
