//! Persistence layer.
//!
//! SQLite via `sqlx`. The schema is created on connect. Every write in the
//! crate is a single conditional statement or a single transaction, so an
//! abandoned task never leaves partial state behind.
//!
//! Timestamps are stored as Unix milliseconds (`INTEGER`) so that cutoff
//! comparisons are exact; floats are stored as `REAL`, which round-trips
//! IEEE-754 doubles bit for bit.

pub mod budget;
pub mod closing;
pub mod games;
pub mod picks;
pub mod quotes;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::SharplineError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS quotes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint TEXT NOT NULL,
        game_id TEXT NOT NULL,
        source TEXT NOT NULL,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        line REAL,
        price REAL NOT NULL,
        observed_at INTEGER NOT NULL,
        UNIQUE (fingerprint, observed_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quotes_key_time ON quotes (game_id, market, side, observed_at)",
    "CREATE INDEX IF NOT EXISTS idx_quotes_fingerprint ON quotes (fingerprint, observed_at)",
    r#"
    CREATE TABLE IF NOT EXISTS budget_counters (
        provider TEXT NOT NULL,
        day TEXT NOT NULL,
        calls_made INTEGER NOT NULL DEFAULT 0,
        calls_reserved INTEGER NOT NULL DEFAULT 0,
        calls_limit INTEGER NOT NULL,
        PRIMARY KEY (provider, day),
        CHECK (calls_made + calls_reserved <= calls_limit)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS games (
        game_id TEXT PRIMARY KEY,
        home_team TEXT NOT NULL,
        away_team TEXT NOT NULL,
        commence_time INTEGER,
        home_score INTEGER,
        away_score INTEGER,
        completed INTEGER NOT NULL DEFAULT 0,
        closed_at INTEGER,
        settled_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS closing_lines (
        game_id TEXT NOT NULL,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        available INTEGER NOT NULL,
        line REAL,
        price REAL,
        cutoff INTEGER NOT NULL,
        sample_count INTEGER NOT NULL DEFAULT 0,
        sources TEXT NOT NULL DEFAULT '[]',
        outliers_removed INTEGER NOT NULL DEFAULT 0,
        method TEXT,
        latest_observed_at INTEGER,
        oldest_observed_at INTEGER,
        computed_at INTEGER NOT NULL,
        PRIMARY KEY (game_id, market, side)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_results (
        game_id TEXT NOT NULL,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        outcome TEXT NOT NULL,
        margin REAL,
        closing_line REAL,
        PRIMARY KEY (game_id, market, side)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS picks (
        id TEXT PRIMARY KEY,
        game_id TEXT NOT NULL,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        entry_line REAL,
        entry_price REAL NOT NULL,
        stake_units TEXT NOT NULL,
        edge REAL NOT NULL,
        expected_value REAL NOT NULL,
        kelly_fraction REAL NOT NULL,
        confidence REAL NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_picks_game ON picks (game_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_games_queue ON games (completed, settled_at)",
    r#"
    CREATE TABLE IF NOT EXISTS pick_results (
        pick_id TEXT PRIMARY KEY REFERENCES picks(id),
        outcome TEXT NOT NULL,
        closing_line REAL,
        closing_price REAL,
        clv_points REAL,
        clv_probability REAL,
        profit_units TEXT NOT NULL,
        settled_at INTEGER NOT NULL
    )
    "#,
];

/// Handle to the SQLite database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to `url` (e.g. `sqlite://sharpline.db`) and create the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Failed to parse database URL: {url}"))?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its single connection.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(opts)
                .await
        }
        .context("Failed to open database")?;

        let db = Self { pool };
        db.migrate().await?;
        info!(url, "Database ready");
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs).
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        debug!(statements = SCHEMA.len(), "Schema applied");
        Ok(())
    }
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, SharplineError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SharplineError::Storage(format!("timestamp out of range: {ms}")))
}

pub(crate) fn parse_market(s: &str) -> Result<crate::types::MarketKind, SharplineError> {
    s.parse()
        .map_err(|_| SharplineError::Storage(format!("unknown market in storage: {s}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Temp-file database for tests that need more than one connection.
    pub(crate) async fn temp_db() -> (Database, std::path::PathBuf) {
        let mut p = std::env::temp_dir();
        p.push(format!("sharpline_test_{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", p.to_string_lossy());
        let db = Database::connect(&url, 4).await.unwrap();
        (db, p)
    }

    #[tokio::test]
    async fn test_in_memory_schema() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(
            names,
            vec![
                "budget_counters",
                "closing_lines",
                "game_results",
                "games",
                "pick_results",
                "picks",
                "quotes"
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let (db, path) = temp_db().await;
        drop(db);
        let url = format!("sqlite://{}", path.to_string_lossy());
        assert!(Database::connect(&url, 2).await.is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = DateTime::from_timestamp_millis(1_760_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(now)).unwrap(), now);
    }
}
