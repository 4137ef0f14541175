//! Game schedule and final scores.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

use super::{from_millis, to_millis, Database};
use crate::types::{FinalScore, Game, SharplineError};

#[derive(Clone, Debug)]
pub struct GameStore {
    db: Database,
}

impl GameStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or refresh a game's schedule. Scores and completion are never
    /// touched here; a missing commence time never erases a known one.
    pub async fn upsert(&self, game: &Game) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (game_id, home_team, away_team, commence_time)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (game_id) DO UPDATE SET
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                commence_time = COALESCE(excluded.commence_time, games.commence_time)
            "#,
        )
        .bind(&game.game_id)
        .bind(&game.home_team)
        .bind(&game.away_team)
        .bind(game.commence_time.map(to_millis))
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to upsert game {}", game.game_id))?;
        Ok(())
    }

    /// Record a final score. Re-recording the same score is a no-op; a
    /// conflicting score for an already-final game is refused and logged.
    pub async fn record_final_score(&self, score: &FinalScore) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE games
            SET home_score = ?2, away_score = ?3, completed = 1
            WHERE game_id = ?1
              AND (completed = 0 OR (home_score = ?2 AND away_score = ?3))
            "#,
        )
        .bind(&score.game_id)
        .bind(score.home_score)
        .bind(score.away_score)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to record score for {}", score.game_id))?;

        let applied = result.rows_affected() == 1;
        if !applied {
            if self.get(&score.game_id).await?.is_some() {
                warn!(
                    game_id = %score.game_id,
                    home = score.home_score,
                    away = score.away_score,
                    "Conflicting final score ignored"
                );
            } else {
                debug!(game_id = %score.game_id, "Score for unknown game ignored");
            }
        }
        Ok(applied)
    }

    pub async fn get(&self, game_id: &str) -> Result<Option<Game>> {
        let row = sqlx::query("SELECT * FROM games WHERE game_id = ?")
            .bind(game_id)
            .fetch_optional(self.db.pool())
            .await
            .with_context(|| format!("Failed to load game {game_id}"))?;
        Ok(row.as_ref().map(game_from_row).transpose()?)
    }

    /// Started games whose closing lines have not been recorded yet.
    pub async fn awaiting_close(&self, now: DateTime<Utc>) -> Result<Vec<Game>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM games
            WHERE commence_time IS NOT NULL AND commence_time <= ? AND closed_at IS NULL
            ORDER BY commence_time, game_id
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list games awaiting close")?;
        Ok(rows.iter().map(game_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Flag a game's closing lines as complete. Returns `false` if it was
    /// already flagged.
    pub async fn mark_closed(&self, game_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE games SET closed_at = ? WHERE game_id = ? AND closed_at IS NULL")
            .bind(to_millis(at))
            .bind(game_id)
            .execute(self.db.pool())
            .await
            .with_context(|| format!("Failed to mark {game_id} closed"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Number of started games still awaiting a final score.
    pub async fn awaiting_scores(&self, now: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM games WHERE completed = 0 AND commence_time IS NOT NULL AND commence_time <= ?",
        )
        .bind(to_millis(now))
        .fetch_one(self.db.pool())
        .await
        .context("Failed to count games awaiting scores")
    }

    /// Final games that settlement has not finished with.
    pub async fn unsettled(&self) -> Result<Vec<Game>> {
        let rows = sqlx::query(
            "SELECT * FROM games WHERE completed = 1 AND settled_at IS NULL ORDER BY commence_time, game_id",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list unsettled games")?;
        Ok(rows.iter().map(game_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Flag a final game as settled. Refused while a game with a known start
    /// still has no closing lines, so its results are never skipped.
    pub async fn mark_settled(&self, game_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE games SET settled_at = ?
            WHERE game_id = ? AND completed = 1 AND settled_at IS NULL
              AND (commence_time IS NULL OR closed_at IS NOT NULL)
            "#,
        )
        .bind(to_millis(at))
        .bind(game_id)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to mark {game_id} settled"))?;
        Ok(result.rows_affected() == 1)
    }
}

fn game_from_row(row: &SqliteRow) -> Result<Game, SharplineError> {
    let storage = |e: sqlx::Error| SharplineError::Storage(e.to_string());
    let commence: Option<i64> = row.try_get("commence_time").map_err(storage)?;
    Ok(Game {
        game_id: row.try_get("game_id").map_err(storage)?,
        home_team: row.try_get("home_team").map_err(storage)?,
        away_team: row.try_get("away_team").map_err(storage)?,
        commence_time: commence.map(from_millis).transpose()?,
        home_score: row.try_get("home_score").map_err(storage)?,
        away_score: row.try_get("away_score").map_err(storage)?,
        completed: row.try_get("completed").map_err(storage)?,
    })
}
