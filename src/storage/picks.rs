//! Picks, pick results and performance aggregates.
//!
//! Status transitions are conditional updates: a pick only moves OPEN →
//! SETTLED or OPEN → VOID. Settling writes the status and the result row in
//! one transaction, so a `pick_results` row exists exactly when the pick is
//! SETTLED. Re-settling a settled pick upserts the same result.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::{from_millis, parse_market, to_millis, Database};
use crate::types::{
    MarketKey, Pick, PickOutcome, PickResult, PickStatus, SharplineError,
};

/// Aggregate record over all picks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub open: u64,
    pub void: u64,
    pub settled: u64,
    pub wins: u64,
    pub losses: u64,
    pub pushes: u64,
    pub staked_units: Decimal,
    pub profit_units: Decimal,
    /// profit / staked; zero when nothing is staked.
    pub roi: Decimal,
    pub mean_clv_points: Option<f64>,
    pub mean_clv_probability: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PickStore {
    db: Database,
}

impl PickStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, pick: &Pick) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO picks (
                id, game_id, market, side, entry_line, entry_price, stake_units,
                edge, expected_value, kelly_fraction, confidence, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pick.id)
        .bind(&pick.key.game_id)
        .bind(pick.key.market.as_str())
        .bind(&pick.key.side)
        .bind(pick.entry_line)
        .bind(pick.entry_price)
        .bind(pick.stake_units.to_string())
        .bind(pick.edge)
        .bind(pick.expected_value)
        .bind(pick.kelly_fraction)
        .bind(pick.confidence)
        .bind(pick.status.as_str())
        .bind(to_millis(pick.created_at))
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to insert pick {}", pick.id))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Pick>> {
        let row = sqlx::query("SELECT * FROM picks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .with_context(|| format!("Failed to load pick {id}"))?;
        Ok(row.as_ref().map(pick_from_row).transpose()?)
    }

    /// OPEN picks for a game, oldest first.
    pub async fn open_for_game(&self, game_id: &str) -> Result<Vec<Pick>> {
        let rows = sqlx::query(
            "SELECT * FROM picks WHERE game_id = ? AND status = 'open' ORDER BY created_at, id",
        )
        .bind(game_id)
        .fetch_all(self.db.pool())
        .await
        .with_context(|| format!("Failed to load picks for {game_id}"))?;
        Ok(rows.iter().map(pick_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Whether an OPEN pick already exists for this market key.
    pub async fn has_open(&self, key: &MarketKey) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM picks WHERE game_id = ? AND market = ? AND side = ? AND status = 'open'",
        )
        .bind(&key.game_id)
        .bind(key.market.as_str())
        .bind(&key.side)
        .fetch_one(self.db.pool())
        .await?;
        Ok(n > 0)
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<Pick>> {
        let rows = sqlx::query("SELECT * FROM picks ORDER BY created_at DESC, id LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list picks")?;
        Ok(rows.iter().map(pick_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// OPEN → VOID. Returns `false` if the pick was already VOID.
    pub async fn void(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE picks SET status = 'void' WHERE id = ? AND status = 'open'")
            .bind(id)
            .execute(self.db.pool())
            .await
            .with_context(|| format!("Failed to void pick {id}"))?;

        if result.rows_affected() == 1 {
            info!(pick_id = id, "Pick voided");
            return Ok(true);
        }
        match self.status_of(id).await? {
            Some(PickStatus::Void) => Ok(false),
            Some(from) => Err(SharplineError::InvalidTransition {
                pick_id: id.to_string(),
                from,
                to: PickStatus::Void,
            }
            .into()),
            None => Err(SharplineError::PickNotFound(id.to_string()).into()),
        }
    }

    /// OPEN → SETTLED (or SETTLED → SETTLED with an identical re-upsert),
    /// writing the result row in the same transaction.
    pub async fn settle(&self, result: &PickResult) -> Result<()> {
        let mut tx = self.db.pool().begin().await.context("Failed to begin settlement")?;

        let updated = sqlx::query(
            "UPDATE picks SET status = 'settled' WHERE id = ? AND status IN ('open', 'settled')",
        )
        .bind(&result.pick_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to mark pick {} settled", result.pick_id))?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            return match self.status_of(&result.pick_id).await? {
                Some(from) => Err(SharplineError::InvalidTransition {
                    pick_id: result.pick_id.clone(),
                    from,
                    to: PickStatus::Settled,
                }
                .into()),
                None => Err(SharplineError::PickNotFound(result.pick_id.clone()).into()),
            };
        }

        sqlx::query(
            r#"
            INSERT INTO pick_results (
                pick_id, outcome, closing_line, closing_price, clv_points,
                clv_probability, profit_units, settled_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (pick_id) DO UPDATE SET
                outcome = excluded.outcome,
                closing_line = excluded.closing_line,
                closing_price = excluded.closing_price,
                clv_points = excluded.clv_points,
                clv_probability = excluded.clv_probability,
                profit_units = excluded.profit_units,
                settled_at = pick_results.settled_at
            "#,
        )
        .bind(&result.pick_id)
        .bind(result.outcome.as_str())
        .bind(result.closing_line)
        .bind(result.closing_price)
        .bind(result.clv_points)
        .bind(result.clv_probability)
        .bind(result.profit_units.to_string())
        .bind(to_millis(result.settled_at))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert result for pick {}", result.pick_id))?;

        tx.commit().await.context("Failed to commit settlement")?;
        Ok(())
    }

    pub async fn result(&self, pick_id: &str) -> Result<Option<PickResult>> {
        let row = sqlx::query("SELECT * FROM pick_results WHERE pick_id = ?")
            .bind(pick_id)
            .fetch_optional(self.db.pool())
            .await
            .with_context(|| format!("Failed to load result for pick {pick_id}"))?;
        Ok(row.as_ref().map(result_from_row).transpose()?)
    }

    pub async fn result_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pick_results")
            .fetch_one(self.db.pool())
            .await?;
        Ok(n as u64)
    }

    /// Record, units and CLV over every pick.
    pub async fn performance(&self) -> Result<PerformanceSummary> {
        let mut summary = PerformanceSummary::default();

        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM picks GROUP BY status")
                .fetch_all(self.db.pool())
                .await
                .context("Failed to count picks")?;
        for (status, n) in counts {
            match PickStatus::parse(&status) {
                Some(PickStatus::Open) => summary.open = n as u64,
                Some(PickStatus::Void) => summary.void = n as u64,
                Some(PickStatus::Settled) => summary.settled = n as u64,
                None => {}
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT r.outcome, r.profit_units, r.clv_points, r.clv_probability, p.stake_units
            FROM pick_results r JOIN picks p ON p.id = r.pick_id
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load pick results")?;

        let (mut clv_pts, mut clv_prob) = (Vec::new(), Vec::new());
        for row in &rows {
            let outcome: String = row.try_get("outcome")?;
            match PickOutcome::parse(&outcome) {
                Some(PickOutcome::Win) => summary.wins += 1,
                Some(PickOutcome::Loss) => summary.losses += 1,
                Some(PickOutcome::Push) => summary.pushes += 1,
                None => {}
            }
            summary.profit_units += parse_decimal(&row.try_get::<String, _>("profit_units")?)?;
            summary.staked_units += parse_decimal(&row.try_get::<String, _>("stake_units")?)?;
            if let Some(v) = row.try_get::<Option<f64>, _>("clv_points")? {
                clv_pts.push(v);
            }
            if let Some(v) = row.try_get::<Option<f64>, _>("clv_probability")? {
                clv_prob.push(v);
            }
        }

        if !summary.staked_units.is_zero() {
            summary.roi = (summary.profit_units / summary.staked_units).round_dp(4);
        }
        summary.mean_clv_points = mean(&clv_pts);
        summary.mean_clv_probability = mean(&clv_prob);
        Ok(summary)
    }

    async fn status_of(&self, id: &str) -> Result<Option<PickStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM picks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(status.as_deref().and_then(PickStatus::parse))
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, SharplineError> {
    Decimal::from_str(s).map_err(|e| SharplineError::Storage(format!("bad decimal {s}: {e}")))
}

fn storage(e: sqlx::Error) -> SharplineError {
    SharplineError::Storage(e.to_string())
}

fn pick_from_row(row: &SqliteRow) -> Result<Pick, SharplineError> {
    let market: String = row.try_get("market").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;
    let stake: String = row.try_get("stake_units").map_err(storage)?;
    Ok(Pick {
        id: row.try_get("id").map_err(storage)?,
        key: MarketKey {
            game_id: row.try_get("game_id").map_err(storage)?,
            market: parse_market(&market)?,
            side: row.try_get("side").map_err(storage)?,
        },
        entry_line: row.try_get("entry_line").map_err(storage)?,
        entry_price: row.try_get("entry_price").map_err(storage)?,
        stake_units: parse_decimal(&stake)?,
        edge: row.try_get("edge").map_err(storage)?,
        expected_value: row.try_get("expected_value").map_err(storage)?,
        kelly_fraction: row.try_get("kelly_fraction").map_err(storage)?,
        confidence: row.try_get("confidence").map_err(storage)?,
        status: PickStatus::parse(&status)
            .ok_or_else(|| SharplineError::Storage(format!("unknown pick status {status}")))?,
        created_at: from_millis(row.try_get("created_at").map_err(storage)?)?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<PickResult, SharplineError> {
    let outcome: String = row.try_get("outcome").map_err(storage)?;
    let profit: String = row.try_get("profit_units").map_err(storage)?;
    Ok(PickResult {
        pick_id: row.try_get("pick_id").map_err(storage)?,
        outcome: PickOutcome::parse(&outcome)
            .ok_or_else(|| SharplineError::Storage(format!("unknown pick outcome {outcome}")))?,
        closing_line: row.try_get("closing_line").map_err(storage)?,
        closing_price: row.try_get("closing_price").map_err(storage)?,
        clv_points: row.try_get("clv_points").map_err(storage)?,
        clv_probability: row.try_get("clv_probability").map_err(storage)?,
        profit_units: parse_decimal(&profit)?,
        settled_at: from_millis(row.try_get("settled_at").map_err(storage)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn pick(id: &str) -> Pick {
        Pick {
            id: id.into(),
            key: MarketKey::new("g1", MarketKind::Spread, "Lakers"),
            entry_line: Some(-3.5),
            entry_price: 1.95,
            stake_units: dec!(1.5),
            edge: 0.04,
            expected_value: 0.07,
            kelly_fraction: 0.02,
            confidence: 0.55,
            status: PickStatus::Open,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn result(id: &str, outcome: PickOutcome, profit: Decimal) -> PickResult {
        PickResult {
            pick_id: id.into(),
            outcome,
            closing_line: Some(-4.5),
            closing_price: Some(1.91),
            clv_points: Some(1.0),
            clv_probability: Some(0.011),
            profit_units: profit,
            settled_at: Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap(),
        }
    }

    async fn store() -> PickStore {
        PickStore::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store().await;
        store.insert(&pick("p1")).await.unwrap();
        assert_eq!(store.get("p1").await.unwrap(), Some(pick("p1")));
        assert!(store.has_open(&pick("p1").key).await.unwrap());
    }

    #[tokio::test]
    async fn test_settle_twice_keeps_one_result() {
        let store = store().await;
        store.insert(&pick("p1")).await.unwrap();
        let r = result("p1", PickOutcome::Win, dec!(1.425));
        store.settle(&r).await.unwrap();
        store.settle(&r).await.unwrap();

        assert_eq!(store.result_count().await.unwrap(), 1);
        assert_eq!(store.result("p1").await.unwrap(), Some(r));
        assert_eq!(store.get("p1").await.unwrap().unwrap().status, PickStatus::Settled);
    }

    #[tokio::test]
    async fn test_open_for_game_skips_finished_picks() {
        let store = store().await;
        for id in ["p1", "p2", "p3"] {
            store.insert(&pick(id)).await.unwrap();
        }
        store.settle(&result("p1", PickOutcome::Loss, dec!(-1.5))).await.unwrap();
        store.void("p2").await.unwrap();

        let open: Vec<_> = store.open_for_game("g1").await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(open, vec!["p3"]);
        assert!(store.open_for_game("g2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_void_transitions() {
        let store = store().await;
        store.insert(&pick("p1")).await.unwrap();
        assert!(store.void("p1").await.unwrap());
        assert!(!store.void("p1").await.unwrap());

        // VOID is terminal: settlement is refused and no result row appears.
        let err = store.settle(&result("p1", PickOutcome::Win, dec!(1))).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SharplineError>(),
            Some(SharplineError::InvalidTransition { from: PickStatus::Void, .. })
        ));
        assert!(store.result("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settled_cannot_be_voided() {
        let store = store().await;
        store.insert(&pick("p1")).await.unwrap();
        store.settle(&result("p1", PickOutcome::Loss, dec!(-1.5))).await.unwrap();
        let err = store.void("p1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SharplineError>(),
            Some(SharplineError::InvalidTransition { from: PickStatus::Settled, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_pick() {
        let store = store().await;
        let err = store.void("nope").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SharplineError>(), Some(SharplineError::PickNotFound(_))));
    }

    #[tokio::test]
    async fn test_performance_summary() {
        let store = store().await;
        for id in ["p1", "p2", "p3", "p4"] {
            store.insert(&pick(id)).await.unwrap();
        }
        store.settle(&result("p1", PickOutcome::Win, dec!(1.425))).await.unwrap();
        store.settle(&result("p2", PickOutcome::Loss, dec!(-1.5))).await.unwrap();
        store.void("p3").await.unwrap();

        let perf = store.performance().await.unwrap();
        assert_eq!((perf.open, perf.void, perf.settled), (1, 1, 2));
        assert_eq!((perf.wins, perf.losses, perf.pushes), (1, 1, 0));
        assert_eq!(perf.staked_units, dec!(3.0));
        assert_eq!(perf.profit_units, dec!(-0.075));
        assert_eq!(perf.roi, dec!(-0.025));
        assert_eq!(perf.mean_clv_points, Some(1.0));
    }
}
