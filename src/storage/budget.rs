//! Budget ledger: per-provider, per-day call counters.
//!
//! The ledger is the only thing allowed to authorize an external fetch.
//! A slot is taken with a single conditional `UPDATE` (never read-then-write),
//! so any number of concurrent schedulers can race on the same counter
//! without overshooting the limit. A reserved slot is then either committed
//! (the call reached the network) or released (it never left the process).
//!
//! Any storage failure while reserving is treated as "exhausted".

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Database;
use crate::config::BudgetConfig;
use crate::types::SharplineError;

/// Answer to a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub allowed: bool,
    /// Slots still free after this reservation.
    pub remaining: u32,
}

impl Reservation {
    const DENIED: Reservation = Reservation {
        allowed: false,
        remaining: 0,
    };
}

/// One counter row, as served by the read-only API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BudgetUsage {
    pub provider: String,
    pub day: String,
    pub calls_made: i64,
    pub calls_reserved: i64,
    pub calls_limit: i64,
}

impl BudgetUsage {
    pub fn remaining(&self) -> i64 {
        (self.calls_limit - self.calls_made - self.calls_reserved).max(0)
    }
}

#[derive(Clone, Debug)]
pub struct BudgetLedger {
    db: Database,
    limits: BudgetConfig,
    tz: Tz,
}

impl BudgetLedger {
    pub fn new(db: Database, limits: BudgetConfig, tz: Tz) -> Self {
        Self { db, limits, tz }
    }

    /// Calendar day of `now` in the ledger's timezone.
    pub fn day_for(&self, now: DateTime<Utc>) -> NaiveDate {
        ledger_day(now, self.tz)
    }

    /// Try to take one call slot for `provider` on `day`. Fails closed.
    pub async fn try_reserve(&self, provider: &str, day: NaiveDate) -> Reservation {
        match self.reserve_inner(provider, day).await {
            Ok(Some(remaining)) => {
                debug!(provider, %day, remaining, "Budget slot reserved");
                Reservation {
                    allowed: true,
                    remaining: remaining.max(0) as u32,
                }
            }
            Ok(None) => {
                info!(
                    provider,
                    %day,
                    limit = self.limits.limit_for(provider),
                    "Daily call budget exhausted"
                );
                Reservation::DENIED
            }
            Err(e) => {
                warn!(provider, %day, error = %e, "Budget ledger unavailable, treating as exhausted");
                Reservation::DENIED
            }
        }
    }

    async fn reserve_inner(&self, provider: &str, day: NaiveDate) -> Result<Option<i64>> {
        let day = day.to_string();
        sqlx::query(
            r#"
            INSERT INTO budget_counters (provider, day, calls_limit)
            VALUES (?, ?, ?)
            ON CONFLICT (provider, day) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(&day)
        .bind(i64::from(self.limits.limit_for(provider)))
        .execute(self.db.pool())
        .await
        .context("Failed to create budget counter")?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE budget_counters
            SET calls_reserved = calls_reserved + 1
            WHERE provider = ? AND day = ?
              AND calls_made + calls_reserved < calls_limit
            RETURNING calls_limit - calls_made - calls_reserved
            "#,
        )
        .bind(provider)
        .bind(&day)
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to reserve budget slot")?;

        Ok(remaining)
    }

    /// Count a reserved call as made. Call only once the request actually
    /// reached the provider.
    pub async fn commit(&self, provider: &str, day: NaiveDate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE budget_counters
            SET calls_reserved = calls_reserved - 1, calls_made = calls_made + 1
            WHERE provider = ? AND day = ? AND calls_reserved > 0
            "#,
        )
        .bind(provider)
        .bind(day.to_string())
        .execute(self.db.pool())
        .await
        .context("Failed to commit budget slot")?;

        if result.rows_affected() == 0 {
            return Err(SharplineError::InvariantViolation(format!(
                "commit without reservation for {provider} on {day}"
            ))
            .into());
        }
        Ok(())
    }

    /// Hand back a reservation whose call never reached the network.
    pub async fn release(&self, provider: &str, day: NaiveDate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE budget_counters
            SET calls_reserved = calls_reserved - 1
            WHERE provider = ? AND day = ? AND calls_reserved > 0
            "#,
        )
        .bind(provider)
        .bind(day.to_string())
        .execute(self.db.pool())
        .await
        .context("Failed to release budget slot")?;

        if result.rows_affected() == 0 {
            warn!(provider, %day, "Release without matching reservation");
        }
        Ok(())
    }

    /// All counters for `day`, sorted by provider.
    pub async fn usage(&self, day: NaiveDate) -> Result<Vec<BudgetUsage>> {
        sqlx::query_as::<_, BudgetUsage>(
            r#"
            SELECT provider, day, calls_made, calls_reserved, calls_limit
            FROM budget_counters
            WHERE day = ?
            ORDER BY provider
            "#,
        )
        .bind(day.to_string())
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load budget usage")
    }
}

/// Calendar day of `now` in `tz`.
pub fn ledger_day(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
