//! Closing line resolver.
//!
//! Once a game has started, every market key of that game gets exactly one
//! persisted closing line: the consensus at cutoff = official start. Keys
//! that already have one are skipped, and a lost race on the insert is a
//! silent no-op, so the resolver can run as often as the scheduler likes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::build_consensus;
use crate::storage::closing::ClosingStore;
use crate::storage::quotes::QuoteStore;
use crate::types::{ClosingLine, Game, MarketKey};

/// What one resolver pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    pub resolved: usize,
    /// Persisted as unavailable (no quotes before cutoff).
    pub unavailable: usize,
    pub already_closed: usize,
}

#[derive(Clone, Debug)]
pub struct ClosingLineResolver {
    quotes: QuoteStore,
    closing: ClosingStore,
}

impl ClosingLineResolver {
    pub fn new(quotes: QuoteStore, closing: ClosingStore) -> Self {
        Self { quotes, closing }
    }

    /// Resolve every market key of `game`. Does nothing before the game's
    /// official start or when the start time is unknown.
    pub async fn resolve_game(&self, game: &Game, now: DateTime<Utc>) -> Result<ResolveSummary> {
        let Some(start) = game.commence_time else {
            debug!(game_id = %game.game_id, "No commence time, closing lines deferred");
            return Ok(ResolveSummary::default());
        };
        if now < start {
            return Ok(ResolveSummary::default());
        }

        let mut keys: BTreeSet<MarketKey> = game.market_keys().into_iter().collect();
        keys.extend(self.quotes.keys_for_game(&game.game_id).await?);

        let mut summary = ResolveSummary::default();
        for key in &keys {
            match self.resolve_key(key, start, now).await? {
                Some(closing) if closing.is_available() => summary.resolved += 1,
                Some(_) => summary.unavailable += 1,
                None => summary.already_closed += 1,
            }
        }

        if summary.resolved + summary.unavailable > 0 {
            info!(
                game_id = %game.game_id,
                resolved = summary.resolved,
                unavailable = summary.unavailable,
                "Closing lines recorded"
            );
        }
        Ok(summary)
    }

    /// Resolve one key with cutoff = `start`. Returns the closing line this
    /// call persisted, or `None` if one already existed.
    pub async fn resolve_key(
        &self,
        key: &MarketKey,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ClosingLine>> {
        if self.closing.get(key).await?.is_some() {
            return Ok(None);
        }

        let quotes = self.quotes.quotes_at(key, start).await?;
        let closing = ClosingLine {
            key: key.clone(),
            cutoff: start,
            consensus: build_consensus(key, &quotes, start).result().cloned(),
            computed_at: now,
        };

        if self.closing.insert(&closing).await? {
            debug!(%key, line = ?closing.line(), price = ?closing.price(), "Closing line stored");
            Ok(Some(closing))
        } else {
            debug!(%key, "Closing line already written by another task");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
