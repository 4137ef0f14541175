//! Settlement: ATS / O/U classification, pick grading and CLV.
//!
//! Games are classified against their persisted closing lines; picks are
//! graded against their own entry line and measured against the close.
//! Every write is an upsert keyed by (game, market, side) or pick id, so a
//! pass can be repeated any number of times with identical results. A game
//! leaves the queue once all of its picks are settled.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use tracing::{debug, info, warn};

use crate::storage::closing::ClosingStore;
use crate::storage::games::GameStore;
use crate::storage::picks::PickStore;
use crate::strategy::odds::implied_probability;
use crate::types::{
    ClosingLine, Game, GameResult, MarketKind, MarketOutcome, Pick, PickOutcome, PickResult,
    SharplineError, TotalSide,
};

// ---------------------------------------------------------------------------
// Pure grading
// ---------------------------------------------------------------------------

/// Classify a finished game for one market key against its closing line.
///
/// Returns `None` while the game is unfinished or when the side is not one
/// of the two teams.
pub fn classify(game: &Game, closing: &ClosingLine) -> Option<GameResult> {
    let key = &closing.key;
    let no_market = || GameResult {
        key: key.clone(),
        outcome: MarketOutcome::NoMarket,
        margin: None,
        closing_line: None,
    };

    match key.market {
        MarketKind::Spread => {
            let (team, opponent) = game.score_for(&key.side)?;
            let Some(line) = closing.line() else {
                return Some(no_market());
            };
            let margin = f64::from(team) + line - f64::from(opponent);
            let outcome = match sign(margin) {
                1 => MarketOutcome::Cover,
                -1 => MarketOutcome::Miss,
                _ => MarketOutcome::Push,
            };
            Some(GameResult {
                key: key.clone(),
                outcome,
                margin: Some(margin),
                closing_line: Some(line),
            })
        }
        MarketKind::Total => {
            let total = game.total_points()?;
            let Some(line) = closing.line() else {
                return Some(no_market());
            };
            let diff = f64::from(total) - line;
            let outcome = match sign(diff) {
                1 => MarketOutcome::Over,
                -1 => MarketOutcome::Under,
                _ => MarketOutcome::Push,
            };
            Some(GameResult {
                key: key.clone(),
                outcome,
                margin: Some(diff),
                closing_line: Some(line),
            })
        }
        MarketKind::Moneyline => {
            let (team, opponent) = game.score_for(&key.side)?;
            if !closing.is_available() {
                return Some(no_market());
            }
            let outcome = match team.cmp(&opponent) {
                std::cmp::Ordering::Greater => MarketOutcome::Won,
                std::cmp::Ordering::Less => MarketOutcome::Lost,
                std::cmp::Ordering::Equal => MarketOutcome::Push,
            };
            Some(GameResult {
                key: key.clone(),
                outcome,
                margin: Some(f64::from(team - opponent)),
                closing_line: None,
            })
        }
    }
}

/// Grade a pick against its entry line. `None` if the game is unfinished
/// or the pick cannot be matched to it.
pub fn grade_pick(pick: &Pick, game: &Game) -> Option<PickOutcome> {
    let diff = match pick.key.market {
        MarketKind::Spread => {
            let (team, opponent) = game.score_for(&pick.key.side)?;
            f64::from(team) + pick.entry_line? - f64::from(opponent)
        }
        MarketKind::Total => {
            let diff = f64::from(game.total_points()?) - pick.entry_line?;
            match TotalSide::parse(&pick.key.side)? {
                TotalSide::Over => diff,
                TotalSide::Under => -diff,
            }
        }
        MarketKind::Moneyline => {
            let (team, opponent) = game.score_for(&pick.key.side)?;
            f64::from(team - opponent)
        }
    };
    Some(match sign(diff) {
        1 => PickOutcome::Win,
        -1 => PickOutcome::Loss,
        _ => PickOutcome::Push,
    })
}

/// Profit in stake units: `stake × (price − 1)` on a win, `−stake` on a
/// loss, zero on a push.
pub fn profit_units(outcome: PickOutcome, stake: Decimal, price: f64) -> Result<Decimal, SharplineError> {
    match outcome {
        PickOutcome::Win => {
            let net = Decimal::from_f64(price - 1.0).ok_or_else(|| {
                SharplineError::InvalidInput(format!("unrepresentable price {price}"))
            })?;
            Ok((stake * net).round_dp(2))
        }
        PickOutcome::Loss => Ok(-stake),
        PickOutcome::Push => Ok(Decimal::ZERO),
    }
}

/// Line CLV in points, signed so that positive favours the bettor.
/// Moneyline has no line and yields `None`.
pub fn line_clv(market: MarketKind, side: &str, entry: Option<f64>, closing: Option<f64>) -> Option<f64> {
    let (entry, closing) = (entry?, closing?);
    match market {
        MarketKind::Spread => Some(entry - closing),
        MarketKind::Total => match TotalSide::parse(side)? {
            TotalSide::Over => Some(closing - entry),
            TotalSide::Under => Some(entry - closing),
        },
        MarketKind::Moneyline => None,
    }
}

/// `implied(closing) − implied(entry)`; positive means the market moved
/// toward the pick.
pub fn probability_clv(entry_price: f64, closing_price: f64) -> Option<f64> {
    Some(implied_probability(closing_price).ok()? - implied_probability(entry_price).ok()?)
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What one settlement pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementSummary {
    pub games: usize,
    pub results: usize,
    pub no_market: usize,
    pub picks_settled: usize,
    /// Picks left OPEN because their closing line is not computed yet.
    pub picks_pending: usize,
}

#[derive(Clone, Debug)]
pub struct SettlementEngine {
    games: GameStore,
    closing: ClosingStore,
    picks: PickStore,
}

impl SettlementEngine {
    pub fn new(games: GameStore, closing: ClosingStore, picks: PickStore) -> Self {
        Self {
            games,
            closing,
            picks,
        }
    }

    /// Settle every completed game still in the queue.
    pub async fn settle_completed(&self, now: DateTime<Utc>) -> Result<SettlementSummary> {
        let mut total = SettlementSummary::default();
        for game in self.games.unsettled().await? {
            let s = self.settle_game(&game, now).await?;
            if s.picks_pending == 0 && !self.games.mark_settled(&game.game_id, now).await? {
                debug!(game_id = %game.game_id, "Closing lines outstanding, game stays queued");
            }
            total.games += s.games;
            total.results += s.results;
            total.no_market += s.no_market;
            total.picks_settled += s.picks_settled;
            total.picks_pending += s.picks_pending;
        }
        if total.games > 0 {
            info!(
                games = total.games,
                results = total.results,
                no_market = total.no_market,
                picks_settled = total.picks_settled,
                picks_pending = total.picks_pending,
                "Settlement pass complete"
            );
        }
        Ok(total)
    }

    /// Classify one finished game and settle its OPEN picks.
    pub async fn settle_game(&self, game: &Game, now: DateTime<Utc>) -> Result<SettlementSummary> {
        let mut summary = SettlementSummary::default();
        if !game.completed {
            debug!(game_id = %game.game_id, "Game not final, settlement deferred");
            return Ok(summary);
        }
        summary.games = 1;

        for closing in self.closing.for_game(&game.game_id).await? {
            if let Some(result) = classify(game, &closing) {
                if result.outcome == MarketOutcome::NoMarket {
                    summary.no_market += 1;
                }
                self.closing.upsert_result(&result).await?;
                summary.results += 1;
            }
        }

        for pick in self.picks.open_for_game(&game.game_id).await? {
            let Some(closing) = self.closing.get(&pick.key).await? else {
                summary.picks_pending += 1;
                continue;
            };
            let Some(outcome) = grade_pick(&pick, game) else {
                warn!(pick_id = %pick.id, key = %pick.key, "Pick cannot be graded against the final score");
                continue;
            };

            let result = PickResult {
                pick_id: pick.id.clone(),
                outcome,
                closing_line: closing.line(),
                closing_price: closing.price(),
                clv_points: line_clv(pick.key.market, &pick.key.side, pick.entry_line, closing.line()),
                clv_probability: closing
                    .price()
                    .and_then(|close| probability_clv(pick.entry_price, close)),
                profit_units: profit_units(outcome, pick.stake_units, pick.entry_price)?,
                settled_at: now,
            };
            self.picks.settle(&result).await?;
            debug!(
                pick_id = %pick.id,
                outcome = outcome.as_str(),
                profit = %result.profit_units,
                clv = ?result.clv_points,
                "Pick settled"
            );
            summary.picks_settled += 1;
        }

        Ok(summary)
    }

    /// Administrative OPEN → VOID.
    pub async fn void_pick(&self, pick_id: &str) -> Result<bool> {
        self.picks.void(pick_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
