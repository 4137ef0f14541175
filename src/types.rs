//! Shared types for SHARPLINE.
//!
//! These types form the data model used across all modules. Storage,
//! consensus, strategy and settlement all speak in terms of the structs
//! below, so they stay free of any database or transport detail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// The three market kinds we reconcile. Every per-kind branch in the crate
/// matches on this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
}

impl MarketKind {
    pub const ALL: &'static [MarketKind] =
        &[MarketKind::Moneyline, MarketKind::Spread, MarketKind::Total];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        }
    }

    /// Whether quotes in this market carry a line value.
    pub fn has_line(&self) -> bool {
        !matches!(self, MarketKind::Moneyline)
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a market kind (case-insensitive, accepts common provider aliases).
impl std::str::FromStr for MarketKind {
    type Err = SharplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "moneyline" | "h2h" | "ml" => Ok(MarketKind::Moneyline),
            "spread" | "spreads" | "ats" => Ok(MarketKind::Spread),
            "total" | "totals" | "ou" => Ok(MarketKind::Total),
            other => Err(SharplineError::MalformedQuote(format!(
                "unknown market kind: {other}"
            ))),
        }
    }
}

/// Side of a totals market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalSide {
    Over,
    Under,
}

impl TotalSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TotalSide::Over => "over",
            TotalSide::Under => "under",
        }
    }

    pub fn parse(side: &str) -> Option<Self> {
        match side.trim().to_lowercase().as_str() {
            "over" | "o" => Some(TotalSide::Over),
            "under" | "u" => Some(TotalSide::Under),
            _ => None,
        }
    }
}

/// Identity of one reconciled market line: (game, market, side).
///
/// For totals the side is always the normalized `over` / `under`; for
/// moneyline and spread it is the team name as the provider spells it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub game_id: String,
    pub market: MarketKind,
    pub side: String,
}

impl MarketKey {
    pub fn new(game_id: impl Into<String>, market: MarketKind, side: impl Into<String>) -> Self {
        let side = side.into();
        let side = match (market, TotalSide::parse(&side)) {
            (MarketKind::Total, Some(ts)) => ts.as_str().to_string(),
            _ => side.trim().to_string(),
        };
        Self {
            game_id: game_id.into(),
            market,
            side,
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.game_id, self.market, self.side)
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// One observed price/line from one source at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub game_id: String,
    pub source: String,
    pub market: MarketKind,
    pub side: String,
    /// Point spread or total; `None` for moneyline.
    pub line: Option<f64>,
    /// Decimal odds (> 1.0).
    pub price: f64,
    pub observed_at: DateTime<Utc>,
    /// SHA-256 over every value field (not the timestamp).
    pub fingerprint: String,
}

impl Quote {
    /// Build a quote and compute its content fingerprint.
    pub fn new(
        key: &MarketKey,
        source: impl Into<String>,
        line: Option<f64>,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let fingerprint = fingerprint(key, &source, line, price);
        Self {
            game_id: key.game_id.clone(),
            source,
            market: key.market,
            side: key.side.clone(),
            line,
            price,
            observed_at,
            fingerprint,
        }
    }

    pub fn key(&self) -> MarketKey {
        MarketKey {
            game_id: self.game_id.clone(),
            market: self.market,
            side: self.side.clone(),
        }
    }

    /// The value the consensus builder reconciles: the line for spread and
    /// total markets, the price for moneyline.
    pub fn consensus_value(&self) -> f64 {
        match self.market {
            MarketKind::Moneyline => self.price,
            MarketKind::Spread | MarketKind::Total => self.line.unwrap_or(f64::NAN),
        }
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {}/{}/{} {:+} @ {:.3} ({})",
                self.source, self.game_id, self.market, self.side, line, self.price,
                self.observed_at.to_rfc3339(),
            ),
            None => write!(
                f,
                "[{}] {}/{}/{} @ {:.3} ({})",
                self.source, self.game_id, self.market, self.side, self.price,
                self.observed_at.to_rfc3339(),
            ),
        }
    }
}

/// Content fingerprint of a quote's value fields.
///
/// Floats are hashed by their bit pattern so two quotes hash equal exactly
/// when their stored values are identical.
pub fn fingerprint(key: &MarketKey, source: &str, line: Option<f64>, price: f64) -> String {
    let line = line
        .map(|l| hex::encode(l.to_bits().to_be_bytes()))
        .unwrap_or_else(|| "-".to_string());
    let mut hasher = Sha256::new();
    hasher.update(key.game_id.as_bytes());
    hasher.update(b"|");
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(key.market.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(key.side.as_bytes());
    hasher.update(b"|");
    hasher.update(line.as_bytes());
    hasher.update(b"|");
    hasher.update(hex::encode(price.to_bits().to_be_bytes()).as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Consensus & closing lines
// ---------------------------------------------------------------------------

/// How a consensus value was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// Exactly one source; its quote is the consensus verbatim.
    SingleSource,
    /// Median after MAD-based outlier rejection.
    MedianMad,
}

impl ConsensusMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusMethod::SingleSource => "single_source",
            ConsensusMethod::MedianMad => "median_mad",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_source" => Some(ConsensusMethod::SingleSource),
            "median_mad" => Some(ConsensusMethod::MedianMad),
            _ => None,
        }
    }
}

/// Reconciled market line at a cutoff instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub key: MarketKey,
    /// Consensus line; `None` for moneyline.
    pub line: Option<f64>,
    pub price: f64,
    pub cutoff: DateTime<Utc>,
    pub sample_count: usize,
    /// Surviving sources, sorted.
    pub sources: Vec<String>,
    pub outliers_removed: usize,
    pub method: ConsensusMethod,
    /// Observation time of the freshest surviving quote.
    pub latest_observed_at: DateTime<Utc>,
    /// Observation time of the stalest surviving quote. Recency is judged on
    /// this one: every survivor moves the median.
    pub oldest_observed_at: DateTime<Utc>,
}

/// Consensus output. `Unavailable` is a legitimate empty state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Consensus {
    Available(ConsensusResult),
    Unavailable { key: MarketKey, cutoff: DateTime<Utc> },
}

impl Consensus {
    pub fn result(&self) -> Option<&ConsensusResult> {
        match self {
            Consensus::Available(r) => Some(r),
            Consensus::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Consensus::Available(_))
    }
}

/// The authoritative market state at game start. Written once, never
/// overwritten. `consensus == None` means no market existed before cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingLine {
    pub key: MarketKey,
    pub cutoff: DateTime<Utc>,
    pub consensus: Option<ConsensusResult>,
    pub computed_at: DateTime<Utc>,
}

impl ClosingLine {
    pub fn is_available(&self) -> bool {
        self.consensus.is_some()
    }

    pub fn line(&self) -> Option<f64> {
        self.consensus.as_ref().and_then(|c| c.line)
    }

    pub fn price(&self) -> Option<f64> {
        self.consensus.as_ref().map(|c| c.price)
    }
}

// ---------------------------------------------------------------------------
// Games & model inputs
// ---------------------------------------------------------------------------

/// A scheduled or finished game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    /// Official start time; the closing-line cutoff.
    pub commence_time: Option<DateTime<Utc>>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub completed: bool,
}

impl Game {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.commence_time.map(|t| now >= t).unwrap_or(false)
    }

    /// Final score as (team, opponent) from the perspective of `team`.
    /// Returns `None` if the game is unfinished or `team` is not playing.
    pub fn score_for(&self, team: &str) -> Option<(i32, i32)> {
        if !self.completed {
            return None;
        }
        let (home, away) = (self.home_score?, self.away_score?);
        if team.eq_ignore_ascii_case(&self.home_team) {
            Some((home, away))
        } else if team.eq_ignore_ascii_case(&self.away_team) {
            Some((away, home))
        } else {
            None
        }
    }

    pub fn total_points(&self) -> Option<i32> {
        if !self.completed {
            return None;
        }
        Some(self.home_score? + self.away_score?)
    }

    /// The six standard market keys of a two-team game.
    pub fn market_keys(&self) -> Vec<MarketKey> {
        let mut keys = Vec::with_capacity(6);
        for market in [MarketKind::Moneyline, MarketKind::Spread] {
            keys.push(MarketKey::new(self.game_id.clone(), market, self.home_team.clone()));
            keys.push(MarketKey::new(self.game_id.clone(), market, self.away_team.clone()));
        }
        for side in [TotalSide::Over, TotalSide::Under] {
            keys.push(MarketKey::new(self.game_id.clone(), MarketKind::Total, side.as_str()));
        }
        keys
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} [{}]", self.away_team, self.home_team, self.game_id)?;
        if let (true, Some(h), Some(a)) = (self.completed, self.home_score, self.away_score) {
            write!(f, " final {a}-{h}")?;
        }
        Ok(())
    }
}

/// Final score reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub game_id: String,
    pub home_score: i32,
    pub away_score: i32,
}

/// Externally supplied win-probability estimate for one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEstimate {
    pub game_id: String,
    pub market: MarketKind,
    pub selection: String,
    pub probability: f64,
    /// When the underlying stats were last refreshed.
    pub stats_updated_at: Option<DateTime<Utc>>,
    /// Number of games/observations behind the stats.
    pub sample_size: u32,
}

impl ModelEstimate {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(self.game_id.clone(), self.market, self.selection.clone())
    }
}

// ---------------------------------------------------------------------------
// Picks & settlement
// ---------------------------------------------------------------------------

/// Pick lifecycle. OPEN → SETTLED | OPEN → VOID, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickStatus {
    Open,
    Settled,
    Void,
}

impl PickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickStatus::Open => "open",
            PickStatus::Settled => "settled",
            PickStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PickStatus::Open),
            "settled" => Some(PickStatus::Settled),
            "void" => Some(PickStatus::Void),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PickStatus::Open)
    }
}

impl fmt::Display for PickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// A recorded bet recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub id: String,
    pub key: MarketKey,
    pub entry_line: Option<f64>,
    pub entry_price: f64,
    pub stake_units: Decimal,
    pub edge: f64,
    pub expected_value: f64,
    pub kelly_fraction: f64,
    /// Model win probability at decision time.
    pub confidence: f64,
    pub status: PickStatus,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.key)?;
        if let Some(line) = self.entry_line {
            write!(f, " {line:+}")?;
        }
        write!(
            f,
            " @ {:.3} stake={}u edge={:.1}%",
            self.entry_price,
            self.stake_units,
            self.edge * 100.0
        )
    }
}

/// Grade of a pick against its own entry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickOutcome {
    Win,
    Loss,
    Push,
}

impl PickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickOutcome::Win => "win",
            PickOutcome::Loss => "loss",
            PickOutcome::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(PickOutcome::Win),
            "loss" => Some(PickOutcome::Loss),
            "push" => Some(PickOutcome::Push),
            _ => None,
        }
    }
}

/// Settlement record for one pick. Exists iff the pick is SETTLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickResult {
    pub pick_id: String,
    pub outcome: PickOutcome,
    pub closing_line: Option<f64>,
    pub closing_price: Option<f64>,
    /// Line-points CLV, sign fixed so positive always favours the bettor.
    pub clv_points: Option<f64>,
    /// implied(closing) − implied(entry).
    pub clv_probability: Option<f64>,
    pub profit_units: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Classification of a game against its closing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketOutcome {
    Cover,
    Miss,
    Over,
    Under,
    Push,
    /// Moneyline winner / loser.
    Won,
    Lost,
    /// Closing line unavailable; no market existed before cutoff.
    NoMarket,
}

impl MarketOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketOutcome::Cover => "cover",
            MarketOutcome::Miss => "miss",
            MarketOutcome::Over => "over",
            MarketOutcome::Under => "under",
            MarketOutcome::Push => "push",
            MarketOutcome::Won => "won",
            MarketOutcome::Lost => "lost",
            MarketOutcome::NoMarket => "no_market",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cover" => Some(MarketOutcome::Cover),
            "miss" => Some(MarketOutcome::Miss),
            "over" => Some(MarketOutcome::Over),
            "under" => Some(MarketOutcome::Under),
            "push" => Some(MarketOutcome::Push),
            "won" => Some(MarketOutcome::Won),
            "lost" => Some(MarketOutcome::Lost),
            "no_market" => Some(MarketOutcome::NoMarket),
            _ => None,
        }
    }
}

/// Per (game, market, side) settlement against the closing line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub key: MarketKey,
    pub outcome: MarketOutcome,
    /// ATS margin or total-vs-line difference; `None` when not applicable.
    pub margin: Option<f64>,
    pub closing_line: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SHARPLINE.
#[derive(Debug, thiserror::Error)]
pub enum SharplineError {
    #[error("Provider unavailable ({provider}): {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Budget exhausted for {provider} on {day}")]
    BudgetExhausted { provider: String, day: String },

    #[error("Malformed quote: {0}")]
    MalformedQuote(String),

    #[error("Insufficient data for {0}")]
    InsufficientData(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid transition for pick {pick_id}: {from} -> {to}")]
    InvalidTransition {
        pick_id: String,
        from: PickStatus,
        to: PickStatus,
    },

    #[error("Pick not found: {0}")]
    PickNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn test_market_kind_from_str() {
        assert_eq!("h2h".parse::<MarketKind>().unwrap(), MarketKind::Moneyline);
        assert_eq!("Spreads".parse::<MarketKind>().unwrap(), MarketKind::Spread);
        assert_eq!("TOTALS".parse::<MarketKind>().unwrap(), MarketKind::Total);
        assert!("props".parse::<MarketKind>().is_err());
    }

    #[test]
    fn test_market_key_normalizes_total_side() {
        let key = MarketKey::new("g1", MarketKind::Total, " Over ");
        assert_eq!(key.side, "over");
        let key = MarketKey::new("g1", MarketKind::Spread, " Lakers ");
        assert_eq!(key.side, "Lakers");
    }

    #[test]
    fn test_fingerprint_ignores_timestamp() {
        let key = MarketKey::new("g1", MarketKind::Spread, "Lakers");
        let a = Quote::new(&key, "book_a", Some(-3.5), 1.91, ts(10));
        let b = Quote::new(&key, "book_a", Some(-3.5), 1.91, ts(12));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex_digest() {
        let key = MarketKey::new("g1", MarketKind::Moneyline, "Lakers");
        let q = Quote::new(&key, "book_a", None, 1.65, ts(10));
        let bytes = hex::decode(&q.fingerprint).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(hex::encode(&bytes), q.fingerprint);
        assert!(q.fingerprint.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_fingerprint_changes_with_values() {
        let key = MarketKey::new("g1", MarketKind::Spread, "Lakers");
        let a = Quote::new(&key, "book_a", Some(-3.5), 1.91, ts(10));
        let b = Quote::new(&key, "book_a", Some(-4.0), 1.91, ts(10));
        let c = Quote::new(&key, "book_b", Some(-3.5), 1.91, ts(10));
        let d = Quote::new(&key, "book_a", Some(-3.5), 1.95, ts(10));
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_ne!(a.fingerprint, d.fingerprint);
    }

    #[test]
    fn test_consensus_value_per_market() {
        let ml = Quote::new(&MarketKey::new("g", MarketKind::Moneyline, "A"), "s", None, 2.1, ts(1));
        assert_eq!(ml.consensus_value(), 2.1);
        let tot = Quote::new(&MarketKey::new("g", MarketKind::Total, "over"), "s", Some(221.5), 1.9, ts(1));
        assert_eq!(tot.consensus_value(), 221.5);
    }

    #[test]
    fn test_game_score_for() {
        let game = Game {
            game_id: "g1".into(),
            home_team: "Lakers".into(),
            away_team: "Celtics".into(),
            commence_time: Some(ts(19)),
            home_score: Some(110),
            away_score: Some(104),
            completed: true,
        };
        assert_eq!(game.score_for("lakers"), Some((110, 104)));
        assert_eq!(game.score_for("Celtics"), Some((104, 110)));
        assert_eq!(game.score_for("Knicks"), None);
        assert_eq!(game.total_points(), Some(214));
        assert!(game.has_started(ts(20)));
        assert!(!game.has_started(ts(18)));
    }

    #[test]
    fn test_unfinished_game_has_no_score() {
        let game = Game {
            game_id: "g1".into(),
            home_team: "Lakers".into(),
            away_team: "Celtics".into(),
            commence_time: None,
            home_score: None,
            away_score: None,
            completed: false,
        };
        assert_eq!(game.score_for("Lakers"), None);
        assert_eq!(game.total_points(), None);
        assert!(!game.has_started(ts(23)));
    }

    #[test]
    fn test_pick_status_terminal() {
        assert!(!PickStatus::Open.is_terminal());
        assert!(PickStatus::Settled.is_terminal());
        assert!(PickStatus::Void.is_terminal());
        assert_eq!(format!("{}", PickStatus::Void), "VOID");
    }

    #[test]
    fn test_enum_string_roundtrips() {
        for o in [PickOutcome::Win, PickOutcome::Loss, PickOutcome::Push] {
            assert_eq!(PickOutcome::parse(o.as_str()), Some(o));
        }
        for s in [PickStatus::Open, PickStatus::Settled, PickStatus::Void] {
            assert_eq!(PickStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MarketOutcome::parse("no_market"), Some(MarketOutcome::NoMarket));
        assert_eq!(ConsensusMethod::parse("median_mad"), Some(ConsensusMethod::MedianMad));
    }

    #[test]
    fn test_error_display() {
        let e = SharplineError::InvalidTransition {
            pick_id: "p1".into(),
            from: PickStatus::Settled,
            to: PickStatus::Void,
        };
        assert_eq!(e.to_string(), "Invalid transition for pick p1: SETTLED -> VOID");
    }
}
