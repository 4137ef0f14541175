//! Mock odds feed for integration testing.
//!
//! Provides a deterministic `OddsProvider` implementation that returns a
//! fixed snapshot and fixed final scores, counts every call, and can be
//! switched into a failure mode. All state is in-memory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sharpline::providers::{
    FetchRequest, OddsProvider, ProviderError, ProviderSnapshot, RawPrice, RawQuote,
};
use sharpline::types::{FinalScore, Game};

pub struct MockFeed {
    name: String,
    snapshot: Mutex<ProviderSnapshot>,
    scores: Mutex<Vec<FinalScore>>,
    /// If set, every call fails as unreachable with this message.
    unreachable: Mutex<Option<String>>,
    odds_calls: AtomicUsize,
    score_calls: AtomicUsize,
}

impl MockFeed {
    pub fn new(name: &str, snapshot: ProviderSnapshot) -> Self {
        Self {
            name: name.to_string(),
            snapshot: Mutex::new(snapshot),
            scores: Mutex::new(Vec::new()),
            unreachable: Mutex::new(None),
            odds_calls: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_scores(&self, scores: Vec<FinalScore>) {
        *self.scores.lock().unwrap() = scores;
    }

    pub fn set_unreachable(&self, msg: &str) {
        *self.unreachable.lock().unwrap() = Some(msg.to_string());
    }

    pub fn odds_calls(&self) -> usize {
        self.odds_calls.load(Ordering::SeqCst)
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), ProviderError> {
        match self.unreachable.lock().unwrap().as_ref() {
            Some(msg) => Err(ProviderError::Unreachable(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OddsProvider for MockFeed {
    async fn fetch_odds(&self, _request: &FetchRequest) -> Result<ProviderSnapshot, ProviderError> {
        self.odds_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn fetch_scores(&self, _request: &FetchRequest) -> Result<Vec<FinalScore>, ProviderError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.scores.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn quote(source: &str, market: &str, side: &str, line: Option<f64>, price: f64, at: DateTime<Utc>) -> RawQuote {
    RawQuote {
        game_id: "nba-lal-bos".into(),
        source: source.into(),
        market: market.into(),
        side: side.into(),
        line,
        price: RawPrice::Decimal(price),
        observed_at: Some(at),
    }
}

/// One game starting at `start`, quoted by four books ten minutes before
/// `observed`. The fourth book hangs an outlier spread.
pub fn lakers_celtics(start: DateTime<Utc>, observed: DateTime<Utc>) -> ProviderSnapshot {
    let at = observed - Duration::minutes(10);
    let mut quotes = Vec::new();
    for book in ["book_a", "book_b", "book_c"] {
        quotes.push(quote(book, "spreads", "Lakers", Some(-3.5), 1.91, at));
        quotes.push(quote(book, "spreads", "Celtics", Some(3.5), 1.91, at));
        quotes.push(quote(book, "h2h", "Lakers", None, 1.65, at));
        quotes.push(quote(book, "h2h", "Celtics", None, 2.30, at));
        quotes.push(quote(book, "totals", "Over", Some(221.5), 1.91, at));
    }
    quotes.push(quote("book_d", "spreads", "Lakers", Some(-10.0), 1.91, at));
    // Malformed: spread without a line.
    quotes.push(quote("book_d", "spreads", "Celtics", None, 1.91, at));

    ProviderSnapshot {
        games: vec![Game {
            game_id: "nba-lal-bos".into(),
            home_team: "Lakers".into(),
            away_team: "Celtics".into(),
            commence_time: Some(start),
            home_score: None,
            away_score: None,
            completed: false,
        }],
        quotes,
    }
}
