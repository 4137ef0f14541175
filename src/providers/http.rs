//! JSON-over-HTTP odds feed.
//!
//! Speaks the common odds-aggregator shape: one event per game with a list
//! of bookmakers, each carrying `h2h` / `spreads` / `totals` markets.
//!
//! Odds:   GET {base}/sports/{sport}/odds?markets=..&oddsFormat=decimal&apiKey=..
//! Scores: GET {base}/sports/{sport}/scores?daysFrom=3&apiKey=..

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchRequest, OddsProvider, ProviderError, ProviderSnapshot, RawPrice, RawQuote};
use crate::types::{FinalScore, Game, MarketKind};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedEvent {
    id: String,
    #[serde(default)]
    commence_time: Option<DateTime<Utc>>,
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<FeedBookmaker>,
}

#[derive(Debug, Deserialize)]
struct FeedBookmaker {
    key: String,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    markets: Vec<FeedMarket>,
}

#[derive(Debug, Deserialize)]
struct FeedMarket {
    key: String,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    outcomes: Vec<FeedOutcome>,
}

#[derive(Debug, Deserialize)]
struct FeedOutcome {
    name: String,
    price: f64,
    #[serde(default)]
    point: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeedScoreEvent {
    id: String,
    #[serde(default)]
    completed: bool,
    home_team: String,
    away_team: String,
    #[serde(default)]
    scores: Option<Vec<FeedScore>>,
}

#[derive(Debug, Deserialize)]
struct FeedScore {
    name: String,
    score: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpOddsProvider {
    http: Client,
    name: String,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpOddsProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("SHARPLINE/0.1.0")
            .build()
            .context("Failed to build HTTP client for odds feed")?;

        Ok(Self {
            http,
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.map(SecretString::new),
            timeout,
        })
    }

    fn odds_url(&self, request: &FetchRequest) -> String {
        let markets: Vec<&str> = request.markets.iter().map(|m| feed_market(*m)).collect();
        let mut url = format!(
            "{}/sports/{}/odds?markets={}&oddsFormat=decimal&dateFormat=iso",
            self.base_url,
            urlencoding::encode(&request.sport),
            urlencoding::encode(&markets.join(",")),
        );
        self.push_key(&mut url);
        url
    }

    fn scores_url(&self, request: &FetchRequest) -> String {
        let mut url = format!(
            "{}/sports/{}/scores?daysFrom=3&dateFormat=iso",
            self.base_url,
            urlencoding::encode(&request.sport),
        );
        self.push_key(&mut url);
        url
    }

    fn push_key(&self, url: &mut String) {
        if let Some(key) = &self.api_key {
            url.push_str("&apiKey=");
            url.push_str(&urlencoding::encode(key.expose_secret()));
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let resp = self.http.get(url).send().await.map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = %status, "Odds feed returned error status");
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn classify(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else if e.is_connect() || e.is_builder() {
            ProviderError::Unreachable(e.without_url().to_string())
        } else {
            ProviderError::Transport(e.without_url().to_string())
        }
    }
}

#[async_trait]
impl OddsProvider for HttpOddsProvider {
    async fn fetch_odds(&self, request: &FetchRequest) -> Result<ProviderSnapshot, ProviderError> {
        debug!(provider = %self.name, sport = %request.sport, "Fetching odds");
        let events: Vec<FeedEvent> = self.get_json(&self.odds_url(request)).await?;
        Ok(snapshot_from_events(events))
    }

    async fn fetch_scores(&self, request: &FetchRequest) -> Result<Vec<FinalScore>, ProviderError> {
        debug!(provider = %self.name, sport = %request.sport, "Fetching scores");
        let events: Vec<FeedScoreEvent> = self.get_json(&self.scores_url(request)).await?;
        Ok(events.into_iter().filter_map(final_score).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn feed_market(market: MarketKind) -> &'static str {
    match market {
        MarketKind::Moneyline => "h2h",
        MarketKind::Spread => "spreads",
        MarketKind::Total => "totals",
    }
}

fn snapshot_from_events(events: Vec<FeedEvent>) -> ProviderSnapshot {
    let mut snapshot = ProviderSnapshot::default();
    for event in events {
        for book in &event.bookmakers {
            for market in &book.markets {
                let observed_at = market.last_update.or(book.last_update);
                for outcome in &market.outcomes {
                    snapshot.quotes.push(RawQuote {
                        game_id: event.id.clone(),
                        source: book.key.clone(),
                        market: market.key.clone(),
                        side: outcome.name.clone(),
                        line: outcome.point,
                        price: RawPrice::Decimal(outcome.price),
                        observed_at,
                    });
                }
            }
        }
        snapshot.games.push(Game {
            game_id: event.id,
            home_team: event.home_team,
            away_team: event.away_team,
            commence_time: event.commence_time,
            home_score: None,
            away_score: None,
            completed: false,
        });
    }
    snapshot
}

/// Final score of a completed event; `None` while in progress or when the
/// score is missing or unparseable.
fn final_score(event: FeedScoreEvent) -> Option<FinalScore> {
    if !event.completed {
        return None;
    }
    let scores = event.scores?;
    let score_of = |team: &str| {
        scores
            .iter()
            .find(|s| s.name == team)
            .and_then(|s| s.score.trim().parse::<i32>().ok())
    };
    Some(FinalScore {
        home_score: score_of(&event.home_team)?,
        away_score: score_of(&event.away_team)?,
        game_id: event.id,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ODDS_JSON: &str = r#"[
      {
        "id": "evt1",
        "sport_key": "basketball_nba",
        "commence_time": "2026-03-01T19:00:00Z",
        "home_team": "Lakers",
        "away_team": "Celtics",
        "bookmakers": [
          {
            "key": "pinnacle",
            "last_update": "2026-03-01T17:55:00Z",
            "markets": [
              { "key": "h2h", "last_update": "2026-03-01T17:54:00Z",
                "outcomes": [ {"name": "Lakers", "price": 1.8}, {"name": "Celtics", "price": 2.1} ] },
              { "key": "totals",
                "outcomes": [ {"name": "Over", "price": 1.91, "point": 221.5},
                              {"name": "Under", "price": 1.91, "point": 221.5} ] }
            ]
          }
        ]
      }
    ]"#;

    #[test]
    fn test_parse_odds_events() {
        let events: Vec<FeedEvent> = serde_json::from_str(ODDS_JSON).unwrap();
        let snap = snapshot_from_events(events);
        assert_eq!(snap.games.len(), 1);
        assert_eq!(snap.games[0].home_team, "Lakers");
        assert_eq!(snap.quotes.len(), 4);

        let over = snap.quotes.iter().find(|q| q.side == "Over").unwrap();
        assert_eq!(over.line, Some(221.5));
        assert_eq!(over.market, "totals");
        // Falls back to the bookmaker timestamp.
        assert_eq!(over.observed_at.unwrap().to_rfc3339(), "2026-03-01T17:55:00+00:00");

        let ml = snap.quotes.iter().find(|q| q.side == "Lakers").unwrap();
        assert_eq!(ml.price, RawPrice::Decimal(1.8));
        assert_eq!(ml.observed_at.unwrap().to_rfc3339(), "2026-03-01T17:54:00+00:00");
    }

    #[test]
    fn test_parse_scores() {
        let json = r#"[
          {"id": "evt1", "completed": true, "home_team": "Lakers", "away_team": "Celtics",
           "scores": [{"name": "Celtics", "score": "104"}, {"name": "Lakers", "score": "110"}]},
          {"id": "evt2", "completed": false, "home_team": "Knicks", "away_team": "Nets", "scores": null},
          {"id": "evt3", "completed": true, "home_team": "Heat", "away_team": "Magic", "scores": null}
        ]"#;
        let events: Vec<FeedScoreEvent> = serde_json::from_str(json).unwrap();
        let scores: Vec<_> = events.into_iter().filter_map(final_score).collect();
        assert_eq!(
            scores,
            vec![FinalScore { game_id: "evt1".into(), home_score: 110, away_score: 104 }]
        );
    }

    #[test]
    fn test_urls_encode_inputs_and_key() {
        let p = HttpOddsProvider::new(
            "feed",
            "https://feed.example.com/v4/",
            Some("k&y".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        let req = FetchRequest {
            sport: "basketball_nba".into(),
            markets: vec![MarketKind::Moneyline, MarketKind::Total],
        };
        assert_eq!(
            p.odds_url(&req),
            "https://feed.example.com/v4/sports/basketball_nba/odds?markets=h2h%2Ctotals&oddsFormat=decimal&dateFormat=iso&apiKey=k%26y"
        );
        assert!(p.scores_url(&req).ends_with("scores?daysFrom=3&dateFormat=iso&apiKey=k%26y"));
    }

    #[tokio::test]
    async fn test_unreachable_host_spends_no_budget() {
        // Nothing listens on port 9 of localhost.
        let p = HttpOddsProvider::new("feed", "http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let req = FetchRequest { sport: "nba".into(), markets: vec![MarketKind::Spread] };
        let err = p.fetch_odds(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)), "got {err:?}");
        assert!(!err.reached_network());
    }
}
