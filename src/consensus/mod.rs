//! Consensus builder: one robust line per market key from many sources.
//!
//! Every source contributes only its latest quote at or before the cutoff.
//! Values far from the median (more than `max(0.5, 3 × MAD)`) are dropped as
//! outliers and the consensus is the median of the survivors. The result
//! depends only on the set of quotes, never on their order.

pub mod closing;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::storage::quotes::QuoteStore;
use crate::types::{Consensus, ConsensusMethod, ConsensusResult, MarketKey, MarketKind, Quote};

/// Smallest outlier threshold, in line points (or decimal-odds units for
/// moneyline). Keeps a tight market from rejecting half-point disagreements.
pub const MIN_OUTLIER_THRESHOLD: f64 = 0.5;

/// Outlier threshold in multiples of the median absolute deviation.
pub const MAD_MULTIPLIER: f64 = 3.0;

/// Build the consensus for `key` from `quotes` as of `cutoff`.
///
/// Quotes for other keys, observed after the cutoff, or spread/total quotes
/// without a line are ignored.
pub fn build_consensus(key: &MarketKey, quotes: &[Quote], cutoff: DateTime<Utc>) -> Consensus {
    let latest = latest_per_source(key, quotes, cutoff);

    if latest.is_empty() {
        debug!(%key, %cutoff, "No quotes before cutoff");
        return Consensus::Unavailable {
            key: key.clone(),
            cutoff,
        };
    }

    if let (1, Some((source, q))) = (latest.len(), latest.iter().next()) {
        return Consensus::Available(ConsensusResult {
            key: key.clone(),
            line: q.line,
            price: q.price,
            cutoff,
            sample_count: 1,
            sources: vec![source.to_string()],
            outliers_removed: 0,
            method: ConsensusMethod::SingleSource,
            latest_observed_at: q.observed_at,
            oldest_observed_at: q.observed_at,
        });
    }

    let values: Vec<f64> = latest.values().map(|q| q.consensus_value()).collect();
    let center = median(&values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    let mad = median(&deviations);
    let threshold = (MAD_MULTIPLIER * mad).max(MIN_OUTLIER_THRESHOLD);

    let survivors: Vec<(&str, &Quote)> = latest
        .iter()
        .filter(|(_, q)| (q.consensus_value() - center).abs() <= threshold)
        .map(|(s, q)| (*s, *q))
        .collect();
    let outliers_removed = latest.len() - survivors.len();

    let survivor_values: Vec<f64> = survivors.iter().map(|(_, q)| q.consensus_value()).collect();
    let value = median(&survivor_values);

    // Sources iterate in lexicographic order, so strict `<` keeps the
    // smallest source id among equally close survivors.
    let distance = |q: &Quote| (q.consensus_value() - value).abs();
    let Some(closest) = survivors
        .iter()
        .map(|(_, q)| *q)
        .reduce(|best, q| if distance(q) < distance(best) { q } else { best })
    else {
        return Consensus::Unavailable {
            key: key.clone(),
            cutoff,
        };
    };

    let line = match key.market {
        MarketKind::Moneyline => None,
        MarketKind::Spread | MarketKind::Total => Some(value),
    };
    let observed = survivors.iter().map(|(_, q)| q.observed_at);
    let latest_observed_at = observed.clone().max().unwrap_or(cutoff);
    let oldest_observed_at = observed.min().unwrap_or(cutoff);

    if outliers_removed > 0 {
        debug!(
            %key,
            median = center,
            mad,
            threshold,
            outliers_removed,
            "Outlier quotes rejected"
        );
    }

    Consensus::Available(ConsensusResult {
        key: key.clone(),
        line,
        price: closest.price,
        cutoff,
        sample_count: survivors.len(),
        sources: survivors.iter().map(|(s, _)| s.to_string()).collect(),
        outliers_removed,
        method: ConsensusMethod::MedianMad,
        latest_observed_at,
        oldest_observed_at,
    })
}

/// Load quotes from the store and build the consensus at `cutoff`.
pub async fn consensus_at(
    store: &QuoteStore,
    key: &MarketKey,
    cutoff: DateTime<Utc>,
) -> Result<Consensus> {
    let quotes = store.quotes_at(key, cutoff).await?;
    Ok(build_consensus(key, &quotes, cutoff))
}

/// Consensus at `now` from quotes observed within `max_age` of it.
///
/// A source whose latest quote is older than `max_age` does not contribute,
/// so one stale book cannot pull the line or hold back a fresh market.
pub async fn fresh_consensus_at(
    store: &QuoteStore,
    key: &MarketKey,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<Consensus> {
    let horizon = now - max_age;
    let quotes: Vec<Quote> = store
        .quotes_at(key, now)
        .await?
        .into_iter()
        .filter(|q| q.observed_at >= horizon)
        .collect();
    Ok(build_consensus(key, &quotes, now))
}

/// Latest usable quote per source, keyed (and therefore ordered) by source.
/// Ties on observation time go to the greater fingerprint.
fn latest_per_source<'a>(
    key: &MarketKey,
    quotes: &'a [Quote],
    cutoff: DateTime<Utc>,
) -> BTreeMap<&'a str, &'a Quote> {
    let mut latest: BTreeMap<&str, &Quote> = BTreeMap::new();
    for q in quotes {
        if q.game_id != key.game_id || q.market != key.market || q.side != key.side {
            continue;
        }
        if q.observed_at > cutoff || !q.consensus_value().is_finite() {
            continue;
        }
        match latest.get(q.source.as_str()) {
            Some(cur)
                if (cur.observed_at, cur.fingerprint.as_str())
                    >= (q.observed_at, q.fingerprint.as_str()) => {}
            _ => {
                latest.insert(q.source.as_str(), q);
            }
        }
    }
    latest
}

/// Median of a non-empty slice; the mean of the two middle values for an
/// even count.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
