//! Quality gate pipeline.
//!
//! A fixed, ordered list of pure checks. Every check runs on every
//! candidate, every failure is recorded with its reason code and severity,
//! and the verdict is BET exactly when no blocking check failed. Nothing in
//! here returns an error: bad or missing inputs become reason codes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use super::edge::Edge;
use crate::config::{GatesConfig, StakingConfig};
use crate::types::{Consensus, MarketKey, ModelEstimate, SharplineError};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything the gate looks at for one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub key: MarketKey,
    /// Consensus line at entry; `None` for moneyline or when no market.
    pub line: Option<f64>,
    /// Consensus price; `None` when no market is available.
    pub price: Option<f64>,
    pub probability: f64,
    pub quote_observed_at: Option<DateTime<Utc>>,
    pub stats_updated_at: Option<DateTime<Utc>>,
    pub sample_size: u32,
    /// Independent sources behind the consensus.
    pub source_count: usize,
    pub commence_time: Option<DateTime<Utc>>,
    pub evaluated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(
        estimate: &ModelEstimate,
        consensus: &Consensus,
        commence_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let result = consensus.result();
        Self {
            key: estimate.key(),
            line: result.and_then(|r| r.line),
            price: result.map(|r| r.price),
            probability: estimate.probability,
            quote_observed_at: result.map(|r| r.oldest_observed_at),
            stats_updated_at: estimate.stats_updated_at,
            sample_size: estimate.sample_size,
            source_count: result.map(|r| r.sample_count).unwrap_or(0),
            commence_time,
            evaluated_at: now,
        }
    }

    pub fn quote_age(&self) -> Option<Duration> {
        self.quote_observed_at.map(|t| self.evaluated_at - t)
    }

    pub fn stats_age(&self) -> Option<Duration> {
        self.stats_updated_at.map(|t| self.evaluated_at - t)
    }
}

/// Thresholds the checks compare against.
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    pub min_ev: f64,
    pub min_edge: f64,
    pub max_quote_age: Duration,
    pub max_stats_age: Duration,
    pub min_sample_size: u32,
    pub min_sources: usize,
    pub kelly_multiplier: f64,
}

impl GatePolicy {
    pub fn from_config(gates: &GatesConfig, staking: &StakingConfig) -> Self {
        Self {
            min_ev: gates.min_ev,
            min_edge: gates.min_edge,
            max_quote_age: hours(gates.max_quote_age_hours),
            max_stats_age: hours(gates.max_stats_age_hours),
            min_sample_size: gates.min_sample_size,
            min_sources: gates.min_sources,
            kelly_multiplier: staking.kelly_multiplier,
        }
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from_config(&GatesConfig::default(), &StakingConfig::default())
    }
}

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoOddsRecent,
    StatsStale,
    InsufficientSample,
    MissingCommenceTime,
    GameStarted,
    InvalidProbability,
    EdgeBelowMin,
    EvBelowMin,
    LowLiquidity,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NoOddsRecent => "NO_ODDS_RECENT",
            ReasonCode::StatsStale => "STATS_STALE",
            ReasonCode::InsufficientSample => "INSUFFICIENT_SAMPLE",
            ReasonCode::MissingCommenceTime => "MISSING_COMMENCE_TIME",
            ReasonCode::GameStarted => "GAME_STARTED",
            ReasonCode::InvalidProbability => "INVALID_PROBABILITY",
            ReasonCode::EdgeBelowMin => "EDGE_BELOW_MIN",
            ReasonCode::EvBelowMin => "EV_BELOW_MIN",
            ReasonCode::LowLiquidity => "LOW_LIQUIDITY",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocking,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateReason {
    pub code: ReasonCode,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass,
    Fail(GateReason),
}

fn fail(code: ReasonCode, severity: Severity, detail: impl Into<String>) -> CheckOutcome {
    CheckOutcome::Fail(GateReason {
        code,
        severity,
        detail: detail.into(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Bet,
    NoBet,
}

/// Auditable gate output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    pub key: MarketKey,
    pub verdict: Verdict,
    /// Failed checks in pipeline order.
    pub reasons: Vec<GateReason>,
    pub line: Option<f64>,
    pub price: Option<f64>,
    pub probability: f64,
    pub edge: Option<Edge>,
    pub decided_at: DateTime<Utc>,
}

impl GateDecision {
    pub fn is_bet(&self) -> bool {
        self.verdict == Verdict::Bet
    }

    pub fn codes(&self) -> Vec<ReasonCode> {
        self.reasons.iter().map(|r| r.code).collect()
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Edge is `None` when it could not be measured (no price, bad probability).
type Check = fn(&Candidate, &GatePolicy, Option<&Edge>) -> CheckOutcome;

/// Pipeline order.
pub const CHECKS: &[(&str, Check)] = &[
    ("quote_recency", check_quote_recency),
    ("stats_recency", check_stats_recency),
    ("sample_size", check_sample_size),
    ("commence_time", check_commence_time),
    ("not_started", check_not_started),
    ("probability", check_probability),
    ("min_edge", check_min_edge),
    ("min_ev", check_min_ev),
    ("liquidity", check_liquidity),
];

fn check_quote_recency(c: &Candidate, p: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    match (c.price, c.quote_age()) {
        (Some(_), Some(age)) if age <= p.max_quote_age => CheckOutcome::Pass,
        (Some(_), Some(age)) => fail(
            ReasonCode::NoOddsRecent,
            Severity::Blocking,
            format!("oldest contributing quote is {}m old", age.num_minutes()),
        ),
        _ => fail(
            ReasonCode::NoOddsRecent,
            Severity::Blocking,
            SharplineError::InsufficientData(format!("{} consensus", c.key)).to_string(),
        ),
    }
}

fn check_stats_recency(c: &Candidate, p: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    match c.stats_age() {
        Some(age) if age <= p.max_stats_age => CheckOutcome::Pass,
        Some(age) => fail(
            ReasonCode::StatsStale,
            Severity::Blocking,
            format!("stats are {}h old", age.num_hours()),
        ),
        None => fail(ReasonCode::StatsStale, Severity::Blocking, "stats timestamp missing"),
    }
}

fn check_sample_size(c: &Candidate, p: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    if c.sample_size >= p.min_sample_size {
        CheckOutcome::Pass
    } else {
        fail(
            ReasonCode::InsufficientSample,
            Severity::Blocking,
            format!("sample {} < {}", c.sample_size, p.min_sample_size),
        )
    }
}

fn check_commence_time(c: &Candidate, _: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    if c.commence_time.is_some() {
        CheckOutcome::Pass
    } else {
        fail(ReasonCode::MissingCommenceTime, Severity::Blocking, "commence time unknown")
    }
}

fn check_not_started(c: &Candidate, _: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    match c.commence_time {
        Some(t) if c.evaluated_at >= t => {
            fail(ReasonCode::GameStarted, Severity::Blocking, "game already started")
        }
        _ => CheckOutcome::Pass,
    }
}

fn check_probability(c: &Candidate, _: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    if c.probability.is_finite() && c.probability > 0.0 && c.probability < 1.0 {
        CheckOutcome::Pass
    } else {
        fail(
            ReasonCode::InvalidProbability,
            Severity::Blocking,
            format!("probability {} outside (0, 1)", c.probability),
        )
    }
}

fn check_min_edge(_: &Candidate, p: &GatePolicy, e: Option<&Edge>) -> CheckOutcome {
    match e {
        Some(e) if e.edge < p.min_edge => fail(
            ReasonCode::EdgeBelowMin,
            Severity::Blocking,
            format!("edge {:.4} < {:.4}", e.edge, p.min_edge),
        ),
        _ => CheckOutcome::Pass,
    }
}

fn check_min_ev(_: &Candidate, p: &GatePolicy, e: Option<&Edge>) -> CheckOutcome {
    match e {
        Some(e) if e.expected_value < p.min_ev => fail(
            ReasonCode::EvBelowMin,
            Severity::Blocking,
            format!("ev {:.4} < {:.4}", e.expected_value, p.min_ev),
        ),
        _ => CheckOutcome::Pass,
    }
}

fn check_liquidity(c: &Candidate, p: &GatePolicy, _: Option<&Edge>) -> CheckOutcome {
    if c.source_count >= p.min_sources || c.price.is_none() {
        CheckOutcome::Pass
    } else {
        fail(
            ReasonCode::LowLiquidity,
            Severity::Warning,
            format!("{} sources < {}", c.source_count, p.min_sources),
        )
    }
}

/// Run every check and combine the results.
pub fn evaluate(candidate: &Candidate, policy: &GatePolicy) -> GateDecision {
    let edge = candidate.price.and_then(|price| {
        Edge::measure(&candidate.key, candidate.probability, price, policy.kelly_multiplier).ok()
    });

    let reasons: Vec<GateReason> = CHECKS
        .iter()
        .filter_map(|(_, check)| match check(candidate, policy, edge.as_ref()) {
            CheckOutcome::Pass => None,
            CheckOutcome::Fail(reason) => Some(reason),
        })
        .collect();

    let verdict = if reasons.iter().any(|r| r.severity == Severity::Blocking) {
        Verdict::NoBet
    } else {
        Verdict::Bet
    };

    GateDecision {
        key: candidate.key.clone(),
        verdict,
        reasons,
        line: candidate.line,
        price: candidate.price,
        probability: candidate.probability,
        edge,
        decided_at: candidate.evaluated_at,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
