//! Strategy engine: gating, Kelly sizing and pick selection.

pub mod edge;
pub mod gates;
pub mod kelly;
pub mod odds;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{Consensus, ModelEstimate, Pick, PickStatus};
use gates::{evaluate, Candidate, GateDecision, GatePolicy};
use kelly::{KellyCalculator, SizedBet};

/// One selection to evaluate: the model's view plus the market's.
#[derive(Debug, Clone)]
pub struct StrategyInput {
    pub estimate: ModelEstimate,
    pub consensus: Consensus,
    pub commence_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every decision made during a strategy pass, including the
/// opportunities that were passed on and why.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionRecord {
    /// Passed every blocking check and sized to a stake.
    Selected { decision: GateDecision, bet: SizedBet },
    /// Stopped by at least one blocking check.
    GateRejected { decision: GateDecision },
    /// Passed the gate but the stake came out below the minimum.
    KellyRejected { decision: GateDecision },
}

impl DecisionRecord {
    pub fn decision(&self) -> &GateDecision {
        match self {
            DecisionRecord::Selected { decision, .. }
            | DecisionRecord::GateRejected { decision }
            | DecisionRecord::KellyRejected { decision } => decision,
        }
    }
}

/// Bounded in-memory history of recent decisions, shared with the API.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    entries: Arc<RwLock<VecDeque<DecisionRecord>>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub async fn extend(&self, records: impl IntoIterator<Item = DecisionRecord>) {
        let mut entries = self.entries.write().await;
        for record in records {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(record);
        }
    }

    /// Most recent first.
    pub async fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(500)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pipelines gate evaluation → Kelly sizing → ranking.
#[derive(Debug, Clone)]
pub struct StrategyOrchestrator {
    policy: GatePolicy,
    kelly: KellyCalculator,
}

impl StrategyOrchestrator {
    pub fn new(policy: GatePolicy, kelly: KellyCalculator) -> Self {
        Self { policy, kelly }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Evaluate every input. Returns the selected bets, best expected value
    /// first, and the full decision log for the pass.
    pub fn select_bets(
        &self,
        inputs: &[StrategyInput],
        now: DateTime<Utc>,
    ) -> (Vec<SizedBet>, Vec<DecisionRecord>) {
        let mut decisions = Vec::with_capacity(inputs.len());
        let mut selected = Vec::new();

        for input in inputs {
            let candidate = Candidate::new(&input.estimate, &input.consensus, input.commence_time, now);
            let decision = evaluate(&candidate, &self.policy);

            if !decision.is_bet() {
                debug!(
                    key = %decision.key,
                    reasons = ?decision.codes(),
                    "Gate rejected"
                );
                decisions.push(DecisionRecord::GateRejected { decision });
                continue;
            }

            match decision.edge.as_ref().and_then(|e| self.kelly.size_bet(e)) {
                Some(bet) => {
                    info!(
                        key = %decision.key,
                        price = bet.edge.price,
                        edge = format!("{:.1}%", bet.edge.edge * 100.0),
                        stake = %bet.stake_units,
                        warnings = ?decision.codes(),
                        "Bet selected"
                    );
                    selected.push(bet.clone());
                    decisions.push(DecisionRecord::Selected { decision, bet });
                }
                None => decisions.push(DecisionRecord::KellyRejected { decision }),
            }
        }

        selected.sort_by(|a, b| a.edge.cmp_best_first(&b.edge));

        info!(
            evaluated = inputs.len(),
            selected = selected.len(),
            "Strategy pass complete"
        );
        (selected, decisions)
    }

    /// Turn selected bets into OPEN picks.
    pub fn to_picks(bets: &[SizedBet], decisions: &[DecisionRecord], now: DateTime<Utc>) -> Vec<Pick> {
        bets.iter()
            .map(|b| {
                let line = decisions
                    .iter()
                    .map(DecisionRecord::decision)
                    .find(|d| d.key == b.edge.key)
                    .and_then(|d| d.line);
                Pick {
                    id: uuid::Uuid::new_v4().to_string(),
                    key: b.edge.key.clone(),
                    entry_line: line,
                    entry_price: b.edge.price,
                    stake_units: b.stake_units,
                    edge: b.edge.edge,
                    expected_value: b.edge.expected_value,
                    kelly_fraction: b.edge.kelly_fraction,
                    confidence: b.edge.probability,
                    status: PickStatus::Open,
                    created_at: now,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
