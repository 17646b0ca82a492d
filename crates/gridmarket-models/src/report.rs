use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::agent::{AgentId, AgentKind};
use crate::contract::Contract;
use crate::snapshot::MarketSnapshot;
use crate::violation::Violation;

/// How one agent's balance moved during a tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDelta {
    pub agent_id: AgentId,
    pub kind: AgentKind,
    pub resources_before: f64,
    pub resources_after: f64,
    pub profit_delta: f64,
    pub bought_value: f64,
    pub sold_value: f64,
    pub cost_value: f64,
}

/// An action that failed validation or policy at commit time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedAction {
    pub agent_id: AgentId,
    pub action: Action,
    pub reason: String,
}

/// Immutable record emitted once per settled tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub settled_at: DateTime<Utc>,
    /// Market state after commit and settlement.
    pub snapshot: MarketSnapshot,
    pub agent_deltas: Vec<AgentDelta>,
    pub violations: Vec<Violation>,
    pub rejected_actions: Vec<RejectedAction>,
    pub expired_contracts: Vec<Contract>,
    /// Agents whose decision failed or timed out and fell back to the default.
    pub defaulted_agents: Vec<AgentId>,
}

impl TickReport {
    pub fn total_fines(&self) -> f64 {
        self.violations.iter().map(|v| v.fine_amount).sum()
    }

    pub fn delta_for(&self, agent_id: &str) -> Option<&AgentDelta> {
        self.agent_deltas.iter().find(|d| d.agent_id == agent_id)
    }
}
