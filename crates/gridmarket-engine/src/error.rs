use gridmarket_models::{AgentId, AgentKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    #[error("Invalid action: {0}")]
    Validation(String),

    #[error("Producer {producer_id} cannot take {requested:.2} more, {available:.2} available")]
    CapacityExceeded {
        producer_id: AgentId,
        requested: f64,
        available: f64,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("{kind} agent {agent_id} cannot {operation}")]
    WrongKind {
        agent_id: AgentId,
        kind: AgentKind,
        operation: &'static str,
    },

    #[error("Agent {agent_id} needs {required:.2} but holds {available:.2}")]
    InsufficientResources {
        agent_id: AgentId,
        required: f64,
        available: f64,
    },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(AgentId),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl MarketError {
    /// Fatal errors indicate a defect and abort the run. Everything else only
    /// rejects the action that caused it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    pub(crate) fn wrong_kind(agent_id: &str, kind: AgentKind, operation: &'static str) -> Self {
        Self::WrongKind {
            agent_id: agent_id.to_string(),
            kind,
            operation,
        }
    }
}
