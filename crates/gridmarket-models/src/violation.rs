use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PriceGouging,
    MarketConcentration,
    RenewableQuota,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceGouging => "price_gouging",
            Self::MarketConcentration => "market_concentration",
            Self::RenewableQuota => "renewable_quota",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regulatory finding. Append-only, never mutated after detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub tick: u64,
    pub agent_id: AgentId,
    pub kind: ViolationKind,
    pub fine_amount: f64,
}
