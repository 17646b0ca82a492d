use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId(pub u64);

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "contract-{}", self.0)
    }
}

/// Multi-tick supply agreement between a producer and a utility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: ContractId,
    pub producer_id: AgentId,
    pub utility_id: AgentId,
    /// Energy delivered per tick.
    pub amount: f64,
    /// Unit price, fixed at formation.
    pub price: f64,
    pub total_duration: u32,
    pub remaining_duration: u32,
    pub is_renewable: bool,
    pub formed_at: u64,
    /// Tick of the most recent delivery, if any.
    pub last_delivery: Option<u64>,
}

impl Contract {
    /// Value paid by the utility for one delivery.
    pub fn delivery_value(&self) -> f64 {
        self.amount * self.price
    }

    pub fn is_between(&self, producer_id: &str, utility_id: &str) -> bool {
        self.producer_id == producer_id && self.utility_id == utility_id
    }

    pub fn delivered_at(&self, tick: u64) -> bool {
        self.last_delivery == Some(tick)
    }
}
