use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerSummary {
    pub capacity: f64,
    pub price: f64,
    pub production: f64,
    /// Capacity already promised to utilities under active contracts.
    pub contracted: f64,
    pub is_renewable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilitySummary {
    pub selling_price: f64,
    /// Share of the utility's contracts that are renewable.
    pub renewable_ratio: f64,
    pub contracted_supply: f64,
    pub contract_count: usize,
    pub customer_demand: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SellerKind {
    Utility,
    Prosumer,
}

/// An open sell-side offer visible to buyers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub seller_id: AgentId,
    pub seller_kind: SellerKind,
    pub price: f64,
    pub amount: f64,
    pub is_renewable: bool,
}

/// Immutable aggregate view of the market at one tick.
///
/// Maps are ordered so that two snapshots of the same state serialize to
/// identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub tick: u64,
    pub total_supply: f64,
    pub total_demand: f64,
    pub total_capacity: f64,
    pub total_energy_stored: f64,
    pub average_price: f64,
    /// Mean producer price. Falls back to the configured initial price.
    pub average_spot_price: f64,
    pub renewable_ratio: f64,
    /// Herfindahl-Hirschman index over producer capacity shares.
    pub market_concentration: f64,
    pub carbon_tax_rate: f64,
    pub producers: BTreeMap<AgentId, ProducerSummary>,
    pub utilities: BTreeMap<AgentId, UtilitySummary>,
    pub offers: Vec<Offer>,
}
