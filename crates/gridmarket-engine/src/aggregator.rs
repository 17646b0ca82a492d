//! Market-wide statistics computed from agent state.

use std::collections::BTreeMap;

use gridmarket_models::{
    AgentPayload, MarketParams, MarketSnapshot, Offer, PolicyConfig, ProducerSummary, SellerKind,
    Tradable, UtilitySummary,
};

use crate::contracts::ContractBook;
use crate::registry::AgentRegistry;

/// Build the snapshot for `tick`. Pure: reads state, never mutates it.
pub fn snapshot(
    registry: &AgentRegistry,
    contracts: &ContractBook,
    tick: u64,
    params: &MarketParams,
    policy: &PolicyConfig,
) -> MarketSnapshot {
    let mut producers = BTreeMap::new();
    let mut utilities = BTreeMap::new();
    let mut offers = Vec::new();
    let mut selling_prices = Vec::new();
    let mut producer_prices = Vec::new();

    let mut total_supply = 0.0;
    let mut renewable_supply = 0.0;
    let mut total_demand = 0.0;
    let mut total_capacity = 0.0;
    let mut total_energy_stored = 0.0;

    for agent in registry.iter() {
        match &agent.payload {
            AgentPayload::Consumer(c) => total_demand += c.energy_needs,
            AgentPayload::Prosumer(p) => {
                total_demand += p.energy_needs;
                total_energy_stored += p.energy_stored;
                let surplus = p.surplus();
                if p.energy_stored > 0.0 || surplus > 0.0 {
                    offers.push(Offer {
                        seller_id: agent.id.clone(),
                        seller_kind: SellerKind::Prosumer,
                        price: p.selling_price,
                        amount: p.energy_stored + surplus,
                        is_renewable: true,
                    });
                }
            }
            AgentPayload::Producer(p) => {
                total_supply += p.current_production;
                if p.is_renewable() {
                    renewable_supply += p.current_production;
                }
                total_capacity += p.max_capacity;
                selling_prices.push(p.current_price);
                producer_prices.push(p.current_price);
                producers.insert(
                    agent.id.clone(),
                    ProducerSummary {
                        capacity: p.max_capacity,
                        price: p.current_price,
                        production: p.current_production,
                        contracted: contracts.committed_capacity(&agent.id),
                        is_renewable: p.is_renewable(),
                    },
                );
            }
            AgentPayload::Utility(u) => {
                total_energy_stored += u.energy_stored;
                selling_prices.push(u.current_selling_price);

                let mut contracted_supply = 0.0;
                let mut contract_count = 0;
                let mut renewable_count = 0;
                for contract in contracts.for_utility(&agent.id) {
                    contracted_supply += contract.amount;
                    contract_count += 1;
                    if contract.is_renewable {
                        renewable_count += 1;
                    }
                }
                let renewable_ratio = if contract_count > 0 {
                    renewable_count as f64 / contract_count as f64
                } else {
                    0.0
                };

                utilities.insert(
                    agent.id.clone(),
                    UtilitySummary {
                        selling_price: u.current_selling_price,
                        renewable_ratio,
                        contracted_supply,
                        contract_count,
                        customer_demand: u.customer_demand(),
                    },
                );
                offers.push(Offer {
                    seller_id: agent.id.clone(),
                    seller_kind: SellerKind::Utility,
                    price: u.current_selling_price,
                    amount: contracted_supply,
                    is_renewable: u.sells_renewable(),
                });
            }
            AgentPayload::Regulator(_) => {}
        }
    }

    let market_concentration = if total_capacity > 0.0 {
        producers
            .values()
            .map(|p| (p.capacity / total_capacity).powi(2))
            .sum()
    } else {
        0.0
    };

    MarketSnapshot {
        tick,
        total_supply,
        total_demand,
        total_capacity,
        total_energy_stored,
        average_price: mean(&selling_prices).unwrap_or(params.initial_price),
        average_spot_price: mean(&producer_prices).unwrap_or(params.initial_price),
        renewable_ratio: if total_supply > 0.0 {
            renewable_supply / total_supply
        } else {
            0.0
        },
        market_concentration,
        carbon_tax_rate: registry
            .carbon_tax_rate()
            .unwrap_or(policy.carbon_tax_rate),
        producers,
        utilities,
        offers,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
