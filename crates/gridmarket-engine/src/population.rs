//! Seeded construction of a starting market.

use std::collections::BTreeMap;

use gridmarket_models::{
    Agent, AgentId, AgentPayload, ConsumerState, CustomerRecord, MarketConfig, ProducerState,
    ProductionType, ProsumerState, RegulatorState, UtilityState,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::contracts::ContractBook;
use crate::error::MarketError;
use crate::registry::AgentRegistry;

pub const PERSONAS: [&str; 3] = ["eco_friendly", "profit_driven", "balanced"];

pub const REGULATOR_ID: &str = "regulator";

const PRODUCTION_TYPES: [ProductionType; 7] = [
    ProductionType::Oil,
    ProductionType::Gas,
    ProductionType::Coal,
    ProductionType::Nuclear,
    ProductionType::Solar,
    ProductionType::Wind,
    ProductionType::Hydro,
];

const PROSUMER_TYPES: [ProductionType; 2] = [ProductionType::Solar, ProductionType::Wind];

/// Create every agent and the initial contracts for `config`.
///
/// Consumers and prosumers are spread over the utilities as customers. Each
/// utility then contracts with producers it has no contract with yet until
/// its customers' needs are covered or producers run out of capacity. The
/// first delivery of those contracts happens at tick 0.
///
/// The same seed always yields the same market.
pub fn build(config: &MarketConfig) -> Result<(AgentRegistry, ContractBook), MarketError> {
    let population = &config.population;
    let initial_price = config.market.initial_price;
    let mut rng = ChaCha8Rng::seed_from_u64(population.seed);
    let mut registry = AgentRegistry::new();

    let mut retail: Vec<(AgentId, f64)> = Vec::new();

    for i in 0..population.consumers {
        let needs = rng.gen_range(80..150) as f64;
        let agent = Agent::new(
            format!("consumer_{i}"),
            pick_persona(&mut rng),
            rng.gen_range(1000..2000) as f64,
            AgentPayload::Consumer(ConsumerState::new(needs, rng.gen::<f64>())),
        );
        retail.push((agent.id.clone(), needs));
        registry.insert(agent)?;
    }

    for i in 0..population.prosumers {
        let needs = rng.gen_range(80..150) as f64;
        let production_type = *PROSUMER_TYPES
            .choose(&mut rng)
            .unwrap_or(&ProductionType::Solar);
        let agent = Agent::new(
            format!("prosumer_{i}"),
            pick_persona(&mut rng),
            rng.gen_range(1000..2000) as f64,
            AgentPayload::Prosumer(ProsumerState {
                energy_needs: needs,
                renewable_preference: rng.gen::<f64>(),
                production_type,
                max_production_capacity: rng.gen_range(50..100) as f64,
                storage_capacity: rng.gen_range(10..50) as f64,
                energy_stored: 0.0,
                current_production: 0.0,
                current_consumption: 0.0,
                selling_price: initial_price,
                maintenance_cost_rate: 0.05,
                upgrade_cost: 1000.0,
                upgrade_capacity_increase: 50.0,
                surplus_used: 0.0,
            }),
        );
        retail.push((agent.id.clone(), needs));
        registry.insert(agent)?;
    }

    let mut producer_ids = Vec::with_capacity(population.producers);
    for i in 0..population.producers {
        let base_cost = rng.gen_range(20..50) as f64;
        let margin = 0.15;
        let production_type = *PRODUCTION_TYPES
            .choose(&mut rng)
            .unwrap_or(&ProductionType::Oil);
        let agent = Agent::new(
            format!("producer_{i}"),
            pick_persona(&mut rng),
            rng.gen_range(20_000..50_000) as f64,
            AgentPayload::Producer(ProducerState {
                production_type,
                max_capacity: rng.gen_range(500..1000) as f64,
                base_production_cost: base_cost,
                maintenance_cost_rate: 0.02,
                upgrade_cost: 5000.0,
                upgrade_capacity_increase: 2000.0,
                min_profit_margin: margin,
                current_production: 0.0,
                current_price: ProducerState::opening_price(base_cost, margin),
                spot_sold: 0.0,
            }),
        );
        producer_ids.push(agent.id.clone());
        registry.insert(agent)?;
    }

    let mut utility_ids = Vec::with_capacity(population.utilities);
    for i in 0..population.utilities {
        let margin = 0.1;
        let agent = Agent::new(
            format!("utility_{i}"),
            pick_persona(&mut rng),
            rng.gen_range(20_000..50_000) as f64,
            AgentPayload::Utility(UtilityState {
                renewable_quota: 0.4 * rng.gen::<f64>(),
                min_profit_margin: margin,
                storage_capacity: rng.gen_range(400..1500) as f64,
                energy_stored: 0.0,
                contract_duration: rng.gen_range(2..6),
                current_selling_price: initial_price * (1.0 + margin),
                delivered_this_tick: 0.0,
                customers: BTreeMap::new(),
            }),
        );
        utility_ids.push(agent.id.clone());
        registry.insert(agent)?;
    }

    registry.insert(Agent::new(
        REGULATOR_ID,
        "balanced",
        0.0,
        AgentPayload::Regulator(RegulatorState::new(config.policy.carbon_tax_rate)),
    ))?;

    if utility_ids.is_empty() {
        return Ok((registry, ContractBook::new()));
    }

    for (customer_id, needs) in retail {
        let utility_id = &utility_ids[rng.gen_range(0..utility_ids.len())];
        registry.utility_mut(utility_id)?.customers.insert(
            customer_id,
            CustomerRecord {
                avg_consumption: needs,
                last_purchase: 0,
            },
        );
    }

    let mut contracts = ContractBook::new();
    for utility_id in &utility_ids {
        let utility = registry.utility(utility_id)?;
        let duration = utility.contract_duration;
        let mut remaining = utility.customer_demand();

        let mut candidates = producer_ids.clone();
        candidates.shuffle(&mut rng);
        for producer_id in candidates {
            if remaining <= 0.0 {
                break;
            }
            let capacity = registry.producer(&producer_id)?.max_capacity;
            let available = capacity - contracts.committed_capacity(&producer_id);
            if available <= 0.0 {
                continue;
            }
            let amount = remaining.min(available);
            contracts.negotiate(&registry, &producer_id, utility_id, amount, duration, 0)?;
            remaining -= amount;
        }
    }

    tracing::info!(
        agents = registry.len(),
        contracts = contracts.len(),
        seed = population.seed,
        "Population built"
    );
    Ok((registry, contracts))
}

fn pick_persona(rng: &mut ChaCha8Rng) -> &'static str {
    PERSONAS[rng.gen_range(0..PERSONAS.len())]
}
