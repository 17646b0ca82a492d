//! Deterministic heuristic decisions for every agent kind.
//!
//! Randomness (weather, wind) comes from a generator seeded by the population
//! seed, the tick and the agent ID, so a run is reproducible end to end.

use std::f64::consts::PI;

use async_trait::async_trait;
use gridmarket_models::{
    Action, AgentPayload, AgentView, ConsumerState, Decision, MarketConfig, MarketSnapshot, Offer,
    ProducerState, ProductionType, ProsumerState, TransactionKind, UtilityState,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::DecisionError;
use crate::provider::DecisionProvider;

/// Weight a renewable preference of 1.0 takes off a renewable offer's price.
const RENEWABLE_PRICE_BONUS: f64 = 0.2;
/// Share of a prosumer's surplus kept in storage rather than offered.
const SURPLUS_STORE_SHARE: f64 = 0.5;
/// Prosumers list slightly under the market average.
const PROSUMER_UNDERCUT: f64 = 0.95;
const UPGRADE_PAYBACK_TICKS: f64 = 60.0;
const MAX_NEW_CONTRACTS: usize = 3;
const PRODUCTION_SEARCH_STEPS: u32 = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedProvider;

impl RuleBasedProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionProvider for RuleBasedProvider {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn decide(
        &self,
        agent: &AgentView,
        market: &MarketSnapshot,
        config: &MarketConfig,
    ) -> Result<Decision, DecisionError> {
        let actions = match &agent.state {
            AgentPayload::Consumer(c) => consumer_actions(agent, c, market),
            AgentPayload::Prosumer(p) => {
                let mut rng = agent_rng(config.population.seed, market.tick, &agent.id);
                prosumer_actions(agent, p, market, &mut rng)
            }
            AgentPayload::Producer(p) => producer_actions(agent, p, market),
            AgentPayload::Utility(u) => utility_actions(agent, u, market),
            AgentPayload::Regulator(_) => Vec::new(),
        };
        Ok(Decision::new(actions))
    }
}

fn agent_rng(seed: u64, tick: u64, agent_id: &str) -> ChaCha8Rng {
    let mixed = agent_id
        .bytes()
        .fold(seed ^ tick.rotate_left(32), |h, b| h.rotate_left(5) ^ u64::from(b));
    ChaCha8Rng::seed_from_u64(mixed)
}

/// Buy orders covering `need` from the offers a buyer values most.
///
/// Offers are ranked by price, with renewable offers discounted by the buyer's
/// preference. Spending stops at the buyer's resources.
fn purchases(
    market: &MarketSnapshot,
    buyer_id: &str,
    need: f64,
    renewable_preference: f64,
    budget: f64,
) -> Vec<Action> {
    let effective = |offer: &Offer| {
        if offer.is_renewable {
            offer.price * (1.0 - RENEWABLE_PRICE_BONUS * renewable_preference)
        } else {
            offer.price
        }
    };
    let mut ranked: Vec<&Offer> = market
        .offers
        .iter()
        .filter(|o| o.amount > 0.0 && o.seller_id != buyer_id)
        .collect();
    ranked.sort_by(|a, b| effective(a).total_cmp(&effective(b)));

    let mut actions = Vec::new();
    let mut remaining = need;
    let mut budget = budget.max(0.0);
    for offer in ranked {
        if remaining <= 0.0 || budget <= 0.0 {
            break;
        }
        let mut amount = remaining.min(offer.amount);
        if offer.price > 0.0 {
            amount = amount.min(budget / offer.price);
        }
        if amount <= 0.0 {
            continue;
        }
        remaining -= amount;
        budget -= amount * offer.price;
        actions.push(Action::Buy {
            seller_id: offer.seller_id.clone(),
            amount,
        });
    }
    actions
}

fn consumer_actions(agent: &AgentView, c: &ConsumerState, market: &MarketSnapshot) -> Vec<Action> {
    purchases(
        market,
        &agent.id,
        c.energy_needs,
        c.renewable_preference,
        agent.resources,
    )
}

/// Output share for a plant of `kind` at `tick`.
fn production_factor(kind: ProductionType, tick: u64, rng: &mut ChaCha8Rng) -> f64 {
    match kind {
        ProductionType::Solar => {
            let hour = (tick % 24) as f64 / 24.0;
            let daylight = (PI * hour).sin().powi(2);
            daylight * rng.gen_range(0.7..1.0)
        }
        ProductionType::Wind => {
            // Box-Muller draw from N(0.7, 0.2).
            let u1 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let u2 = rng.gen::<f64>();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            (0.7 + 0.2 * z).clamp(0.0, 1.0)
        }
        _ => rng.gen_range(0.8..1.0),
    }
}

fn prosumer_actions(
    agent: &AgentView,
    p: &ProsumerState,
    market: &MarketSnapshot,
    rng: &mut ChaCha8Rng,
) -> Vec<Action> {
    let factor = production_factor(p.production_type, market.tick, rng);
    let level = p.max_production_capacity * factor;

    let target = market.average_price * PROSUMER_UNDERCUT;
    let mut actions = vec![
        Action::SetPrice {
            price: (p.selling_price + target) / 2.0,
        },
        Action::Produce { level },
    ];

    let balance = level - p.energy_needs;
    if balance > 0.0 {
        let room = (p.storage_capacity - p.energy_stored).max(0.0);
        let store = (balance * SURPLUS_STORE_SHARE).min(room);
        if store > 0.0 {
            actions.push(Action::MoveStorage { amount: store });
        }
    } else {
        let deficit = -balance;
        let withdraw = deficit.min(p.energy_stored);
        if withdraw > 0.0 {
            actions.push(Action::MoveStorage { amount: -withdraw });
        }
        actions.extend(purchases(
            market,
            &agent.id,
            deficit - withdraw,
            p.renewable_preference,
            agent.resources,
        ));
    }

    if agent.resources >= 2.0 * p.upgrade_cost && factor > 0.8 {
        actions.push(Action::Upgrade);
    }
    actions
}

/// Production covering contracts plus a capacity-weighted share of unmet
/// demand, cut back until the unit cost clears the current price.
fn production_level(agent: &AgentView, p: &ProducerState, market: &MarketSnapshot) -> f64 {
    let contracted = market
        .producers
        .get(&agent.id)
        .map_or(0.0, |s| s.contracted);
    let share = if market.total_capacity > 0.0 {
        p.max_capacity / market.total_capacity
    } else {
        0.0
    };
    let spot = (market.total_demand - market.total_supply).max(0.0) * share;
    let tax = if p.is_renewable() {
        0.0
    } else {
        market.carbon_tax_rate
    };
    let maintenance = p.max_capacity * p.maintenance_cost_rate;
    let floor = p.max_capacity * 0.01;

    let mut level = (contracted + spot).min(p.max_capacity);
    for _ in 0..PRODUCTION_SEARCH_STEPS {
        if level <= floor {
            return level.max(0.0);
        }
        let unit_cost = (level * (p.base_production_cost + tax) + maintenance) / level;
        if unit_cost * (1.0 + p.min_profit_margin) <= p.current_price {
            return level;
        }
        level *= 0.9;
    }
    floor
}

fn producer_price(p: &ProducerState, market: &MarketSnapshot) -> f64 {
    let tax = if p.is_renewable() {
        0.0
    } else {
        market.carbon_tax_rate
    };
    let min_price = (p.base_production_cost + tax) * (1.0 + p.min_profit_margin);
    let average = market.average_price;
    let utilization = utilization(p);
    let target = if utilization > 0.9 {
        (average * 1.1).max(min_price * 1.2)
    } else if utilization < 0.5 {
        (average * 0.9).max(min_price)
    } else {
        average.max(min_price)
    };
    (p.current_price + target) / 2.0
}

fn utilization(p: &ProducerState) -> f64 {
    if p.max_capacity > 0.0 {
        p.current_production / p.max_capacity
    } else {
        0.0
    }
}

fn producer_actions(agent: &AgentView, p: &ProducerState, market: &MarketSnapshot) -> Vec<Action> {
    let mut actions = vec![
        Action::SetPrice {
            price: producer_price(p, market),
        },
        Action::Produce {
            level: production_level(agent, p, market),
        },
    ];

    let expected_gain = p.upgrade_capacity_increase * p.current_price;
    let pays_back =
        expected_gain > 0.0 && p.upgrade_cost / expected_gain < UPGRADE_PAYBACK_TICKS;
    if agent.resources >= 2.0 * p.upgrade_cost && utilization(p) > 0.8 && pays_back {
        actions.push(Action::Upgrade);
    }
    actions
}

/// Mean unit price of the utility's recent purchases.
fn buying_price(agent: &AgentView) -> Option<f64> {
    let (value, volume) = agent
        .recent_transactions
        .iter()
        .filter(|t| t.kind == TransactionKind::Buy)
        .fold((0.0, 0.0), |(value, volume), t| {
            (value + t.total_value(), volume + t.amount)
        });
    (volume > 0.0).then(|| value / volume)
}

fn utility_price(agent: &AgentView, u: &UtilityState, market: &MarketSnapshot) -> f64 {
    let min_price =
        buying_price(agent).unwrap_or(market.average_price) * (1.0 + u.min_profit_margin);
    let average = market.average_price;
    let storage_ratio = if u.storage_capacity > 0.0 {
        u.energy_stored / u.storage_capacity
    } else {
        0.0
    };
    let target = if storage_ratio < 0.2 {
        (min_price * 1.2).max(average * 1.1)
    } else if storage_ratio > 0.8 {
        min_price.max(average * 0.95)
    } else {
        min_price.max(average)
    };
    (u.current_selling_price + target) / 2.0
}

/// Score a prospective contract; positive means worth signing.
fn contract_score(
    price: f64,
    average: f64,
    is_renewable: bool,
    short_on_renewables: bool,
    duration: u32,
) -> f64 {
    let price_score = if average > 0.0 {
        1.0 - price / average
    } else {
        0.0
    };
    let renewable_score = match (is_renewable, short_on_renewables) {
        (true, true) => 1.0,
        (true, false) => 0.5,
        (false, _) => 0.0,
    };
    let duration_score = (f64::from(duration) / 360.0).min(0.2);
    0.5 * price_score + 0.3 * renewable_score + 0.2 * duration_score
}

fn utility_actions(agent: &AgentView, u: &UtilityState, market: &MarketSnapshot) -> Vec<Action> {
    let (contracted, renewable_ratio) = market
        .utilities
        .get(&agent.id)
        .map_or((0.0, 0.0), |s| (s.contracted_supply, s.renewable_ratio));
    let demand = u.customer_demand();
    let short_on_renewables = renewable_ratio < u.renewable_quota;

    let mut actions = Vec::new();
    let mut shortfall = demand - contracted;
    // Preferred plant type first, then anything with spare capacity.
    for want_renewable in [short_on_renewables, !short_on_renewables] {
        for (producer_id, producer) in &market.producers {
            if shortfall <= 0.0 || actions.len() >= MAX_NEW_CONTRACTS {
                break;
            }
            if producer.is_renewable != want_renewable {
                continue;
            }
            let available = producer.capacity - producer.contracted;
            if available <= 0.0 || producer.capacity <= 0.0 {
                continue;
            }
            let amount = shortfall.min(available);
            let discount = (amount / producer.capacity * 0.2).min(0.1);
            let price = producer.price * (1.0 - discount);
            let score = contract_score(
                price,
                market.average_price,
                producer.is_renewable,
                short_on_renewables,
                u.contract_duration,
            );
            if score <= 0.0 {
                continue;
            }
            actions.push(Action::NegotiateContract {
                producer_id: producer_id.clone(),
                amount,
                duration: u.contract_duration,
            });
            shortfall -= amount;
        }
    }

    actions.push(Action::SetPrice {
        price: utility_price(agent, u, market),
    });

    let excess = contracted - demand;
    let room = (u.storage_capacity - u.energy_stored).max(0.0);
    if excess > 0.0 && room > 0.0 {
        actions.push(Action::MoveStorage {
            amount: excess.min(room),
        });
    }
    actions
}
