//! Regulatory rules: violation detection, fines and carbon-tax adjustment.

use gridmarket_models::{CostReason, MarketSnapshot, PolicyConfig, Violation, ViolationKind};

use crate::error::MarketError;
use crate::ledger::Ledger;
use crate::registry::AgentRegistry;

pub const PRICE_GOUGING_MULTIPLIER: f64 = 2.0;
pub const CONCENTRATION_MULTIPLIER: f64 = 10_000.0;
pub const RENEWABLE_QUOTA_MULTIPLIER: f64 = 5_000.0;

/// Producers fined when the market is too concentrated.
const CONCENTRATION_OFFENDERS: usize = 2;

/// Check a snapshot against the thresholds.
///
/// Deterministic for a given snapshot. Violations come out grouped by rule:
/// price gouging (producers, then utilities, each by ID), concentration,
/// renewable quota.
pub fn detect(snapshot: &MarketSnapshot, policy: &PolicyConfig, tick: u64) -> Vec<Violation> {
    let mut violations = Vec::new();

    let price_cap = snapshot.average_price * (1.0 + policy.max_price_increase);
    let prices = snapshot
        .producers
        .iter()
        .map(|(id, p)| (id, p.price))
        .chain(snapshot.utilities.iter().map(|(id, u)| (id, u.selling_price)));
    for (id, price) in prices {
        if price > price_cap {
            violations.push(Violation {
                tick,
                agent_id: id.clone(),
                kind: ViolationKind::PriceGouging,
                fine_amount: (price - price_cap) * PRICE_GOUGING_MULTIPLIER,
            });
        }
    }

    let hhi = snapshot.market_concentration;
    if hhi > policy.concentration_threshold {
        let mut by_capacity: Vec<_> = snapshot.producers.iter().collect();
        by_capacity.sort_by(|(a_id, a), (b_id, b)| {
            b.capacity.total_cmp(&a.capacity).then_with(|| a_id.cmp(b_id))
        });
        let fine_amount = (hhi - policy.concentration_threshold) * CONCENTRATION_MULTIPLIER;
        for (id, _) in by_capacity.into_iter().take(CONCENTRATION_OFFENDERS) {
            violations.push(Violation {
                tick,
                agent_id: id.clone(),
                kind: ViolationKind::MarketConcentration,
                fine_amount,
            });
        }
    }

    for (id, utility) in &snapshot.utilities {
        if utility.renewable_ratio < policy.min_renewable_ratio {
            violations.push(Violation {
                tick,
                agent_id: id.clone(),
                kind: ViolationKind::RenewableQuota,
                fine_amount: (policy.min_renewable_ratio - utility.renewable_ratio)
                    * RENEWABLE_QUOTA_MULTIPLIER,
            });
        }
    }

    violations
}

/// Levy each fine as a `cost` transaction and append it to the regulator's
/// audit log. The money leaves the market.
///
/// A fine the ledger refuses, such as one that overflowed, is logged and
/// dropped. Returns the violations actually levied.
pub fn apply_fines(
    ledger: &mut Ledger,
    registry: &mut AgentRegistry,
    violations: Vec<Violation>,
) -> Result<Vec<Violation>, MarketError> {
    let mut levied = Vec::with_capacity(violations.len());
    for violation in violations {
        let result = ledger.record_cost(
            registry,
            violation.tick,
            &violation.agent_id,
            violation.fine_amount,
            1.0,
            CostReason::Fine(violation.kind),
        );
        match result {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    tick = violation.tick,
                    agent = %violation.agent_id,
                    kind = %violation.kind,
                    error = %e,
                    "Fine not levied"
                );
                continue;
            }
        }
        tracing::info!(
            tick = violation.tick,
            agent = %violation.agent_id,
            kind = %violation.kind,
            fine = violation.fine_amount,
            "Violation fined"
        );
        levied.push(violation);
    }
    if let Some(regulator) = registry.regulator_mut() {
        regulator.violations.extend_from_slice(&levied);
    }
    Ok(levied)
}

/// Next carbon-tax rate given the market's renewable share.
///
/// Raised 10% below target, lowered 5% above 1.5x target, never under the floor.
pub fn adjust_carbon_tax(current: f64, renewable_ratio: f64, policy: &PolicyConfig) -> f64 {
    let target = policy.min_renewable_ratio;
    let next = if renewable_ratio < target {
        current * 1.1
    } else if renewable_ratio > target * 1.5 {
        current * 0.95
    } else {
        current
    };
    next.max(policy.carbon_tax_floor)
}

/// Update the regulator's tax rate and monitoring history from a settled snapshot.
pub fn monitor(registry: &mut AgentRegistry, snapshot: &MarketSnapshot, policy: &PolicyConfig) {
    let Some(regulator) = registry.regulator_mut() else {
        return;
    };
    let previous = regulator.current_carbon_tax;
    regulator.current_carbon_tax = adjust_carbon_tax(previous, snapshot.renewable_ratio, policy);
    regulator.observe(
        snapshot.average_price,
        snapshot.renewable_ratio,
        snapshot.market_concentration,
    );
    if regulator.current_carbon_tax != previous {
        tracing::debug!(
            tick = snapshot.tick,
            from = previous,
            to = regulator.current_carbon_tax,
            "Carbon tax adjusted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmarket_models::{
        Agent, AgentPayload, ConsumerState, ProducerSummary, RegulatorState, UtilitySummary,
    };

    fn producer(capacity: f64, price: f64) -> ProducerSummary {
        ProducerSummary {
            capacity,
            price,
            production: 0.0,
            contracted: 0.0,
            is_renewable: false,
        }
    }

    fn utility(price: f64, renewable_ratio: f64) -> UtilitySummary {
        UtilitySummary {
            selling_price: price,
            renewable_ratio,
            contracted_supply: 0.0,
            contract_count: 0,
            customer_demand: 0.0,
        }
    }

    fn snapshot(
        producers: Vec<(&str, ProducerSummary)>,
        utilities: Vec<(&str, UtilitySummary)>,
        average_price: f64,
        hhi: f64,
    ) -> MarketSnapshot {
        MarketSnapshot {
            tick: 0,
            total_supply: 0.0,
            total_demand: 0.0,
            total_capacity: 0.0,
            total_energy_stored: 0.0,
            average_price,
            average_spot_price: average_price,
            renewable_ratio: 0.0,
            market_concentration: hhi,
            carbon_tax_rate: 10.0,
            producers: producers
                .into_iter()
                .map(|(id, p)| (id.to_string(), p))
                .collect(),
            utilities: utilities
                .into_iter()
                .map(|(id, u)| (id.to_string(), u))
                .collect(),
            offers: Vec::new(),
        }
    }

    #[test]
    fn price_gouging_fine() {
        let snap = snapshot(
            vec![
                ("producer_0", producer(100.0, 150.0)),
                ("producer_1", producer(100.0, 110.0)),
            ],
            vec![],
            100.0,
            0.0,
        );
        let violations = detect(&snap, &PolicyConfig::default(), 4);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].agent_id, "producer_0");
        assert_eq!(violations[0].kind, ViolationKind::PriceGouging);
        assert_eq!(violations[0].tick, 4);
        assert!((violations[0].fine_amount - 60.0).abs() < 1e-9);
    }

    #[test]
    fn concentration_fines_top_two_by_capacity() {
        let snap = snapshot(
            vec![
                ("producer_a", producer(100.0, 100.0)),
                ("producer_b", producer(600.0, 100.0)),
                ("producer_c", producer(300.0, 100.0)),
                ("producer_d", producer(300.0, 100.0)),
            ],
            vec![],
            100.0,
            0.5,
        );
        let violations = detect(&snap, &PolicyConfig::default(), 0);
        let fined: Vec<_> = violations.iter().map(|v| v.agent_id.as_str()).collect();
        assert_eq!(fined, vec!["producer_b", "producer_c"]);
        for v in &violations {
            assert!((v.fine_amount - 1000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn renewable_quota_fine_per_utility() {
        let snap = snapshot(
            vec![],
            vec![("utility_0", utility(100.0, 0.1)), ("utility_1", utility(100.0, 0.5))],
            100.0,
            0.0,
        );
        let violations = detect(&snap, &PolicyConfig::default(), 0);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::RenewableQuota);
        assert!((violations[0].fine_amount - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn violations_are_grouped_by_rule() {
        let snap = snapshot(
            vec![("producer_0", producer(100.0, 200.0))],
            vec![("utility_0", utility(200.0, 0.0))],
            100.0,
            1.0,
        );
        let kinds: Vec<_> = detect(&snap, &PolicyConfig::default(), 0)
            .into_iter()
            .map(|v| (v.agent_id, v.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("producer_0".to_string(), ViolationKind::PriceGouging),
                ("utility_0".to_string(), ViolationKind::PriceGouging),
                ("producer_0".to_string(), ViolationKind::MarketConcentration),
                ("utility_0".to_string(), ViolationKind::RenewableQuota),
            ]
        );
    }

    #[test]
    fn carbon_tax_adjustment_and_floor() {
        let policy = PolicyConfig::default();
        assert!((adjust_carbon_tax(20.0, 0.1, &policy) - 22.0).abs() < 1e-9);
        assert!((adjust_carbon_tax(20.0, 0.5, &policy) - 19.0).abs() < 1e-9);
        assert_eq!(adjust_carbon_tax(20.0, 0.4, &policy), 20.0);
        assert_eq!(adjust_carbon_tax(10.0, 0.9, &policy), 10.0);
    }

    #[test]
    fn fines_are_levied_and_logged() {
        let mut registry = AgentRegistry::new();
        registry
            .insert(Agent::new(
                "consumer_0",
                "balanced",
                500.0,
                AgentPayload::Consumer(ConsumerState::new(10.0, 0.0)),
            ))
            .unwrap();
        registry
            .insert(Agent::new(
                "regulator",
                "balanced",
                0.0,
                AgentPayload::Regulator(RegulatorState::new(10.0)),
            ))
            .unwrap();
        let mut ledger = Ledger::new();
        let violations = vec![Violation {
            tick: 2,
            agent_id: "consumer_0".to_string(),
            kind: ViolationKind::PriceGouging,
            fine_amount: 60.0,
        }];
        let levied = apply_fines(&mut ledger, &mut registry, violations.clone()).unwrap();
        assert_eq!(levied, violations);

        let agent = registry.get("consumer_0").unwrap();
        assert_eq!(agent.resources(), 440.0);
        assert_eq!(
            agent.history()[0].reason,
            Some(CostReason::Fine(ViolationKind::PriceGouging))
        );
        assert_eq!(registry.get("regulator").unwrap().resources(), 0.0);
        let (_, regulator) = registry.regulator().unwrap();
        assert_eq!(regulator.violations, violations);
    }

    #[test]
    fn overflowing_fine_is_dropped() {
        let mut registry = AgentRegistry::new();
        for id in ["producer_0", "producer_1"] {
            registry
                .insert(Agent::new(
                    id,
                    "balanced",
                    500.0,
                    AgentPayload::Consumer(ConsumerState::new(10.0, 0.0)),
                ))
                .unwrap();
        }
        let violation = |agent_id: &str, fine_amount: f64| Violation {
            tick: 0,
            agent_id: agent_id.to_string(),
            kind: ViolationKind::PriceGouging,
            fine_amount,
        };
        let mut ledger = Ledger::new();
        let levied = apply_fines(
            &mut ledger,
            &mut registry,
            vec![violation("producer_0", f64::INFINITY), violation("producer_1", 25.0)],
        )
        .unwrap();

        assert_eq!(levied, vec![violation("producer_1", 25.0)]);
        assert_eq!(registry.get("producer_0").unwrap().resources(), 500.0);
        assert_eq!(registry.get("producer_1").unwrap().resources(), 475.0);
        assert_eq!(ledger.len(), 1);
    }
}
