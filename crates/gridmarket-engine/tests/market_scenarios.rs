use std::collections::BTreeMap;

use gridmarket_engine::{AgentRegistry, ContractBook, Market, MarketError};
use gridmarket_models::{
    Action, Agent, AgentPayload, BalancePolicy, ConsumerState, CostReason, MarketConfig,
    PopulationConfig, ProducerState, ProductionType, ProsumerState, RegulatorState,
    TransactionKind, UtilityState, ViolationKind,
};

fn producer(id: &str, capacity: f64, price: f64, production_type: ProductionType) -> Agent {
    Agent::new(
        id,
        "balanced",
        0.0,
        AgentPayload::Producer(ProducerState {
            production_type,
            max_capacity: capacity,
            base_production_cost: 30.0,
            maintenance_cost_rate: 0.0,
            upgrade_cost: 5000.0,
            upgrade_capacity_increase: 200.0,
            min_profit_margin: 0.15,
            current_production: 0.0,
            current_price: price,
            spot_sold: 0.0,
        }),
    )
}

fn utility(id: &str, price: f64) -> Agent {
    Agent::new(
        id,
        "balanced",
        0.0,
        AgentPayload::Utility(UtilityState {
            renewable_quota: 0.6,
            min_profit_margin: 0.1,
            storage_capacity: 500.0,
            energy_stored: 0.0,
            contract_duration: 3,
            current_selling_price: price,
            delivered_this_tick: 0.0,
            customers: BTreeMap::new(),
        }),
    )
}

fn consumer(id: &str, resources: f64, needs: f64) -> Agent {
    Agent::new(
        id,
        "eco_friendly",
        resources,
        AgentPayload::Consumer(ConsumerState::new(needs, 0.5)),
    )
}

fn market(agents: Vec<Agent>, config: &MarketConfig) -> Market {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.insert(agent).unwrap();
    }
    Market::new(registry, ContractBook::new(), config)
}

fn resources(market: &Market, id: &str) -> f64 {
    market.registry().get(id).unwrap().resources()
}

fn negotiate(producer_id: &str, amount: f64, duration: u32) -> Action {
    Action::NegotiateContract {
        producer_id: producer_id.to_string(),
        amount,
        duration,
    }
}

/// Default policy, except a single producer is not fined for concentration.
fn lenient() -> MarketConfig {
    let mut config = MarketConfig::default();
    config.policy.concentration_threshold = 1.0;
    config
}

/// One producer (capacity 100, price 50), one utility, one consumer needing 30.
fn reference_market() -> Market {
    market(
        vec![
            producer("producer_0", 100.0, 50.0, ProductionType::Wind),
            utility("utility_0", 55.0),
            consumer("consumer_0", 2000.0, 30.0),
        ],
        &lenient(),
    )
}

#[test]
fn contract_delivery_moves_1410() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();

    let contract = market.contracts().between("producer_0", "utility_0").unwrap();
    assert!((contract.price - 47.0).abs() < 1e-9);
    assert!((resources(&market, "producer_0") - 1410.0).abs() < 1e-9);
    assert!((resources(&market, "utility_0") + 1410.0).abs() < 1e-9);
}

#[test]
fn contract_expires_after_its_duration() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();

    let first = market.settle(0).unwrap();
    assert!(first.expired_contracts.is_empty());
    assert_eq!(
        market.contracts().between("producer_0", "utility_0").unwrap().remaining_duration,
        2
    );

    market.begin_tick(1).unwrap();
    market.settle(1).unwrap();
    assert_eq!(
        market.contracts().between("producer_0", "utility_0").unwrap().remaining_duration,
        1
    );

    market.begin_tick(2).unwrap();
    let last = market.settle(2).unwrap();
    assert_eq!(last.expired_contracts.len(), 1);
    assert!(market.contracts().is_empty());

    // One delivery per active tick.
    assert!((resources(&market, "producer_0") - 3.0 * 1410.0).abs() < 1e-6);
    let sells = market
        .registry()
        .get("producer_0")
        .unwrap()
        .history()
        .iter()
        .filter(|t| t.kind == TransactionKind::Sell)
        .count();
    assert_eq!(sells, 3);
}

#[test]
fn consumer_buys_contracted_supply_from_utility() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();
    market
        .apply(
            "consumer_0",
            &Action::Buy {
                seller_id: "utility_0".to_string(),
                amount: 50.0,
            },
            0,
        )
        .unwrap();

    // Capped at the consumer's need.
    assert!((resources(&market, "consumer_0") - (2000.0 - 30.0 * 55.0)).abs() < 1e-9);
    assert!((resources(&market, "utility_0") - (30.0 * 55.0 - 1410.0)).abs() < 1e-9);

    let utility = market.registry().utility("utility_0").unwrap();
    assert_eq!(utility.delivered_this_tick, 30.0);
    assert_eq!(utility.customers["consumer_0"].last_purchase, 0);

    // Need is met, a second purchase has nothing to move.
    let err = market
        .apply(
            "consumer_0",
            &Action::Buy {
                seller_id: "utility_0".to_string(),
                amount: 5.0,
            },
            0,
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
}

#[test]
fn price_gouging_is_fined_through_the_ledger() {
    let mut market = market(
        vec![
            producer("producer_0", 100.0, 150.0, ProductionType::Coal),
            producer("producer_1", 100.0, 50.0, ProductionType::Coal),
            producer("producer_2", 100.0, 100.0, ProductionType::Coal),
            utility("utility_0", 100.0),
        ],
        &MarketConfig::default(),
    );
    market.begin_tick(0).unwrap();
    let settlement = market.settle(0).unwrap();
    assert_eq!(settlement.snapshot.average_price, 100.0);

    let gouging: Vec<_> = settlement
        .violations
        .iter()
        .filter(|v| v.kind == ViolationKind::PriceGouging)
        .collect();
    assert_eq!(gouging.len(), 1);
    assert_eq!(gouging[0].agent_id, "producer_0");
    assert!((gouging[0].fine_amount - 60.0).abs() < 1e-9);

    assert!((resources(&market, "producer_0") + 60.0).abs() < 1e-9);
    let fine = &market.registry().get("producer_0").unwrap().history()[0];
    assert_eq!(fine.kind, TransactionKind::Cost);
    assert_eq!(fine.counterparty_id, None);
    assert_eq!(fine.reason, Some(CostReason::Fine(ViolationKind::PriceGouging)));
}

#[test]
fn concentration_index_bounds() {
    let equal = market(
        (0..4)
            .map(|i| producer(&format!("producer_{i}"), 250.0, 50.0, ProductionType::Gas))
            .collect(),
        &MarketConfig::default(),
    );
    assert!((equal.snapshot(0).market_concentration - 0.25).abs() < 1e-12);

    let monopoly = market(
        vec![producer("producer_0", 800.0, 50.0, ProductionType::Gas)],
        &MarketConfig::default(),
    );
    assert_eq!(monopoly.snapshot(0).market_concentration, 1.0);
}

#[test]
fn snapshot_is_idempotent() {
    let config = MarketConfig {
        population: PopulationConfig {
            consumers: 12,
            prosumers: 3,
            producers: 4,
            utilities: 2,
            seed: 11,
        },
        ..MarketConfig::default()
    };
    let mut market = Market::from_config(&config).unwrap();
    market.begin_tick(0).unwrap();
    let a = serde_json::to_vec(&market.snapshot(0)).unwrap();
    let b = serde_json::to_vec(&market.snapshot(0)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn mirrored_pairs_conserve_resources() {
    let config = MarketConfig {
        population: PopulationConfig {
            consumers: 10,
            prosumers: 2,
            producers: 3,
            utilities: 2,
            seed: 3,
        },
        ..MarketConfig::default()
    };
    let mut market = Market::from_config(&config).unwrap();
    for tick in 0..4 {
        market.begin_tick(tick).unwrap();
        let ids = market.registry().ids();
        for id in ids.iter().filter(|id| id.starts_with("consumer_")) {
            let _ = market.apply(
                id,
                &Action::Buy {
                    seller_id: "utility_0".to_string(),
                    amount: 40.0,
                },
                tick,
            );
        }
        let _ = market.apply("producer_0", &Action::Produce { level: 300.0 }, tick);
        market.settle(tick).unwrap();
    }

    let journal = market.ledger().journal();
    let mut i = 0;
    let mut pairs = 0;
    while i < journal.len() {
        let tx = &journal[i].transaction;
        if tx.kind == TransactionKind::Cost {
            i += 1;
            continue;
        }
        let mirror = &journal[i + 1].transaction;
        assert_eq!(tx.resource_delta() + mirror.resource_delta(), 0.0);
        assert_eq!(
            mirror.counterparty_id.as_deref(),
            Some(journal[i].agent_id.as_str())
        );
        pairs += 1;
        i += 2;
    }
    assert!(pairs > 0);
}

#[test]
fn capacity_is_never_overcommitted() {
    let mut agents = vec![producer("producer_0", 100.0, 50.0, ProductionType::Hydro)];
    for i in 0..5 {
        agents.push(utility(&format!("utility_{i}"), 60.0));
    }
    let mut market = market(agents, &MarketConfig::default());
    market.begin_tick(0).unwrap();

    let mut rejected = 0;
    for i in 0..5 {
        match market.apply(&format!("utility_{i}"), &negotiate("producer_0", 30.0, 4), 0) {
            Ok(()) => {}
            Err(MarketError::CapacityExceeded { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert!(market.contracts().committed_capacity("producer_0") <= 100.0);
    }
    assert_eq!(rejected, 2);
}

#[test]
fn existing_pair_is_already_covered() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();
    assert_eq!(market.contracts().len(), 1);
    assert!((resources(&market, "producer_0") - 1410.0).abs() < 1e-9);
}

#[test]
fn strict_balance_policy_rejects_overspend() {
    let mut config = MarketConfig::default();
    config.scheduler.balance_policy = BalancePolicy::RejectNegative;
    let mut market = market(
        vec![
            producer("producer_0", 100.0, 50.0, ProductionType::Wind),
            utility("utility_0", 55.0),
            consumer("consumer_0", 100.0, 30.0),
        ],
        &config,
    );
    market.begin_tick(0).unwrap();

    // The utility starts at zero and cannot pay for a first delivery.
    let err = market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap_err();
    assert!(matches!(err, MarketError::InsufficientResources { .. }));
    assert!(market.contracts().is_empty());
    assert_eq!(resources(&market, "utility_0"), 0.0);
}

#[test]
fn negative_balances_are_allowed_by_default() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market
        .apply("utility_0", &negotiate("producer_0", 30.0, 3), 0)
        .unwrap();
    assert!(resources(&market, "utility_0") < 0.0);
}

#[test]
fn non_renewable_production_pays_carbon_tax() {
    let mut market = market(
        vec![
            producer("producer_0", 100.0, 50.0, ProductionType::Coal),
            producer("producer_1", 100.0, 50.0, ProductionType::Solar),
        ],
        &MarketConfig::default(),
    );
    market.begin_tick(0).unwrap();
    market
        .apply("producer_0", &Action::Produce { level: 250.0 }, 0)
        .unwrap();
    market
        .apply("producer_1", &Action::Produce { level: 80.0 }, 0)
        .unwrap();

    assert_eq!(market.registry().producer("producer_0").unwrap().current_production, 100.0);
    assert!((resources(&market, "producer_0") + 1000.0).abs() < 1e-9);
    assert_eq!(resources(&market, "producer_1"), 0.0);
}

#[test]
fn renewable_incentive_is_paid_by_the_regulator() {
    let mut market = market(
        vec![
            producer("producer_0", 100.0, 50.0, ProductionType::Solar),
            Agent::new(
                "regulator",
                "balanced",
                0.0,
                AgentPayload::Regulator(RegulatorState::new(10.0)),
            ),
        ],
        &lenient(),
    );
    market.begin_tick(0).unwrap();
    market
        .apply("producer_0", &Action::Produce { level: 80.0 }, 0)
        .unwrap();
    let settlement = market.settle(0).unwrap();

    assert!((resources(&market, "producer_0") - 400.0).abs() < 1e-9);
    assert!((resources(&market, "regulator") + 400.0).abs() < 1e-9);
    assert_eq!(settlement.snapshot.renewable_ratio, 1.0);

    let (_, regulator) = market.registry().regulator().unwrap();
    assert_eq!(regulator.price_history.len(), 1);
    // Fully renewable market: tax decays but stays on the floor.
    assert_eq!(regulator.current_carbon_tax, 10.0);
}

#[test]
fn regulator_and_wrong_kind_actions_are_rejected() {
    let mut market = market(
        vec![
            consumer("consumer_0", 100.0, 30.0),
            Agent::new(
                "regulator",
                "balanced",
                0.0,
                AgentPayload::Regulator(RegulatorState::new(10.0)),
            ),
        ],
        &MarketConfig::default(),
    );
    assert!(matches!(
        market.apply("regulator", &Action::SetPrice { price: 10.0 }, 0),
        Err(MarketError::WrongKind { .. })
    ));
    assert!(matches!(
        market.apply("consumer_0", &Action::SetPrice { price: 10.0 }, 0),
        Err(MarketError::WrongKind { .. })
    ));
    assert!(matches!(
        market.apply("consumer_0", &Action::Produce { level: -1.0 }, 0),
        Err(MarketError::Validation(_))
    ));
    assert!(matches!(
        market.apply("nobody", &Action::Upgrade, 0),
        Err(MarketError::UnknownAgent(_))
    ));
}

#[test]
fn prosumer_stores_surplus_and_sells_it() {
    let prosumer = Agent::new(
        "prosumer_0",
        "eco_friendly",
        500.0,
        AgentPayload::Prosumer(ProsumerState {
            energy_needs: 40.0,
            renewable_preference: 0.8,
            production_type: ProductionType::Solar,
            max_production_capacity: 80.0,
            storage_capacity: 15.0,
            energy_stored: 0.0,
            current_production: 0.0,
            current_consumption: 0.0,
            selling_price: 90.0,
            maintenance_cost_rate: 0.0,
            upgrade_cost: 1000.0,
            upgrade_capacity_increase: 50.0,
            surplus_used: 0.0,
        }),
    );
    let mut market = market(
        vec![prosumer, consumer("consumer_0", 1000.0, 30.0)],
        &MarketConfig::default(),
    );
    market.begin_tick(0).unwrap();
    market
        .apply("prosumer_0", &Action::Produce { level: 60.0 }, 0)
        .unwrap();
    market
        .apply("prosumer_0", &Action::MoveStorage { amount: 50.0 }, 0)
        .unwrap();

    let state = match &market.registry().get("prosumer_0").unwrap().payload {
        AgentPayload::Prosumer(p) => p.clone(),
        _ => unreachable!(),
    };
    // Limited by storage capacity, the rest of the surplus stays sellable.
    assert_eq!(state.energy_stored, 15.0);
    assert_eq!(state.available_to_sell(), 20.0);

    market
        .apply(
            "prosumer_0",
            &Action::Sell {
                buyer_id: "consumer_0".to_string(),
                amount: 25.0,
            },
            0,
        )
        .unwrap();
    assert!((resources(&market, "prosumer_0") - (500.0 + 20.0 * 90.0)).abs() < 1e-9);
    let tx = market.registry().get("consumer_0").unwrap().history()[0].clone();
    assert_eq!(tx.kind, TransactionKind::Buy);
    assert!(tx.is_renewable);
}

#[test]
fn upgrade_pays_and_grows_capacity() {
    let mut market = reference_market();
    market.begin_tick(0).unwrap();
    market.apply("producer_0", &Action::Upgrade, 0).unwrap();
    assert_eq!(market.registry().producer("producer_0").unwrap().max_capacity, 300.0);
    assert_eq!(resources(&market, "producer_0"), -5000.0);
    assert_eq!(
        market.registry().get("producer_0").unwrap().history()[0].reason,
        Some(CostReason::Upgrade)
    );
}
