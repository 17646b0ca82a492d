use std::collections::BTreeMap;

use gridmarket_models::{Contract, ContractId};

use crate::error::MarketError;
use crate::registry::AgentRegistry;

/// Largest volume discount a producer grants on a contract.
pub const MAX_VOLUME_DISCOUNT: f64 = 0.1;

/// Active producer to utility supply contracts.
#[derive(Debug, Default)]
pub struct ContractBook {
    contracts: BTreeMap<ContractId, Contract>,
    next_id: u64,
}

/// Terms a producer would offer for a requested volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub available: f64,
    pub is_renewable: bool,
}

impl ContractBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price and remaining capacity for `amount` from `producer_id`, without
    /// changing any state.
    pub fn quote(
        &self,
        registry: &AgentRegistry,
        producer_id: &str,
        amount: f64,
    ) -> Result<Quote, MarketError> {
        let producer = registry.get(producer_id)?;
        let supplier = producer
            .as_contractable()
            .ok_or_else(|| MarketError::wrong_kind(producer_id, producer.kind(), "supply contracts"))?;
        let capacity = supplier.contract_capacity();
        let available = capacity - self.committed_capacity(producer_id);
        if amount > available {
            return Err(MarketError::CapacityExceeded {
                producer_id: producer_id.to_string(),
                requested: amount,
                available,
            });
        }
        let discount = (amount / capacity * 0.2).min(MAX_VOLUME_DISCOUNT);
        Ok(Quote {
            price: supplier.quoted_price() * (1.0 - discount),
            available,
            is_renewable: supplier.supplies_renewable(),
        })
    }

    /// Form a new contract. Not idempotent: two calls create two contracts.
    pub fn negotiate(
        &mut self,
        registry: &AgentRegistry,
        producer_id: &str,
        utility_id: &str,
        amount: f64,
        duration: u32,
        tick: u64,
    ) -> Result<Contract, MarketError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(MarketError::Validation(format!(
                "contract amount must be positive, got {amount}"
            )));
        }
        if duration == 0 {
            return Err(MarketError::Validation(
                "contract duration must be at least one tick".to_string(),
            ));
        }
        registry.utility(utility_id)?;
        let quote = self.quote(registry, producer_id, amount)?;

        self.next_id += 1;
        let contract = Contract {
            id: ContractId(self.next_id),
            producer_id: producer_id.to_string(),
            utility_id: utility_id.to_string(),
            amount,
            price: quote.price,
            total_duration: duration,
            remaining_duration: duration,
            is_renewable: quote.is_renewable,
            formed_at: tick,
            last_delivery: None,
        };
        tracing::debug!(
            tick,
            contract = %contract.id,
            producer = producer_id,
            utility = utility_id,
            amount,
            price = contract.price,
            duration,
            "Contract formed"
        );
        self.contracts.insert(contract.id, contract.clone());
        Ok(contract)
    }

    /// Keep the supply relationship behind a producer to utility trade alive.
    ///
    /// An existing contract for the pair has its duration reset. Otherwise a
    /// contract for `amount` is formed with the utility's default duration,
    /// counted as delivered at `tick` since the trade itself paid for it. A
    /// producer without spare capacity yields `None`; the trade still stands.
    pub fn refresh_supply(
        &mut self,
        registry: &AgentRegistry,
        producer_id: &str,
        utility_id: &str,
        amount: f64,
        tick: u64,
    ) -> Result<Option<ContractId>, MarketError> {
        if let Some(existing) = self
            .contracts
            .values_mut()
            .find(|c| c.is_between(producer_id, utility_id))
        {
            existing.remaining_duration = existing.total_duration;
            return Ok(Some(existing.id));
        }

        let duration = registry.utility(utility_id)?.contract_duration.max(1);
        match self.negotiate(registry, producer_id, utility_id, amount, duration, tick) {
            Ok(contract) => {
                self.mark_delivered(contract.id, tick);
                Ok(Some(contract.id))
            }
            Err(MarketError::CapacityExceeded { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Advance every contract by one tick and drop the ones that ran out.
    pub fn tick_all_contracts(&mut self) -> Vec<Contract> {
        for contract in self.contracts.values_mut() {
            contract.remaining_duration = contract.remaining_duration.saturating_sub(1);
        }
        let expired: Vec<ContractId> = self
            .contracts
            .values()
            .filter(|c| c.remaining_duration == 0)
            .map(|c| c.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.contracts.remove(&id))
            .collect()
    }

    /// Contracts that have not delivered yet at `tick`, in ID order.
    pub fn due_deliveries(&self, tick: u64) -> Vec<Contract> {
        self.contracts
            .values()
            .filter(|c| !c.delivered_at(tick))
            .cloned()
            .collect()
    }

    pub fn mark_delivered(&mut self, id: ContractId, tick: u64) {
        if let Some(contract) = self.contracts.get_mut(&id) {
            contract.last_delivery = Some(tick);
        }
    }

    pub fn get(&self, id: ContractId) -> Option<&Contract> {
        self.contracts.get(&id)
    }

    pub fn between(&self, producer_id: &str, utility_id: &str) -> Option<&Contract> {
        self.contracts
            .values()
            .find(|c| c.is_between(producer_id, utility_id))
    }

    pub fn for_producer<'a>(&'a self, producer_id: &'a str) -> impl Iterator<Item = &'a Contract> {
        self.contracts
            .values()
            .filter(move |c| c.producer_id == producer_id)
    }

    pub fn for_utility<'a>(&'a self, utility_id: &'a str) -> impl Iterator<Item = &'a Contract> {
        self.contracts
            .values()
            .filter(move |c| c.utility_id == utility_id)
    }

    /// Sum of contracted amounts a producer has committed to.
    pub fn committed_capacity(&self, producer_id: &str) -> f64 {
        self.for_producer(producer_id).map(|c| c.amount).sum()
    }

    /// Per-tick supply a utility receives through its contracts.
    pub fn contracted_supply(&self, utility_id: &str) -> f64 {
        self.for_utility(utility_id).map(|c| c.amount).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmarket_models::{Agent, AgentPayload, ProducerState, ProductionType, UtilityState};

    fn registry(capacity: f64, price: f64) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry
            .insert(Agent::new(
                "producer_0",
                "balanced",
                0.0,
                AgentPayload::Producer(ProducerState {
                    production_type: ProductionType::Wind,
                    max_capacity: capacity,
                    base_production_cost: 30.0,
                    maintenance_cost_rate: 0.0,
                    upgrade_cost: 0.0,
                    upgrade_capacity_increase: 0.0,
                    min_profit_margin: 0.1,
                    current_production: 0.0,
                    current_price: price,
                    spot_sold: 0.0,
                }),
            ))
            .unwrap();
        for id in ["utility_0", "utility_1"] {
            registry
                .insert(Agent::new(
                    id,
                    "balanced",
                    0.0,
                    AgentPayload::Utility(UtilityState {
                        renewable_quota: 0.3,
                        min_profit_margin: 0.1,
                        storage_capacity: 100.0,
                        energy_stored: 0.0,
                        contract_duration: 4,
                        current_selling_price: 60.0,
                        delivered_this_tick: 0.0,
                        customers: BTreeMap::new(),
                    }),
                ))
                .unwrap();
        }
        registry
    }

    #[test]
    fn negotiated_price_has_volume_discount() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        let contract = book
            .negotiate(&registry, "producer_0", "utility_0", 30.0, 3, 0)
            .unwrap();
        assert!((contract.price - 47.0).abs() < 1e-9);
        assert!(contract.is_renewable);
        assert_eq!(contract.remaining_duration, 3);
    }

    #[test]
    fn discount_is_capped() {
        let registry = registry(100.0, 50.0);
        let book = ContractBook::new();
        let quote = book.quote(&registry, "producer_0", 90.0).unwrap();
        assert!((quote.price - 45.0).abs() < 1e-9);
    }

    #[test]
    fn over_capacity_is_rejected_without_change() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        book.negotiate(&registry, "producer_0", "utility_0", 70.0, 3, 0)
            .unwrap();
        let err = book
            .negotiate(&registry, "producer_0", "utility_1", 40.0, 3, 0)
            .unwrap_err();
        assert_eq!(
            err,
            MarketError::CapacityExceeded {
                producer_id: "producer_0".to_string(),
                requested: 40.0,
                available: 30.0,
            }
        );
        assert_eq!(book.len(), 1);
        assert_eq!(book.committed_capacity("producer_0"), 70.0);
    }

    #[test]
    fn capacity_invariant_holds_under_repeated_negotiation() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        for i in 0..20 {
            let utility = if i % 2 == 0 { "utility_0" } else { "utility_1" };
            let _ = book.negotiate(&registry, "producer_0", utility, 7.5, 5, i);
            assert!(book.committed_capacity("producer_0") <= 100.0);
        }
        assert_eq!(book.len(), 13);
    }

    #[test]
    fn invalid_terms_are_validation_errors() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        assert!(matches!(
            book.negotiate(&registry, "producer_0", "utility_0", 0.0, 3, 0),
            Err(MarketError::Validation(_))
        ));
        assert!(matches!(
            book.negotiate(&registry, "producer_0", "utility_0", 10.0, 0, 0),
            Err(MarketError::Validation(_))
        ));
        assert!(matches!(
            book.negotiate(&registry, "utility_1", "utility_0", 10.0, 3, 0),
            Err(MarketError::WrongKind { .. })
        ));
    }

    #[test]
    fn contracts_count_down_and_expire() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        let id = book
            .negotiate(&registry, "producer_0", "utility_0", 30.0, 3, 0)
            .unwrap()
            .id;

        assert!(book.tick_all_contracts().is_empty());
        assert_eq!(book.get(id).unwrap().remaining_duration, 2);
        assert!(book.tick_all_contracts().is_empty());
        assert_eq!(book.get(id).unwrap().remaining_duration, 1);

        let expired = book.tick_all_contracts();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert!(book.get(id).is_none());
        assert_eq!(book.committed_capacity("producer_0"), 0.0);
    }

    #[test]
    fn refresh_resets_existing_pair() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        let id = book
            .negotiate(&registry, "producer_0", "utility_0", 30.0, 3, 0)
            .unwrap()
            .id;
        book.tick_all_contracts();

        let refreshed = book
            .refresh_supply(&registry, "producer_0", "utility_0", 10.0, 1)
            .unwrap();
        assert_eq!(refreshed, Some(id));
        assert_eq!(book.get(id).unwrap().remaining_duration, 3);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn refresh_forms_contract_already_delivered() {
        let registry = registry(100.0, 50.0);
        let mut book = ContractBook::new();
        let id = book
            .refresh_supply(&registry, "producer_0", "utility_1", 20.0, 5)
            .unwrap()
            .unwrap();
        let contract = book.get(id).unwrap();
        assert_eq!(contract.total_duration, 4);
        assert!(contract.delivered_at(5));
        assert!(book.due_deliveries(5).is_empty());
        assert_eq!(book.due_deliveries(6).len(), 1);

        assert_eq!(
            book.refresh_supply(&registry, "producer_0", "utility_0", 90.0, 5)
                .unwrap(),
            None
        );
    }
}
