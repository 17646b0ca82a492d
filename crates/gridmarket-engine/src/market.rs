use gridmarket_models::{
    Action, AgentId, AgentKind, AgentPayload, BalancePolicy, Contract, CostReason,
    CustomerRecord, MarketConfig, MarketParams, MarketSnapshot, PolicyConfig, TransactionKind,
    Violation,
};

use crate::aggregator;
use crate::contracts::ContractBook;
use crate::error::MarketError;
use crate::ledger::Ledger;
use crate::policy;
use crate::population;
use crate::registry::AgentRegistry;

/// Weight of the latest purchase in a utility's customer consumption average.
pub const CUSTOMER_SMOOTHING: f64 = 0.2;

/// What settling a tick produced.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Market state after commit, contract expiry and incentives.
    pub snapshot: MarketSnapshot,
    pub violations: Vec<Violation>,
    pub expired_contracts: Vec<Contract>,
}

/// Registry, ledger and contract book under a single owner.
///
/// Every state change in a tick goes through `begin_tick`, `apply` and
/// `settle`, in that order. Nothing here is shared across threads.
#[derive(Debug)]
pub struct Market {
    registry: AgentRegistry,
    ledger: Ledger,
    contracts: ContractBook,
    params: MarketParams,
    policy: PolicyConfig,
    balance_policy: BalancePolicy,
}

impl Market {
    pub fn new(registry: AgentRegistry, contracts: ContractBook, config: &MarketConfig) -> Self {
        Self {
            registry,
            ledger: Ledger::new(),
            contracts,
            params: config.market.clone(),
            policy: config.policy.clone(),
            balance_policy: config.scheduler.balance_policy,
        }
    }

    /// Build the seeded population described by `config` and wrap it.
    pub fn from_config(config: &MarketConfig) -> Result<Self, MarketError> {
        let (registry, contracts) = population::build(config)?;
        Ok(Self::new(registry, contracts, config))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Direct agent access for scenario setup. Balances still only move
    /// through the ledger.
    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn contracts(&self) -> &ContractBook {
        &self.contracts
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn carbon_tax_rate(&self) -> f64 {
        self.registry
            .carbon_tax_rate()
            .unwrap_or(self.policy.carbon_tax_rate)
    }

    pub fn snapshot(&self, tick: u64) -> MarketSnapshot {
        aggregator::snapshot(
            &self.registry,
            &self.contracts,
            tick,
            &self.params,
            &self.policy,
        )
    }

    /// Reset per-tick counters, deliver due contracts and charge maintenance.
    pub fn begin_tick(&mut self, tick: u64) -> Result<(), MarketError> {
        for agent in self.registry.iter_mut() {
            match &mut agent.payload {
                AgentPayload::Consumer(c) => c.current_consumption = 0.0,
                AgentPayload::Prosumer(p) => {
                    p.current_consumption = 0.0;
                    p.surplus_used = 0.0;
                }
                AgentPayload::Producer(p) => p.spot_sold = 0.0,
                AgentPayload::Utility(u) => u.delivered_this_tick = 0.0,
                AgentPayload::Regulator(_) => {}
            }
        }

        for contract in self.contracts.due_deliveries(tick) {
            let result = self.deliver(&contract, tick);
            skip_refused(result, tick, "contract delivery")?;
        }

        let charges: Vec<(AgentId, f64, f64)> = self
            .registry
            .iter()
            .filter_map(|a| match &a.payload {
                AgentPayload::Producer(p) => {
                    Some((a.id.clone(), p.max_capacity, p.maintenance_cost_rate))
                }
                AgentPayload::Prosumer(p) => Some((
                    a.id.clone(),
                    p.max_production_capacity,
                    p.maintenance_cost_rate,
                )),
                _ => None,
            })
            .filter(|(_, capacity, rate)| capacity * rate > 0.0)
            .collect();
        for (id, capacity, rate) in charges {
            let result = self
                .ledger
                .record_cost(&mut self.registry, tick, &id, capacity, rate, CostReason::Maintenance)
                .map(|_| ());
            skip_refused(result, tick, "maintenance")?;
        }
        Ok(())
    }

    /// Validate and apply one action on behalf of `agent_id`.
    ///
    /// A returned error means the action had no effect, except for
    /// [`MarketError::InvariantViolation`], which is fatal.
    pub fn apply(&mut self, agent_id: &str, action: &Action, tick: u64) -> Result<(), MarketError> {
        let kind = self.registry.get(agent_id)?.kind();
        if kind == AgentKind::Regulator {
            return Err(MarketError::wrong_kind(agent_id, kind, action.label()));
        }
        match action {
            Action::Buy { seller_id, amount } => {
                self.trade(tick, seller_id, agent_id, *amount, TransactionKind::Buy)
            }
            Action::Sell { buyer_id, amount } => {
                self.trade(tick, agent_id, buyer_id, *amount, TransactionKind::Sell)
            }
            Action::Produce { level } => self.produce(agent_id, *level, tick),
            Action::SetPrice { price } => self.set_price(agent_id, *price),
            Action::MoveStorage { amount } => self.move_storage(agent_id, *amount),
            Action::Upgrade => self.upgrade(agent_id, tick),
            Action::NegotiateContract {
                producer_id,
                amount,
                duration,
            } => self.negotiate(agent_id, producer_id, *amount, *duration, tick),
        }
    }

    /// Expire contracts, pay incentives, then police the committed state.
    ///
    /// Levies the ledger refuses are skipped, so only a broken invariant
    /// fails settlement.
    pub fn settle(&mut self, tick: u64) -> Result<Settlement, MarketError> {
        let expired_contracts = self.contracts.tick_all_contracts();
        self.pay_renewable_incentive(tick)?;

        let snapshot = self.snapshot(tick);
        let detected = policy::detect(&snapshot, &self.policy, tick);
        let violations = policy::apply_fines(&mut self.ledger, &mut self.registry, detected)?;
        policy::monitor(&mut self.registry, &snapshot, &self.policy);

        Ok(Settlement {
            snapshot,
            violations,
            expired_contracts,
        })
    }

    fn deliver(&mut self, contract: &Contract, tick: u64) -> Result<(), MarketError> {
        self.ledger.record(
            &mut self.registry,
            tick,
            TransactionKind::Sell,
            contract.amount,
            contract.price,
            &contract.producer_id,
            Some(&contract.utility_id),
            contract.is_renewable,
        )?;
        self.contracts.mark_delivered(contract.id, tick);
        Ok(())
    }

    fn trade(
        &mut self,
        tick: u64,
        seller_id: &str,
        buyer_id: &str,
        requested: f64,
        initiated: TransactionKind,
    ) -> Result<(), MarketError> {
        ensure_positive(requested, "amount")?;
        if seller_id == buyer_id {
            return Err(MarketError::Validation(format!(
                "agent {seller_id} cannot trade with itself"
            )));
        }

        let seller = self.registry.get(seller_id)?;
        let seller_kind = seller.kind();
        let tradable = seller
            .as_tradable()
            .ok_or_else(|| MarketError::wrong_kind(seller_id, seller_kind, "sell energy"))?;
        let price = tradable.selling_price();
        let is_renewable = tradable.sells_renewable();
        let available = self.available_from(seller_id)?;

        let buyer = self.registry.get(buyer_id)?;
        let buyer_kind = buyer.kind();
        let wanted = match &buyer.payload {
            AgentPayload::Consumer(c) => c.remaining_need(),
            AgentPayload::Prosumer(p) => p.remaining_need(),
            AgentPayload::Utility(u) => (u.storage_capacity - u.energy_stored).max(0.0),
            _ => return Err(MarketError::wrong_kind(buyer_id, buyer_kind, "buy energy")),
        };

        let amount = requested.min(wanted).min(available);
        if amount <= 0.0 {
            return Err(MarketError::Validation(format!(
                "nothing to trade between {seller_id} and {buyer_id}: \
                 buyer wants {wanted:.2}, seller has {available:.2}"
            )));
        }
        self.ensure_affordable(buyer_id, amount * price)?;

        let (from, to) = match initiated {
            TransactionKind::Buy => (buyer_id, seller_id),
            _ => (seller_id, buyer_id),
        };
        self.ledger.record(
            &mut self.registry,
            tick,
            initiated,
            amount,
            price,
            from,
            Some(to),
            is_renewable,
        )?;
        self.draw_from(seller_id, amount)?;
        self.receive(buyer_id, seller_id, seller_kind, amount, price, tick)?;

        if seller_kind == AgentKind::Producer && buyer_kind == AgentKind::Utility {
            self.contracts
                .refresh_supply(&self.registry, seller_id, buyer_id, amount, tick)?;
        }

        tracing::debug!(
            tick,
            seller = seller_id,
            buyer = buyer_id,
            amount,
            price,
            "Trade committed"
        );
        Ok(())
    }

    /// Energy a seller can still hand over this tick.
    fn available_from(&self, seller_id: &str) -> Result<f64, MarketError> {
        let seller = self.registry.get(seller_id)?;
        let available = match &seller.payload {
            AgentPayload::Producer(p) => {
                p.max_capacity - self.contracts.committed_capacity(seller_id) - p.spot_sold
            }
            AgentPayload::Prosumer(p) => p.available_to_sell(),
            AgentPayload::Utility(u) => {
                let undelivered =
                    self.contracts.contracted_supply(seller_id) - u.delivered_this_tick;
                undelivered.max(0.0) + u.energy_stored
            }
            other => return Err(MarketError::wrong_kind(seller_id, other.kind(), "sell energy")),
        };
        Ok(available.max(0.0))
    }

    fn draw_from(&mut self, seller_id: &str, amount: f64) -> Result<(), MarketError> {
        let contracted = self.contracts.contracted_supply(seller_id);
        let seller = self.registry.get_mut(seller_id)?;
        match &mut seller.payload {
            AgentPayload::Producer(p) => p.spot_sold += amount,
            AgentPayload::Prosumer(p) => {
                let from_surplus = amount.min(p.unused_surplus());
                p.surplus_used += from_surplus;
                p.energy_stored = (p.energy_stored - (amount - from_surplus)).max(0.0);
            }
            AgentPayload::Utility(u) => {
                let undelivered = (contracted - u.delivered_this_tick).max(0.0);
                let from_flow = amount.min(undelivered);
                u.delivered_this_tick += from_flow;
                u.energy_stored = (u.energy_stored - (amount - from_flow)).max(0.0);
            }
            other => return Err(MarketError::wrong_kind(seller_id, other.kind(), "sell energy")),
        }
        Ok(())
    }

    fn receive(
        &mut self,
        buyer_id: &str,
        seller_id: &str,
        seller_kind: AgentKind,
        amount: f64,
        price: f64,
        tick: u64,
    ) -> Result<(), MarketError> {
        let buyer = self.registry.get_mut(buyer_id)?;
        let retail = match &mut buyer.payload {
            AgentPayload::Consumer(c) => {
                c.current_consumption += amount;
                c.energy_price = price;
                true
            }
            AgentPayload::Prosumer(p) => {
                p.current_consumption += amount;
                true
            }
            AgentPayload::Utility(u) => {
                u.energy_stored += amount;
                false
            }
            other => return Err(MarketError::wrong_kind(buyer_id, other.kind(), "buy energy")),
        };

        if retail && seller_kind == AgentKind::Utility {
            let utility = self.registry.utility_mut(seller_id)?;
            utility
                .customers
                .entry(buyer_id.to_string())
                .and_modify(|record| {
                    record.avg_consumption = record.avg_consumption * (1.0 - CUSTOMER_SMOOTHING)
                        + amount * CUSTOMER_SMOOTHING;
                    record.last_purchase = tick;
                })
                .or_insert(CustomerRecord {
                    avg_consumption: amount,
                    last_purchase: tick,
                });
        }
        Ok(())
    }

    fn produce(&mut self, agent_id: &str, level: f64, tick: u64) -> Result<(), MarketError> {
        ensure_non_negative(level, "production level")?;
        let agent = self.registry.get(agent_id)?;
        let (production, taxable) = match &agent.payload {
            AgentPayload::Producer(p) => {
                let production = level.min(p.max_capacity);
                let taxable = if p.is_renewable() { 0.0 } else { production };
                (production, taxable)
            }
            AgentPayload::Prosumer(p) => (level.min(p.max_production_capacity), 0.0),
            other => return Err(MarketError::wrong_kind(agent_id, other.kind(), "produce")),
        };

        let rate = self.carbon_tax_rate();
        let tax = taxable * rate;
        if tax > 0.0 {
            self.ensure_affordable(agent_id, tax)?;
        }

        match &mut self.registry.get_mut(agent_id)?.payload {
            AgentPayload::Producer(p) => p.current_production = production,
            AgentPayload::Prosumer(p) => p.current_production = production,
            _ => {}
        }
        if tax > 0.0 {
            self.ledger.record_cost(
                &mut self.registry,
                tick,
                agent_id,
                taxable,
                rate,
                CostReason::CarbonTax,
            )?;
        }
        Ok(())
    }

    fn set_price(&mut self, agent_id: &str, price: f64) -> Result<(), MarketError> {
        ensure_non_negative(price, "price")?;
        if price > self.params.max_price {
            return Err(MarketError::Validation(format!(
                "price {price} is above the market maximum of {}",
                self.params.max_price
            )));
        }
        let agent = self.registry.get_mut(agent_id)?;
        let kind = agent.kind();
        agent
            .as_tradable_mut()
            .ok_or_else(|| MarketError::wrong_kind(agent_id, kind, "set a price"))?
            .set_selling_price(price);
        Ok(())
    }

    fn move_storage(&mut self, agent_id: &str, amount: f64) -> Result<(), MarketError> {
        if !amount.is_finite() || amount == 0.0 {
            return Err(MarketError::Validation(format!(
                "storage move must be a non-zero number, got {amount}"
            )));
        }
        let contracted = self.contracts.contracted_supply(agent_id);
        let agent = self.registry.get_mut(agent_id)?;
        let moved = match &mut agent.payload {
            AgentPayload::Prosumer(p) if amount > 0.0 => {
                let room = (p.storage_capacity - p.energy_stored).max(0.0);
                let moved = amount.min(p.unused_surplus()).min(room);
                p.surplus_used += moved;
                p.energy_stored += moved;
                moved
            }
            AgentPayload::Prosumer(p) => {
                let moved = (-amount).min(p.energy_stored.max(0.0));
                p.energy_stored -= moved;
                p.current_consumption += moved;
                moved
            }
            AgentPayload::Utility(u) if amount > 0.0 => {
                let undelivered = (contracted - u.delivered_this_tick).max(0.0);
                let room = (u.storage_capacity - u.energy_stored).max(0.0);
                let moved = amount.min(undelivered).min(room);
                u.delivered_this_tick += moved;
                u.energy_stored += moved;
                moved
            }
            AgentPayload::Utility(_) => {
                return Err(MarketError::Validation(
                    "utility storage is drawn down by sales, not withdrawn".to_string(),
                ))
            }
            other => return Err(MarketError::wrong_kind(agent_id, other.kind(), "store energy")),
        };
        if moved <= 0.0 {
            return Err(MarketError::Validation(format!(
                "agent {agent_id} has no energy or room to move {amount:.2}"
            )));
        }
        Ok(())
    }

    fn upgrade(&mut self, agent_id: &str, tick: u64) -> Result<(), MarketError> {
        let agent = self.registry.get(agent_id)?;
        let (cost, increase) = match &agent.payload {
            AgentPayload::Producer(p) => (p.upgrade_cost, p.upgrade_capacity_increase),
            AgentPayload::Prosumer(p) => (p.upgrade_cost, p.upgrade_capacity_increase),
            other => return Err(MarketError::wrong_kind(agent_id, other.kind(), "upgrade")),
        };
        self.ensure_affordable(agent_id, cost)?;
        if cost > 0.0 {
            self.ledger.record_cost(
                &mut self.registry,
                tick,
                agent_id,
                1.0,
                cost,
                CostReason::Upgrade,
            )?;
        }
        match &mut self.registry.get_mut(agent_id)?.payload {
            AgentPayload::Producer(p) => p.max_capacity += increase,
            AgentPayload::Prosumer(p) => p.max_production_capacity += increase,
            _ => {}
        }
        tracing::debug!(tick, agent = agent_id, cost, increase, "Capacity upgraded");
        Ok(())
    }

    fn negotiate(
        &mut self,
        utility_id: &str,
        producer_id: &str,
        amount: f64,
        duration: u32,
        tick: u64,
    ) -> Result<(), MarketError> {
        self.registry.utility(utility_id)?;
        ensure_positive(amount, "contract amount")?;
        if self.contracts.between(producer_id, utility_id).is_some() {
            tracing::debug!(
                tick,
                producer = producer_id,
                utility = utility_id,
                "Pair already covered by a contract"
            );
            return Ok(());
        }

        let quote = self.contracts.quote(&self.registry, producer_id, amount)?;
        self.ensure_affordable(utility_id, amount * quote.price)?;
        let contract =
            self.contracts
                .negotiate(&self.registry, producer_id, utility_id, amount, duration, tick)?;
        self.deliver(&contract, tick)
    }

    fn pay_renewable_incentive(&mut self, tick: u64) -> Result<(), MarketError> {
        let incentive = self.policy.renewable_incentive;
        if incentive <= 0.0 {
            return Ok(());
        }
        let Some((regulator_id, _)) = self.registry.regulator() else {
            return Ok(());
        };
        let regulator_id = regulator_id.clone();
        let payouts: Vec<(AgentId, f64)> = self
            .registry
            .of_kind(AgentKind::Producer)
            .filter_map(|a| match &a.payload {
                AgentPayload::Producer(p) if p.is_renewable() && p.current_production > 0.0 => {
                    Some((a.id.clone(), p.current_production))
                }
                _ => None,
            })
            .collect();
        for (producer_id, production) in payouts {
            let result = self
                .ledger
                .record(
                    &mut self.registry,
                    tick,
                    TransactionKind::Sell,
                    production,
                    incentive,
                    &producer_id,
                    Some(&regulator_id),
                    true,
                )
                .map(|_| ());
            skip_refused(result, tick, "renewable incentive")?;
        }
        Ok(())
    }

    fn ensure_affordable(&self, agent_id: &str, spend: f64) -> Result<(), MarketError> {
        if self.balance_policy == BalancePolicy::AllowNegative {
            return Ok(());
        }
        let available = self.registry.get(agent_id)?.resources();
        if spend > available {
            return Err(MarketError::InsufficientResources {
                agent_id: agent_id.to_string(),
                required: spend,
                available,
            });
        }
        Ok(())
    }
}

fn ensure_positive(value: f64, what: &str) -> Result<(), MarketError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(MarketError::Validation(format!(
            "{what} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// Settlement-phase writes drop a refused entry instead of failing the tick.
fn skip_refused(
    result: Result<(), MarketError>,
    tick: u64,
    what: &str,
) -> Result<(), MarketError> {
    match result {
        Err(e) if !e.is_fatal() => {
            tracing::warn!(tick, what, error = %e, "Settlement entry skipped");
            Ok(())
        }
        other => other,
    }
}

fn ensure_non_negative(value: f64, what: &str) -> Result<(), MarketError> {
    if !value.is_finite() || value < 0.0 {
        return Err(MarketError::Validation(format!(
            "{what} must be non-negative, got {value}"
        )));
    }
    Ok(())
}
