use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TransactionSummary};
use crate::violation::Violation;

pub type AgentId = String;

/// Number of most recent transactions included in an [`AgentView`].
pub const VIEW_HISTORY_LEN: usize = 5;

/// Number of ticks of market observations the regulator retains.
pub const MONITOR_WINDOW: usize = 168;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Consumer,
    Prosumer,
    Producer,
    Utility,
    Regulator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Prosumer => "prosumer",
            Self::Producer => "producer",
            Self::Utility => "utility",
            Self::Regulator => "regulator",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductionType {
    Oil,
    Gas,
    Coal,
    Nuclear,
    Solar,
    Wind,
    Hydro,
}

impl ProductionType {
    pub fn is_renewable(self) -> bool {
        matches!(self, Self::Solar | Self::Wind | Self::Hydro)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerState {
    /// Energy needed per tick.
    pub energy_needs: f64,
    /// 0.0 to 1.0 preference for renewable offers.
    pub renewable_preference: f64,
    /// Energy acquired during the current tick.
    pub current_consumption: f64,
    /// Unit price paid on the most recent purchase.
    pub energy_price: f64,
}

impl ConsumerState {
    pub fn new(energy_needs: f64, renewable_preference: f64) -> Self {
        Self {
            energy_needs,
            renewable_preference,
            current_consumption: 0.0,
            energy_price: 0.0,
        }
    }

    pub fn remaining_need(&self) -> f64 {
        (self.energy_needs - self.current_consumption).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProsumerState {
    pub energy_needs: f64,
    pub renewable_preference: f64,
    pub production_type: ProductionType,
    pub max_production_capacity: f64,
    pub storage_capacity: f64,
    pub energy_stored: f64,
    pub current_production: f64,
    /// Energy acquired this tick from storage or purchases.
    pub current_consumption: f64,
    pub selling_price: f64,
    pub maintenance_cost_rate: f64,
    pub upgrade_cost: f64,
    pub upgrade_capacity_increase: f64,
    /// Portion of this tick's surplus already sold or stored.
    pub surplus_used: f64,
}

impl ProsumerState {
    /// Production left over after covering the prosumer's own needs.
    pub fn surplus(&self) -> f64 {
        (self.current_production - self.energy_needs).max(0.0)
    }

    pub fn unused_surplus(&self) -> f64 {
        (self.surplus() - self.surplus_used).max(0.0)
    }

    /// Energy that can still be sold this tick.
    pub fn available_to_sell(&self) -> f64 {
        self.unused_surplus() + self.energy_stored.max(0.0)
    }

    /// Need not covered by own production or what was acquired this tick.
    pub fn remaining_need(&self) -> f64 {
        let self_supplied = self.current_production.min(self.energy_needs);
        (self.energy_needs - self_supplied - self.current_consumption).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerState {
    pub production_type: ProductionType,
    pub max_capacity: f64,
    pub base_production_cost: f64,
    /// Maintenance cost per tick as a fraction of capacity.
    pub maintenance_cost_rate: f64,
    pub upgrade_cost: f64,
    pub upgrade_capacity_increase: f64,
    pub min_profit_margin: f64,
    pub current_production: f64,
    pub current_price: f64,
    /// Energy sold outside of contracts this tick.
    pub spot_sold: f64,
}

impl ProducerState {
    pub fn is_renewable(&self) -> bool {
        self.production_type.is_renewable()
    }

    /// Price a fresh producer starts with: base cost plus twice the minimum margin.
    pub fn opening_price(base_production_cost: f64, min_profit_margin: f64) -> f64 {
        base_production_cost * (1.0 + 2.0 * min_profit_margin)
    }
}

/// What a utility knows about one of its retail customers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerRecord {
    pub avg_consumption: f64,
    pub last_purchase: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilityState {
    /// Target fraction of renewable supply.
    pub renewable_quota: f64,
    pub min_profit_margin: f64,
    pub storage_capacity: f64,
    pub energy_stored: f64,
    /// Default duration for producer contracts, in ticks.
    pub contract_duration: u32,
    pub current_selling_price: f64,
    /// Contracted supply already sold or stored this tick.
    pub delivered_this_tick: f64,
    pub customers: BTreeMap<AgentId, CustomerRecord>,
}

impl UtilityState {
    pub fn customer_demand(&self) -> f64 {
        self.customers.values().map(|c| c.avg_consumption).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegulatorState {
    pub current_carbon_tax: f64,
    pub price_history: Vec<f64>,
    pub renewable_ratio_history: Vec<f64>,
    pub concentration_history: Vec<f64>,
    /// Audit log of every violation ever detected.
    pub violations: Vec<Violation>,
}

impl RegulatorState {
    pub fn new(carbon_tax: f64) -> Self {
        Self {
            current_carbon_tax: carbon_tax,
            price_history: Vec::new(),
            renewable_ratio_history: Vec::new(),
            concentration_history: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Append one tick of market observations, keeping at most [`MONITOR_WINDOW`] entries.
    pub fn observe(&mut self, average_price: f64, renewable_ratio: f64, concentration: f64) {
        push_bounded(&mut self.price_history, average_price);
        push_bounded(&mut self.renewable_ratio_history, renewable_ratio);
        push_bounded(&mut self.concentration_history, concentration);
    }
}

fn push_bounded(series: &mut Vec<f64>, value: f64) {
    series.push(value);
    if series.len() > MONITOR_WINDOW {
        let excess = series.len() - MONITOR_WINDOW;
        series.drain(..excess);
    }
}

/// Kind-specific state of an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentPayload {
    Consumer(ConsumerState),
    Prosumer(ProsumerState),
    Producer(ProducerState),
    Utility(UtilityState),
    Regulator(RegulatorState),
}

impl AgentPayload {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Consumer(_) => AgentKind::Consumer,
            Self::Prosumer(_) => AgentKind::Prosumer,
            Self::Producer(_) => AgentKind::Producer,
            Self::Utility(_) => AgentKind::Utility,
            Self::Regulator(_) => AgentKind::Regulator,
        }
    }
}

/// Agents that post a selling price and can be bought from.
pub trait Tradable {
    fn selling_price(&self) -> f64;
    fn set_selling_price(&mut self, price: f64);
    /// Whether energy bought from this seller counts as renewable.
    fn sells_renewable(&self) -> bool;
}

impl Tradable for ProducerState {
    fn selling_price(&self) -> f64 {
        self.current_price
    }

    fn set_selling_price(&mut self, price: f64) {
        self.current_price = price;
    }

    fn sells_renewable(&self) -> bool {
        self.is_renewable()
    }
}

impl Tradable for ProsumerState {
    fn selling_price(&self) -> f64 {
        self.selling_price
    }

    fn set_selling_price(&mut self, price: f64) {
        self.selling_price = price;
    }

    fn sells_renewable(&self) -> bool {
        true
    }
}

impl Tradable for UtilityState {
    fn selling_price(&self) -> f64 {
        self.current_selling_price
    }

    fn set_selling_price(&mut self, price: f64) {
        self.current_selling_price = price;
    }

    fn sells_renewable(&self) -> bool {
        self.renewable_quota > 0.5
    }
}

/// Agents that can enter multi-tick supply contracts as the supplying side.
pub trait Contractable {
    fn contract_capacity(&self) -> f64;
    fn quoted_price(&self) -> f64;
    fn supplies_renewable(&self) -> bool;
}

impl Contractable for ProducerState {
    fn contract_capacity(&self) -> f64 {
        self.max_capacity
    }

    fn quoted_price(&self) -> f64 {
        self.current_price
    }

    fn supplies_renewable(&self) -> bool {
        self.is_renewable()
    }
}

/// A market participant. Owned exclusively by the agent registry.
///
/// `resources` and `history` change only through [`Agent::post`], which the
/// ledger calls once per appended transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    /// Opaque behavioral label handed to decision providers.
    pub persona: String,
    resources: f64,
    profit: f64,
    history: Vec<Transaction>,
    pub payload: AgentPayload,
}

impl Agent {
    pub fn new(
        id: impl Into<AgentId>,
        persona: impl Into<String>,
        resources: f64,
        payload: AgentPayload,
    ) -> Self {
        Self {
            id: id.into(),
            persona: persona.into(),
            resources,
            profit: 0.0,
            history: Vec::new(),
            payload,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.payload.kind()
    }

    pub fn resources(&self) -> f64 {
        self.resources
    }

    pub fn profit(&self) -> f64 {
        self.profit
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    /// Append a transaction and apply its resource delta.
    pub fn post(&mut self, tx: Transaction) {
        self.resources += tx.resource_delta();
        self.history.push(tx);
    }

    pub fn add_profit(&mut self, delta: f64) {
        self.profit += delta;
    }

    pub fn transactions_at(&self, tick: u64) -> impl Iterator<Item = &Transaction> {
        self.history.iter().filter(move |t| t.tick == tick)
    }

    pub fn tick_summary(&self, tick: u64) -> TransactionSummary {
        TransactionSummary::from_transactions(self.transactions_at(tick))
    }

    pub fn as_tradable(&self) -> Option<&dyn Tradable> {
        match &self.payload {
            AgentPayload::Producer(p) => Some(p),
            AgentPayload::Prosumer(p) => Some(p),
            AgentPayload::Utility(u) => Some(u),
            AgentPayload::Consumer(_) | AgentPayload::Regulator(_) => None,
        }
    }

    pub fn as_tradable_mut(&mut self) -> Option<&mut dyn Tradable> {
        match &mut self.payload {
            AgentPayload::Producer(p) => Some(p),
            AgentPayload::Prosumer(p) => Some(p),
            AgentPayload::Utility(u) => Some(u),
            AgentPayload::Consumer(_) | AgentPayload::Regulator(_) => None,
        }
    }

    pub fn as_contractable(&self) -> Option<&dyn Contractable> {
        match &self.payload {
            AgentPayload::Producer(p) => Some(p),
            _ => None,
        }
    }

    /// Read-only copy handed to decision providers.
    pub fn view(&self) -> AgentView {
        let start = self.history.len().saturating_sub(VIEW_HISTORY_LEN);
        AgentView {
            id: self.id.clone(),
            kind: self.kind(),
            persona: self.persona.clone(),
            resources: self.resources,
            profit: self.profit,
            recent_transactions: self.history[start..].to_vec(),
            state: self.payload.clone(),
        }
    }
}

/// Snapshot of one agent's state, safe to move into a decision task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentView {
    pub id: AgentId,
    pub kind: AgentKind,
    pub persona: String,
    pub resources: f64,
    pub profit: f64,
    pub recent_transactions: Vec<Transaction>,
    pub state: AgentPayload,
}
