pub mod action;
pub mod agent;
pub mod config;
pub mod contract;
pub mod report;
pub mod snapshot;
pub mod transaction;
pub mod violation;

pub use action::{Action, Decision};
pub use agent::{
    Agent, AgentId, AgentKind, AgentPayload, AgentView, Contractable, ConsumerState,
    CustomerRecord, ProducerState, ProductionType, ProsumerState, RegulatorState, Tradable,
    UtilityState,
};
pub use config::{
    BalancePolicy, MarketConfig, MarketParams, PolicyConfig, PopulationConfig, ProviderConfig,
    ProviderKind, SchedulerConfig,
};
pub use contract::{Contract, ContractId};
pub use report::{AgentDelta, RejectedAction, TickReport};
pub use snapshot::{MarketSnapshot, Offer, ProducerSummary, SellerKind, UtilitySummary};
pub use transaction::{CostReason, Transaction, TransactionKind, TransactionSummary};
pub use violation::{Violation, ViolationKind};
