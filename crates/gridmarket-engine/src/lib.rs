pub mod aggregator;
pub mod contracts;
pub mod error;
pub mod ledger;
pub mod market;
pub mod policy;
pub mod population;
pub mod registry;

pub use contracts::ContractBook;
pub use error::MarketError;
pub use ledger::{JournalEntry, Ledger};
pub use market::{Market, Settlement};
pub use registry::AgentRegistry;
