pub mod command;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod provider;
pub mod rule_based;
pub mod scheduler;
pub mod sink;

pub mod test_support;

pub use command::{CommandConfig, CommandProvider};
pub use error::{DecisionError, SchedulerError, SinkError};
pub use provider::DecisionProvider;
pub use rule_based::RuleBasedProvider;
pub use scheduler::{Phase, RunSummary, TickScheduler};
pub use sink::{ChannelSink, ReportSink};
