//! gridmarket - a tick-driven energy market.
//!
//! Consumers, prosumers, producers and utilities trade energy each tick while
//! a regulator fines violations and steers the carbon tax. Agent decisions
//! come from a pluggable [`DecisionProvider`]; state changes are committed
//! serially so a run is reproducible for a given seed and provider.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use gridmarket::models::MarketConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut scheduler = gridmarket::build_scheduler(&MarketConfig::default())?;
//! let summary = scheduler.run(24, CancellationToken::new()).await?;
//! println!("{} ticks, {} violations", summary.ticks_completed, summary.total_violations);
//! # Ok(())
//! # }
//! ```

pub use gridmarket_agents as agents;
pub use gridmarket_engine as engine;
pub use gridmarket_models as models;
pub use gridmarket_store as store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use gridmarket_agents::{
    CommandConfig, CommandProvider, DecisionProvider, RuleBasedProvider, TickScheduler,
};
use gridmarket_engine::Market;
use gridmarket_models::{MarketConfig, ProviderKind};

/// Read and parse a TOML configuration file.
pub fn load_config(path: &str) -> anyhow::Result<MarketConfig> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {path}"))
}

/// Provider selected by `config.provider`.
pub fn build_provider(config: &MarketConfig) -> anyhow::Result<Arc<dyn DecisionProvider>> {
    let provider: Arc<dyn DecisionProvider> = match config.provider.kind {
        ProviderKind::RuleBased => Arc::new(RuleBasedProvider::new()),
        ProviderKind::Command => {
            let Some(program) = config.provider.command.clone() else {
                bail!("provider.kind = \"command\" requires provider.command");
            };
            Arc::new(CommandProvider::new(CommandConfig {
                program,
                args: config.provider.args.clone(),
                timeout: Duration::from_millis(config.scheduler.decision_timeout_ms),
            }))
        }
    };
    Ok(provider)
}

/// Build the seeded market and a scheduler driving it. No sinks attached.
pub fn build_scheduler(config: &MarketConfig) -> anyhow::Result<TickScheduler> {
    let market = Market::from_config(config).context("Failed to build market")?;
    let provider = build_provider(config)?;
    Ok(TickScheduler::new(market, provider, config.clone()))
}
