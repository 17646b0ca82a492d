use async_trait::async_trait;
use gridmarket_models::{AgentView, Decision, MarketConfig, MarketSnapshot};

use crate::error::DecisionError;

/// Produces the actions one agent wants to take this tick. Mockable for testing.
///
/// Implementations only see copies of market state and may run concurrently
/// for different agents.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(
        &self,
        agent: &AgentView,
        market: &MarketSnapshot,
        config: &MarketConfig,
    ) -> Result<Decision, DecisionError>;
}
