use serde::{Deserialize, Serialize};

/// Top-level configuration for a market run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    pub population: PopulationConfig,
    pub market: MarketParams,
    pub policy: PolicyConfig,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
}

/// How many agents of each kind the population builder creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PopulationConfig {
    pub consumers: usize,
    pub prosumers: usize,
    pub producers: usize,
    pub utilities: usize,
    /// Seed for the population's random parameters. Same seed, same market.
    pub seed: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            consumers: 100,
            prosumers: 20,
            producers: 10,
            utilities: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketParams {
    /// Fallback average price when no seller has posted a price.
    pub initial_price: f64,
    /// Highest unit price a seller may post.
    pub max_price: f64,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            max_price: 1_000_000.0,
        }
    }
}

/// Regulatory thresholds and levies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Carbon tax per unit of non-renewable output at start.
    pub carbon_tax_rate: f64,
    /// Lower bound for the adjusted carbon tax.
    pub carbon_tax_floor: f64,
    /// Paid per unit of renewable producer output.
    pub renewable_incentive: f64,
    /// Fraction above the average price at which gouging is flagged.
    pub max_price_increase: f64,
    /// HHI above which the largest producers are fined.
    pub concentration_threshold: f64,
    /// Renewable share target for utilities and the market as a whole.
    pub min_renewable_ratio: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            carbon_tax_rate: 10.0,
            carbon_tax_floor: 10.0,
            renewable_incentive: 5.0,
            max_price_increase: 0.2,
            concentration_threshold: 0.4,
            min_renewable_ratio: 0.3,
        }
    }
}

/// Whether agent-initiated spend may push resources below zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    #[default]
    AllowNegative,
    RejectNegative,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-agent decision timeout in milliseconds.
    pub decision_timeout_ms: u64,
    /// Maximum decision calls in flight at once.
    pub decision_concurrency: usize,
    /// Actions beyond this count in one decision are dropped.
    pub max_actions_per_agent: usize,
    pub balance_policy: BalancePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decision_timeout_ms: 30_000,
            decision_concurrency: 30,
            max_actions_per_agent: 8,
            balance_policy: BalancePolicy::AllowNegative,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    RuleBased,
    Command,
}

/// Which decision provider drives the agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Executable for the `command` provider. Receives the request JSON on stdin.
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_market() {
        let config = MarketConfig::default();
        assert_eq!(config.population.consumers, 100);
        assert_eq!(config.population.producers, 10);
        assert_eq!(config.market.initial_price, 100.0);
        assert_eq!(config.market.max_price, 1_000_000.0);
        assert_eq!(config.policy.concentration_threshold, 0.4);
        assert_eq!(config.scheduler.decision_concurrency, 30);
        assert_eq!(config.scheduler.balance_policy, BalancePolicy::AllowNegative);
        assert_eq!(config.provider.kind, ProviderKind::RuleBased);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[population]
consumers = 4
producers = 2
seed = 7

[policy]
max_price_increase = 0.5

[scheduler]
decision_timeout_ms = 500
balance_policy = "reject_negative"

[provider]
kind = "command"
command = "python3"
args = ["decide.py"]
"#;

        let config: MarketConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.population.consumers, 4);
        assert_eq!(config.population.utilities, 5);
        assert_eq!(config.population.seed, 7);
        assert_eq!(config.policy.max_price_increase, 0.5);
        assert_eq!(config.policy.carbon_tax_rate, 10.0);
        assert_eq!(config.scheduler.decision_timeout_ms, 500);
        assert_eq!(config.scheduler.balance_policy, BalancePolicy::RejectNegative);
        assert_eq!(config.provider.kind, ProviderKind::Command);
        assert_eq!(config.provider.command.as_deref(), Some("python3"));
        assert_eq!(config.provider.args, vec!["decide.py".to_string()]);
    }

    #[test]
    fn empty_toml_is_default() {
        let config: MarketConfig = toml::from_str("").unwrap();
        assert_eq!(config, MarketConfig::default());
    }
}
