use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentKind, AgentPayload, AgentView};

/// Fraction of capacity a producer runs at when it has no decision.
pub const DEFAULT_PRODUCTION_SHARE: f64 = 0.8;

/// One declared intent. Validated and applied by the commit layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Buy { seller_id: AgentId, amount: f64 },
    Sell { buyer_id: AgentId, amount: f64 },
    Produce { level: f64 },
    SetPrice { price: f64 },
    /// Positive stores energy, negative withdraws it.
    MoveStorage { amount: f64 },
    Upgrade,
    NegotiateContract {
        producer_id: AgentId,
        amount: f64,
        duration: u32,
    },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Buy { .. } => "buy",
            Self::Sell { .. } => "sell",
            Self::Produce { .. } => "produce",
            Self::SetPrice { .. } => "set_price",
            Self::MoveStorage { .. } => "move_storage",
            Self::Upgrade => "upgrade",
            Self::NegotiateContract { .. } => "negotiate_contract",
        }
    }
}

/// What a decision provider returns for one agent in one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Decision {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            rationale: None,
        }
    }

    pub fn no_trade() -> Self {
        Self::default()
    }

    /// Fallback used when a provider fails or times out.
    pub fn default_for(agent: &AgentView) -> Self {
        match (&agent.kind, &agent.state) {
            (AgentKind::Producer, AgentPayload::Producer(p)) => Self::new(vec![Action::Produce {
                level: p.max_capacity * DEFAULT_PRODUCTION_SHARE,
            }]),
            _ => Self::no_trade(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, ConsumerState, ProducerState, ProductionType};

    #[test]
    fn action_json_is_tagged() {
        let action: Action =
            serde_json::from_str(r#"{"action":"buy","seller_id":"utility_0","amount":12.5}"#)
                .unwrap();
        assert_eq!(
            action,
            Action::Buy {
                seller_id: "utility_0".to_string(),
                amount: 12.5
            }
        );
        let upgrade: Action = serde_json::from_str(r#"{"action":"upgrade"}"#).unwrap();
        assert_eq!(upgrade.label(), "upgrade");
    }

    #[test]
    fn decision_tolerates_missing_fields() {
        let decision: Decision = serde_json::from_str("{}").unwrap();
        assert!(decision.actions.is_empty());
        assert!(decision.rationale.is_none());
    }

    #[test]
    fn default_decision_per_kind() {
        let producer = Agent::new(
            "producer_0",
            "balanced",
            0.0,
            AgentPayload::Producer(ProducerState {
                production_type: ProductionType::Coal,
                max_capacity: 500.0,
                base_production_cost: 30.0,
                maintenance_cost_rate: 0.02,
                upgrade_cost: 5000.0,
                upgrade_capacity_increase: 2000.0,
                min_profit_margin: 0.15,
                current_production: 0.0,
                current_price: 39.0,
                spot_sold: 0.0,
            }),
        );
        assert_eq!(
            Decision::default_for(&producer.view()).actions,
            vec![Action::Produce { level: 400.0 }]
        );

        let consumer = Agent::new(
            "consumer_0",
            "budget_conscious",
            1000.0,
            AgentPayload::Consumer(ConsumerState::new(100.0, 0.2)),
        );
        assert!(Decision::default_for(&consumer.view()).actions.is_empty());
    }
}
