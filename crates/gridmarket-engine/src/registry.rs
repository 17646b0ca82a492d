use std::collections::BTreeMap;

use gridmarket_models::{
    Agent, AgentId, AgentKind, AgentPayload, ConsumerState, ProducerState, ProsumerState,
    RegulatorState, UtilityState,
};

use crate::error::MarketError;

/// Sole owner of every agent in the market.
///
/// Agents are keyed by ID in a `BTreeMap`, so iteration is always in ascending
/// ID order. Commit order and snapshot layout both rely on that.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentId, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: Agent) -> Result<(), MarketError> {
        if self.agents.contains_key(&agent.id) {
            return Err(MarketError::DuplicateAgent(agent.id));
        }
        self.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Agent, MarketError> {
        self.agents
            .get(id)
            .ok_or_else(|| MarketError::UnknownAgent(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Agent, MarketError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| MarketError::UnknownAgent(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }

    pub fn of_kind(&self, kind: AgentKind) -> impl Iterator<Item = &Agent> {
        self.agents.values().filter(move |a| a.kind() == kind)
    }

    pub fn count(&self, kind: AgentKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn producer(&self, id: &str) -> Result<&ProducerState, MarketError> {
        let agent = self.get(id)?;
        match &agent.payload {
            AgentPayload::Producer(p) => Ok(p),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a producer")),
        }
    }

    pub fn producer_mut(&mut self, id: &str) -> Result<&mut ProducerState, MarketError> {
        let agent = self.get_mut(id)?;
        match &mut agent.payload {
            AgentPayload::Producer(p) => Ok(p),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a producer")),
        }
    }

    pub fn utility(&self, id: &str) -> Result<&UtilityState, MarketError> {
        let agent = self.get(id)?;
        match &agent.payload {
            AgentPayload::Utility(u) => Ok(u),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a utility")),
        }
    }

    pub fn utility_mut(&mut self, id: &str) -> Result<&mut UtilityState, MarketError> {
        let agent = self.get_mut(id)?;
        match &mut agent.payload {
            AgentPayload::Utility(u) => Ok(u),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a utility")),
        }
    }

    pub fn prosumer_mut(&mut self, id: &str) -> Result<&mut ProsumerState, MarketError> {
        let agent = self.get_mut(id)?;
        match &mut agent.payload {
            AgentPayload::Prosumer(p) => Ok(p),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a prosumer")),
        }
    }

    pub fn consumer_mut(&mut self, id: &str) -> Result<&mut ConsumerState, MarketError> {
        let agent = self.get_mut(id)?;
        match &mut agent.payload {
            AgentPayload::Consumer(c) => Ok(c),
            other => Err(MarketError::wrong_kind(id, other.kind(), "act as a consumer")),
        }
    }

    /// The market's regulator. At most one is expected; the first by ID wins.
    pub fn regulator(&self) -> Option<(&AgentId, &RegulatorState)> {
        self.agents.values().find_map(|a| match &a.payload {
            AgentPayload::Regulator(r) => Some((&a.id, r)),
            _ => None,
        })
    }

    pub fn regulator_mut(&mut self) -> Option<&mut RegulatorState> {
        self.agents.values_mut().find_map(|a| match &mut a.payload {
            AgentPayload::Regulator(r) => Some(r),
            _ => None,
        })
    }

    /// Carbon tax currently enforced by the regulator, if there is one.
    pub fn carbon_tax_rate(&self) -> Option<f64> {
        self.regulator().map(|(_, r)| r.current_carbon_tax)
    }

    /// Resources of every agent, keyed by ID.
    pub fn balances(&self) -> BTreeMap<AgentId, f64> {
        self.agents
            .iter()
            .map(|(id, a)| (id.clone(), a.resources()))
            .collect()
    }
}
