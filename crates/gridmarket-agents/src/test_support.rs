//! Scriptable decision providers for exercising the scheduler without any
//! external process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridmarket_models::{AgentId, AgentView, Decision, MarketConfig, MarketSnapshot};
use tokio::sync::Mutex;

use crate::error::DecisionError;
use crate::provider::DecisionProvider;

/// What a [`ScriptedProvider`] does for one agent.
#[derive(Debug, Clone)]
pub enum Script {
    Decide(Decision),
    /// Wait, then return the decision.
    Delay(Duration, Decision),
    Fail,
    /// Never returns within any reasonable timeout.
    Stall,
    Panic,
}

/// Returns a fixed behavior per agent ID and records who was asked.
///
/// Agents without a script get [`Decision::no_trade`].
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: BTreeMap<AgentId, Script>,
    calls: Arc<Mutex<Vec<AgentId>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, agent_id: &str, script: Script) -> Self {
        self.scripts.insert(agent_id.to_string(), script);
        self
    }

    pub fn decide(self, agent_id: &str, decision: Decision) -> Self {
        self.script(agent_id, Script::Decide(decision))
    }

    pub fn fail(self, agent_id: &str) -> Self {
        self.script(agent_id, Script::Fail)
    }

    pub fn stall(self, agent_id: &str) -> Self {
        self.script(agent_id, Script::Stall)
    }

    pub fn panic(self, agent_id: &str) -> Self {
        self.script(agent_id, Script::Panic)
    }

    /// Handle to the list of agents asked so far, in completion order.
    pub fn calls(&self) -> Arc<Mutex<Vec<AgentId>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(
        &self,
        agent: &AgentView,
        _market: &MarketSnapshot,
        _config: &MarketConfig,
    ) -> Result<Decision, DecisionError> {
        let script = self.scripts.get(&agent.id).cloned();
        let result = match script {
            None => Ok(Decision::no_trade()),
            Some(Script::Decide(decision)) => Ok(decision),
            Some(Script::Delay(delay, decision)) => {
                tokio::time::sleep(delay).await;
                Ok(decision)
            }
            Some(Script::Fail) => Err(DecisionError::Unavailable(format!(
                "scripted failure for {}",
                agent.id
            ))),
            Some(Script::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Decision::no_trade())
            }
            Some(Script::Panic) => panic!("scripted panic for {}", agent.id),
        };
        self.calls.lock().await.push(agent.id.clone());
        result
    }
}

/// Sleeps on every call and tracks the peak number of calls in flight.
pub struct ConcurrencyProbe {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl DecisionProvider for ConcurrencyProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn decide(
        &self,
        _agent: &AgentView,
        _market: &MarketSnapshot,
        _config: &MarketConfig,
    ) -> Result<Decision, DecisionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Decision::no_trade())
    }
}
