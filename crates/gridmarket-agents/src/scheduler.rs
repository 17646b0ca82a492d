use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gridmarket_engine::{Market, MarketError, Settlement};
use gridmarket_models::{
    AgentDelta, AgentId, AgentKind, Decision, MarketConfig, MarketSnapshot, RejectedAction,
    TickReport,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DecisionError, SchedulerError};
use crate::provider::DecisionProvider;
use crate::sink::ReportSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Snapshotting,
    Deciding,
    Committing,
    Settling,
}

/// Totals over a whole run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub ticks_completed: u64,
    pub cancelled: bool,
    pub total_violations: usize,
    pub total_fines: f64,
    pub total_rejected_actions: usize,
    pub total_defaulted_decisions: usize,
    pub final_snapshot: Option<MarketSnapshot>,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ticks_completed: 0,
            cancelled: false,
            total_violations: 0,
            total_fines: 0.0,
            total_rejected_actions: 0,
            total_defaulted_decisions: 0,
            final_snapshot: None,
        }
    }

    fn record(&mut self, report: TickReport) {
        self.ticks_completed += 1;
        self.total_violations += report.violations.len();
        self.total_fines += report.total_fines();
        self.total_rejected_actions += report.rejected_actions.len();
        self.total_defaulted_decisions += report.defaulted_agents.len();
        self.final_snapshot = Some(report.snapshot);
    }
}

/// Drives the market one tick at a time: snapshot, concurrent decisions,
/// serial commit, settlement, report.
pub struct TickScheduler {
    market: Market,
    provider: Arc<dyn DecisionProvider>,
    sinks: Vec<Arc<dyn ReportSink>>,
    config: Arc<MarketConfig>,
    tick: u64,
    phase: Phase,
    run_id: Uuid,
}

impl TickScheduler {
    pub fn new(market: Market, provider: Arc<dyn DecisionProvider>, config: MarketConfig) -> Self {
        Self {
            market,
            provider,
            sinks: Vec::new(),
            config: Arc::new(config),
            tick: 0,
            phase: Phase::Idle,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn market_mut(&mut self) -> &mut Market {
        &mut self.market
    }

    /// The next tick to run.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run ticks until `ticks` have settled or `cancel` fires. Cancellation is
    /// checked between ticks only.
    pub async fn run(
        &mut self,
        ticks: u64,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary::new(self.run_id);
        for _ in 0..ticks {
            if cancel.is_cancelled() {
                info!(tick = self.tick, run = %self.run_id, "Run cancelled");
                summary.cancelled = true;
                break;
            }
            let report = self.run_tick().await?;
            summary.record(report);
        }
        info!(
            run = %self.run_id,
            ticks = summary.ticks_completed,
            violations = summary.total_violations,
            fines = summary.total_fines,
            "Run finished"
        );
        Ok(summary)
    }

    /// Run one full tick and emit its report.
    ///
    /// Only a broken market invariant fails the tick; the tick counter does
    /// not advance in that case.
    pub async fn run_tick(&mut self) -> Result<TickReport, SchedulerError> {
        let tick = self.tick;
        let start = Instant::now();

        self.phase = Phase::Snapshotting;
        let snapshot = Arc::new(self.market.snapshot(tick));

        self.phase = Phase::Deciding;
        let (decisions, defaulted_agents) = self.collect_decisions(tick, &snapshot).await;

        self.phase = Phase::Committing;
        let before = self.market.registry().balances();
        match self.market.begin_tick(tick) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(self.abort(tick, e)),
            Err(e) => warn!(tick, error = %e, "Tick start incomplete"),
        }
        let rejected_actions = self.commit(tick, &decisions)?;

        self.phase = Phase::Settling;
        let settlement = match self.market.settle(tick) {
            Ok(settlement) => settlement,
            Err(e) if e.is_fatal() => return Err(self.abort(tick, e)),
            Err(e) => {
                warn!(tick, error = %e, "Settlement incomplete");
                Settlement {
                    snapshot: self.market.snapshot(tick),
                    violations: Vec::new(),
                    expired_contracts: Vec::new(),
                }
            }
        };
        let agent_deltas = self.book_profits(tick, &before);

        let report = TickReport {
            tick,
            settled_at: Utc::now(),
            snapshot: settlement.snapshot,
            agent_deltas,
            violations: settlement.violations,
            rejected_actions,
            expired_contracts: settlement.expired_contracts,
            defaulted_agents,
        };

        for sink in &self.sinks {
            if let Err(e) = sink.emit(&report).await {
                warn!(tick, sink = sink.name(), error = %e, "Report sink failed");
            }
        }

        self.tick += 1;
        self.phase = Phase::Idle;
        info!(
            tick,
            violations = report.violations.len(),
            rejected = report.rejected_actions.len(),
            defaulted = report.defaulted_agents.len(),
            average_price = report.snapshot.average_price,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tick settled"
        );
        Ok(report)
    }

    /// Ask the provider for every non-regulator agent's decision.
    ///
    /// Failures, timeouts and panics fall back to [`Decision::default_for`] and
    /// are never retried. Returns decisions keyed by agent ID plus the IDs
    /// that were defaulted.
    async fn collect_decisions(
        &self,
        tick: u64,
        snapshot: &Arc<MarketSnapshot>,
    ) -> (BTreeMap<AgentId, Decision>, Vec<AgentId>) {
        let scheduler = &self.config.scheduler;
        let permits = Arc::new(Semaphore::new(scheduler.decision_concurrency.max(1)));
        let timeout = Duration::from_millis(scheduler.decision_timeout_ms);

        let mut handles = Vec::new();
        for agent in self.market.registry().iter() {
            if agent.kind() == AgentKind::Regulator {
                continue;
            }
            let view = agent.view();
            let task_view = view.clone();
            let provider = Arc::clone(&self.provider);
            let market = Arc::clone(snapshot);
            let config = Arc::clone(&self.config);
            let permits = Arc::clone(&permits);

            handles.push((
                view,
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = match permits.acquire_owned().await {
                        Ok(_permit) => {
                            tokio::time::timeout(
                                timeout,
                                provider.decide(&task_view, &market, &config),
                            )
                            .await
                            .unwrap_or(Err(DecisionError::Timeout(timeout.as_millis() as u64)))
                        }
                        Err(e) => Err(DecisionError::Unavailable(format!(
                            "decision permits closed: {e}"
                        ))),
                    };
                    (result, started.elapsed())
                }),
            ));
        }

        let limit = scheduler.max_actions_per_agent;
        let mut decisions = BTreeMap::new();
        let mut defaulted = Vec::new();
        for (view, handle) in handles {
            let mut decision = match handle.await {
                Ok((Ok(decision), elapsed)) => {
                    debug!(
                        tick,
                        agent = %view.id,
                        actions = decision.actions.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Decision received"
                    );
                    decision
                }
                Ok((Err(e), elapsed)) => {
                    warn!(
                        tick,
                        agent = %view.id,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Decision failed, using default"
                    );
                    defaulted.push(view.id.clone());
                    Decision::default_for(&view)
                }
                Err(e) => {
                    error!(tick, agent = %view.id, error = %e, "Decision task panicked");
                    defaulted.push(view.id.clone());
                    Decision::default_for(&view)
                }
            };
            if decision.actions.len() > limit {
                warn!(
                    tick,
                    agent = %view.id,
                    proposed = decision.actions.len(),
                    kept = limit,
                    "Too many actions, dropping the excess"
                );
                decision.actions.truncate(limit);
            }
            decisions.insert(view.id, decision);
        }
        (decisions, defaulted)
    }

    /// Apply every action in ascending agent-ID order.
    fn commit(
        &mut self,
        tick: u64,
        decisions: &BTreeMap<AgentId, Decision>,
    ) -> Result<Vec<RejectedAction>, SchedulerError> {
        let mut rejected = Vec::new();
        for (agent_id, decision) in decisions {
            for action in &decision.actions {
                match self.market.apply(agent_id, action, tick) {
                    Ok(()) => {
                        debug!(tick, agent = %agent_id, action = action.label(), "Action applied");
                    }
                    Err(e) if e.is_fatal() => return Err(self.abort(tick, e)),
                    Err(e) => {
                        warn!(
                            tick,
                            agent = %agent_id,
                            action = action.label(),
                            error = %e,
                            "Action rejected"
                        );
                        rejected.push(RejectedAction {
                            agent_id: agent_id.clone(),
                            action: action.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(rejected)
    }

    /// Add this tick's resource change to each agent's profit.
    fn book_profits(&mut self, tick: u64, before: &BTreeMap<AgentId, f64>) -> Vec<AgentDelta> {
        let mut deltas = Vec::new();
        for agent in self.market.registry_mut().iter_mut() {
            let resources_before = before.get(&agent.id).copied().unwrap_or(0.0);
            let resources_after = agent.resources();
            let profit_delta = resources_after - resources_before;
            agent.add_profit(profit_delta);

            let summary = agent.tick_summary(tick);
            deltas.push(AgentDelta {
                agent_id: agent.id.clone(),
                kind: agent.kind(),
                resources_before,
                resources_after,
                profit_delta,
                bought_value: summary.bought_value,
                sold_value: summary.sold_value,
                cost_value: summary.cost_value,
            });
        }
        deltas
    }

    fn abort(&mut self, tick: u64, source: MarketError) -> SchedulerError {
        error!(tick, error = %source, "Tick aborted");
        self.phase = Phase::Idle;
        SchedulerError::Aborted { tick, source }
    }
}
