use gridmarket_models::{AgentId, CostReason, Transaction, TransactionKind};

use crate::error::MarketError;
use crate::registry::AgentRegistry;

/// One appended transaction and the agent whose history it landed in.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub agent_id: AgentId,
    pub transaction: Transaction,
}

/// Append-only record of resource transfers.
///
/// The ledger is the only writer of agent balances. It never rejects a
/// transfer for lack of funds; balance floors are enforced by callers.
#[derive(Debug, Default)]
pub struct Ledger {
    journal: Vec<JournalEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer initiated by `from`.
    ///
    /// For `Sell`, `from` is the seller and `to` the buyer. For `Buy`, `from`
    /// is the buyer and `to` the seller. Both produce a mirrored pair and
    /// return `(from's entry, to's entry)`. `Cost` touches only `from`; `to`
    /// must be `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        registry: &mut AgentRegistry,
        tick: u64,
        kind: TransactionKind,
        amount: f64,
        unit_price: f64,
        from: &str,
        to: Option<&str>,
        is_renewable: bool,
    ) -> Result<(Transaction, Option<Transaction>), MarketError> {
        validate_terms(amount, unit_price)?;

        if kind == TransactionKind::Cost {
            if to.is_some() {
                return Err(MarketError::Validation(
                    "cost transactions have no counterparty".to_string(),
                ));
            }
            let tx = self.post_cost(registry, tick, from, amount, unit_price, None)?;
            return Ok((tx, None));
        }

        let to = to.ok_or_else(|| {
            MarketError::Validation(format!("{kind:?} transaction needs a counterparty"))
        })?;
        if from == to {
            return Err(MarketError::Validation(format!(
                "agent {from} cannot trade with itself"
            )));
        }
        // Both sides must exist before either is touched.
        registry.get(from)?;
        registry.get(to)?;

        let mirror_kind = match kind {
            TransactionKind::Sell => TransactionKind::Buy,
            _ => TransactionKind::Sell,
        };
        let primary = Transaction {
            tick,
            kind,
            amount,
            unit_price,
            counterparty_id: Some(to.to_string()),
            is_renewable,
            reason: None,
        };
        let mirror = Transaction {
            tick,
            kind: mirror_kind,
            amount,
            unit_price,
            counterparty_id: Some(from.to_string()),
            is_renewable,
            reason: None,
        };

        let imbalance = primary.resource_delta() + mirror.resource_delta();
        if imbalance != 0.0 {
            return Err(MarketError::InvariantViolation(format!(
                "transfer between {from} and {to} at tick {tick} leaves {imbalance} unaccounted"
            )));
        }

        self.append(registry, from, primary.clone())?;
        self.append(registry, to, mirror.clone())?;

        tracing::debug!(
            tick,
            from,
            to,
            kind = ?kind,
            amount,
            unit_price,
            "Recorded transfer"
        );

        Ok((primary, Some(mirror)))
    }

    /// Charge a self-incurred cost to `agent_id`. Nobody is credited.
    pub fn record_cost(
        &mut self,
        registry: &mut AgentRegistry,
        tick: u64,
        agent_id: &str,
        amount: f64,
        unit_price: f64,
        reason: CostReason,
    ) -> Result<Transaction, MarketError> {
        validate_terms(amount, unit_price)?;
        self.post_cost(registry, tick, agent_id, amount, unit_price, Some(reason))
    }

    fn post_cost(
        &mut self,
        registry: &mut AgentRegistry,
        tick: u64,
        agent_id: &str,
        amount: f64,
        unit_price: f64,
        reason: Option<CostReason>,
    ) -> Result<Transaction, MarketError> {
        let tx = Transaction {
            tick,
            kind: TransactionKind::Cost,
            amount,
            unit_price,
            counterparty_id: None,
            is_renewable: false,
            reason,
        };
        self.append(registry, agent_id, tx.clone())?;
        tracing::debug!(tick, agent = agent_id, value = tx.total_value(), reason = ?reason, "Recorded cost");
        Ok(tx)
    }

    fn append(
        &mut self,
        registry: &mut AgentRegistry,
        agent_id: &str,
        tx: Transaction,
    ) -> Result<(), MarketError> {
        registry.get_mut(agent_id)?.post(tx.clone());
        self.journal.push(JournalEntry {
            agent_id: agent_id.to_string(),
            transaction: tx,
        });
        Ok(())
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn entries_at(&self, tick: u64) -> impl Iterator<Item = &JournalEntry> {
        self.journal.iter().filter(move |e| e.transaction.tick == tick)
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }
}

fn validate_terms(amount: f64, unit_price: f64) -> Result<(), MarketError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(MarketError::Validation(format!(
            "amount must be a non-negative number, got {amount}"
        )));
    }
    if !unit_price.is_finite() || unit_price < 0.0 {
        return Err(MarketError::Validation(format!(
            "unit price must be a non-negative number, got {unit_price}"
        )));
    }
    let value = amount * unit_price;
    if !value.is_finite() {
        return Err(MarketError::Validation(format!(
            "{amount} units at {unit_price} overflows"
        )));
    }
    Ok(())
}
