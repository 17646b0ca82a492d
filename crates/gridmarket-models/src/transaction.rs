use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::violation::ViolationKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Buy,
    Sell,
    /// Self-incurred spend with no counterparty credit.
    Cost,
}

/// Why a `cost` transaction was charged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CostReason {
    Maintenance,
    Upgrade,
    CarbonTax,
    Fine(ViolationKind),
}

/// One side of a resource transfer. Immutable once appended to an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub tick: u64,
    pub kind: TransactionKind,
    pub amount: f64,
    pub unit_price: f64,
    /// `None` for `cost` transactions.
    pub counterparty_id: Option<AgentId>,
    pub is_renewable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CostReason>,
}

impl Transaction {
    pub fn total_value(&self) -> f64 {
        self.amount * self.unit_price
    }

    /// Signed change this transaction applies to its owner's resources.
    pub fn resource_delta(&self) -> f64 {
        match self.kind {
            TransactionKind::Sell => self.total_value(),
            TransactionKind::Buy | TransactionKind::Cost => -self.total_value(),
        }
    }
}

/// Per-tick aggregate of an agent's transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionSummary {
    pub bought_amount: f64,
    pub bought_value: f64,
    pub sold_amount: f64,
    pub sold_value: f64,
    pub cost_value: f64,
}

impl TransactionSummary {
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut summary = Self::default();
        for tx in txs {
            match tx.kind {
                TransactionKind::Buy => {
                    summary.bought_amount += tx.amount;
                    summary.bought_value += tx.total_value();
                }
                TransactionKind::Sell => {
                    summary.sold_amount += tx.amount;
                    summary.sold_value += tx.total_value();
                }
                TransactionKind::Cost => summary.cost_value += tx.total_value(),
            }
        }
        summary
    }

    pub fn net(&self) -> f64 {
        self.sold_value - self.bought_value - self.cost_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(kind: TransactionKind, amount: f64, unit_price: f64) -> Transaction {
        Transaction {
            tick: 0,
            kind,
            amount,
            unit_price,
            counterparty_id: None,
            is_renewable: false,
            reason: None,
        }
    }

    #[test]
    fn resource_delta_sign_follows_kind() {
        assert_eq!(tx(TransactionKind::Sell, 30.0, 47.0).resource_delta(), 1410.0);
        assert_eq!(tx(TransactionKind::Buy, 30.0, 47.0).resource_delta(), -1410.0);
        assert_eq!(tx(TransactionKind::Cost, 60.0, 1.0).resource_delta(), -60.0);
    }

    #[test]
    fn summary_splits_by_kind() {
        let txs = vec![
            tx(TransactionKind::Sell, 10.0, 5.0),
            tx(TransactionKind::Buy, 4.0, 2.0),
            tx(TransactionKind::Cost, 3.0, 1.0),
        ];
        let summary = TransactionSummary::from_transactions(&txs);
        assert_eq!(summary.sold_value, 50.0);
        assert_eq!(summary.bought_amount, 4.0);
        assert_eq!(summary.cost_value, 3.0);
        assert_eq!(summary.net(), 39.0);
    }

    #[test]
    fn fine_reason_serialization() {
        let json =
            serde_json::to_string(&CostReason::Fine(ViolationKind::PriceGouging)).unwrap();
        assert_eq!(json, r#"{"fine":"price_gouging"}"#);
        assert_eq!(
            serde_json::to_string(&CostReason::CarbonTax).unwrap(),
            "\"carbon_tax\""
        );
    }
}
