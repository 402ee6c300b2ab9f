use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Income,
    Withdraw,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "INCOME",
            EntryType::Withdraw => "WITHDRAW",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INCOME" => Ok(EntryType::Income),
            "WITHDRAW" => Ok(EntryType::Withdraw),
            other => Err(anyhow!("invalid ledger entry type: {}", other)),
        }
    }
}

/// Immutable signed balance movement.
///
/// `amount > 0` for INCOME, `amount < 0` for WITHDRAW. A user's balance is the
/// sum of their entries' amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub entry_type: EntryType,
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Accrual credited for a processed order.
    pub fn income(user_id: Uuid, order_number: impl Into<String>, accrual: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            order_number: order_number.into(),
            amount: accrual,
            entry_type: EntryType::Income,
            processed_at: Utc::now(),
        }
    }

    /// Withdrawal of `sum` (given as a positive number) against `order_number`.
    pub fn withdrawal(user_id: Uuid, order_number: impl Into<String>, sum: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            order_number: order_number.into(),
            amount: -sum,
            entry_type: EntryType::Withdraw,
            processed_at: Utc::now(),
        }
    }
}

/// Current balance and total withdrawn, both non-negative in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// A withdrawal as reported to its owner (positive `sum`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for Withdrawal {
    fn from(e: &LedgerEntry) -> Self {
        Withdrawal {
            order: e.order_number.clone(),
            sum: e.amount.abs(),
            processed_at: e.processed_at,
        }
    }
}
