use std::sync::Arc;

use loyalty_schemas::{validate_order_number, Balance, Decimal, LedgerEntry, Withdrawal};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{LedgerScope, LedgerStore};

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("order number {order} fails checksum validation")]
    InvalidFormat { order: String },

    #[error("withdrawal amount must be positive, got {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("ledger storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Balance reads and withdrawals.
///
/// A withdrawal reads the balance and writes its entry inside one ledger
/// scope that is locked per user, so concurrent withdrawals for the same
/// user cannot both spend the same funds.
pub struct BalanceService<L> {
    ledger: Arc<L>,
}

impl<L> Clone for BalanceService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<L: LedgerStore> BalanceService<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    pub async fn withdraw(
        &self,
        amount: Decimal,
        order_number: &str,
        user_id: Uuid,
    ) -> Result<LedgerEntry, BalanceError> {
        if !validate_order_number(order_number) {
            return Err(BalanceError::InvalidFormat {
                order: order_number.to_string(),
            });
        }
        if amount <= Decimal::ZERO {
            return Err(BalanceError::InvalidAmount { amount });
        }

        let mut scope = self.ledger.begin().await.map_err(BalanceError::Storage)?;
        match debit(&mut scope, amount, order_number, user_id).await {
            Ok(entry) => {
                scope.commit().await.map_err(BalanceError::Storage)?;
                info!(user = %user_id, order = %order_number, sum = %amount, "withdrawal committed");
                Ok(entry)
            }
            Err(e) => {
                if let Err(rb) = scope.rollback().await {
                    warn!(user = %user_id, error = %rb, "ledger scope rollback failed");
                }
                Err(e)
            }
        }
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Balance, BalanceError> {
        let current = self
            .ledger
            .balance(user_id)
            .await
            .map_err(BalanceError::Storage)?;
        let withdrawn = self
            .ledger
            .withdraw_sum(user_id)
            .await
            .map_err(BalanceError::Storage)?;
        Ok(Balance { current, withdrawn })
    }

    pub async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, BalanceError> {
        let entries = self
            .ledger
            .withdrawals(user_id)
            .await
            .map_err(BalanceError::Storage)?;
        Ok(entries.iter().map(Withdrawal::from).collect())
    }
}

async fn debit<S: LedgerScope>(
    scope: &mut S,
    amount: Decimal,
    order_number: &str,
    user_id: Uuid,
) -> Result<LedgerEntry, BalanceError> {
    let balance = scope
        .lock_balance(user_id)
        .await
        .map_err(BalanceError::Storage)?;
    if balance < amount {
        return Err(BalanceError::InsufficientFunds {
            balance,
            requested: amount,
        });
    }

    let entry = LedgerEntry::withdrawal(user_id, order_number, amount);
    scope
        .insert_entry(&entry)
        .await
        .map_err(BalanceError::Storage)?;
    Ok(entry)
}
