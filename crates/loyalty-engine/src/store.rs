//! Storage ports consumed by the engine.

use anyhow::Result;
use async_trait::async_trait;
use loyalty_schemas::{Decimal, LedgerEntry, Order, OrderStatus, OrderView};
use uuid::Uuid;

pub use loyalty_db::BatchOutcome;

/// Order persistence.
///
/// Used as `Arc<dyn OrderStore>` by the scheduler, processor, aggregator and
/// intake service.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders in NEW or PROCESSING.
    async fn list_unresolved(&self) -> Result<Vec<Order>>;

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>>;

    /// Batch lookup; unknown numbers are absent from the result.
    async fn get_by_numbers(&self, numbers: &[String]) -> Result<Vec<Order>>;

    /// Insert a new order. `Ok(false)` when the number is already taken.
    async fn insert(&self, order: &Order) -> Result<bool>;

    /// The user's orders joined with credited accrual, newest first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OrderView>>;

    /// Move a non-terminal order to `status`. `Ok(false)` when the order is
    /// missing or already terminal.
    async fn update_status(&self, number: &str, status: OrderStatus) -> Result<bool>;

    /// Mark an order INVALID unless it is already terminal.
    async fn invalidate(&self, number: &str) -> Result<bool> {
        self.update_status(number, OrderStatus::Invalid).await
    }

    /// Apply all status updates and INCOME entries atomically.
    async fn batch_update(&self, orders: &[Order], entries: &[LedgerEntry]) -> Result<BatchOutcome>;
}

/// Ledger persistence.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Scope: LedgerScope;

    /// Sum of all the user's entries.
    async fn balance(&self, user_id: Uuid) -> Result<Decimal>;

    /// Absolute sum of the user's WITHDRAW entries.
    async fn withdraw_sum(&self, user_id: Uuid) -> Result<Decimal>;

    /// The user's WITHDRAW entries, newest first.
    async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>>;

    /// Unscoped single insert.
    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<()>;

    /// Open a transaction scope.
    async fn begin(&self) -> Result<Self::Scope>;
}

/// One transaction over the ledger.
///
/// `lock_balance` must serialise against every other scope touching the same
/// user until this scope commits or rolls back. Dropping a scope without
/// committing rolls it back.
#[async_trait]
pub trait LedgerScope: Send {
    /// Lock the user's ledger and read their balance.
    async fn lock_balance(&mut self, user_id: Uuid) -> Result<Decimal>;

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
