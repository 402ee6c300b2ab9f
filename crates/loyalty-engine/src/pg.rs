use anyhow::{Context, Result};
use async_trait::async_trait;
use loyalty_schemas::{Decimal, LedgerEntry, Order, OrderStatus, OrderView};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::store::{BatchOutcome, LedgerScope, LedgerStore, OrderStore};

const ORDER_NUMBER_CONSTRAINT: &str = "uq_orders_number";

/// Postgres adapter for both storage ports.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn list_unresolved(&self) -> Result<Vec<Order>> {
        loyalty_db::list_unresolved_orders(&self.pool).await
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        loyalty_db::fetch_order_by_number(&self.pool, number).await
    }

    async fn get_by_numbers(&self, numbers: &[String]) -> Result<Vec<Order>> {
        loyalty_db::fetch_orders_by_numbers(&self.pool, numbers).await
    }

    async fn insert(&self, order: &Order) -> Result<bool> {
        match loyalty_db::insert_order(&self.pool, order).await {
            Ok(()) => Ok(true),
            Err(e) if loyalty_db::is_unique_violation(&e, ORDER_NUMBER_CONSTRAINT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OrderView>> {
        loyalty_db::list_order_views_by_user(&self.pool, user_id).await
    }

    async fn update_status(&self, number: &str, status: OrderStatus) -> Result<bool> {
        loyalty_db::update_order_status(&self.pool, number, status).await
    }

    async fn invalidate(&self, number: &str) -> Result<bool> {
        loyalty_db::invalidate_order(&self.pool, number).await
    }

    async fn batch_update(&self, orders: &[Order], entries: &[LedgerEntry]) -> Result<BatchOutcome> {
        loyalty_db::batch_update_orders_and_ledger(&self.pool, orders, entries).await
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Scope = PgLedgerScope;

    async fn balance(&self, user_id: Uuid) -> Result<Decimal> {
        loyalty_db::balance_by_user(&self.pool, user_id).await
    }

    async fn withdraw_sum(&self, user_id: Uuid) -> Result<Decimal> {
        loyalty_db::withdraw_sum_by_user(&self.pool, user_id).await
    }

    async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        loyalty_db::withdrawals_by_user(&self.pool, user_id).await
    }

    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<()> {
        loyalty_db::insert_ledger_entry(&self.pool, entry).await
    }

    async fn begin(&self) -> Result<PgLedgerScope> {
        let tx = self.pool.begin().await.context("ledger scope: begin failed")?;
        Ok(PgLedgerScope { tx })
    }
}

/// Ledger transaction. Serialised per user by a transaction-scoped advisory
/// lock taken in [`LedgerScope::lock_balance`].
pub struct PgLedgerScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerScope for PgLedgerScope {
    async fn lock_balance(&mut self, user_id: Uuid) -> Result<Decimal> {
        loyalty_db::lock_user_ledger(&mut *self.tx, user_id).await?;
        loyalty_db::balance_by_user(&mut *self.tx, user_id).await
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        loyalty_db::insert_ledger_entry(&mut *self.tx, entry).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("ledger scope: commit failed")
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("ledger scope: rollback failed")
    }
}
