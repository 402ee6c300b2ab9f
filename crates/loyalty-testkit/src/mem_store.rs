use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use loyalty_engine::{BatchOutcome, LedgerScope, LedgerStore, OrderStore};
use loyalty_schemas::{Decimal, EntryType, LedgerEntry, Order, OrderStatus, OrderView};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// In-memory order and ledger store.
///
/// Clones share state. Ledger scopes hold the ledger lock from `begin` to
/// `commit`/`rollback`, which serialises every scope (a stricter version of
/// the per-user lock the Postgres adapter takes).
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    orders: Mutex<BTreeMap<String, Order>>,
    ledger: Arc<tokio::sync::Mutex<Vec<LedgerEntry>>>,
    fail_batches: AtomicUsize,
    fail_lookups: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn orders(&self) -> MutexGuard<'_, BTreeMap<String, Order>> {
        self.inner.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an order in the given status.
    pub fn put_order(&self, order: Order) {
        self.orders().insert(order.number.clone(), order);
    }

    pub fn order(&self, number: &str) -> Option<Order> {
        self.orders().get(number).cloned()
    }

    pub fn status_of(&self, number: &str) -> Option<OrderStatus> {
        self.order(number).map(|o| o.status)
    }

    /// Append an entry directly, bypassing scopes.
    pub async fn put_entry(&self, entry: LedgerEntry) {
        self.inner.ledger.lock().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.ledger.lock().await.clone()
    }

    pub async fn entries_for_order(&self, number: &str) -> Vec<LedgerEntry> {
        self.entries()
            .await
            .into_iter()
            .filter(|e| e.order_number == number)
            .collect()
    }

    pub async fn balance_of(&self, user_id: Uuid) -> Decimal {
        sum_for_user(&self.inner.ledger.lock().await, user_id)
    }

    /// Make the next `n` batch updates fail without applying anything.
    pub fn fail_next_batches(&self, n: usize) {
        self.inner.fail_batches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` batch lookups fail.
    pub fn fail_next_lookups(&self, n: usize) {
        self.inner.fail_lookups.store(n, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.inner.batch_calls.load(Ordering::SeqCst)
    }

    fn apply_batch(
        &self,
        ledger: &mut Vec<LedgerEntry>,
        orders: &[Order],
        entries: &[LedgerEntry],
    ) -> BatchOutcome {
        let mut stored = self.orders();
        let mut out = BatchOutcome::default();
        let mut applied = BTreeSet::new();

        for o in orders {
            if let Some(cur) = stored.get_mut(&o.number) {
                if !cur.status.is_terminal() {
                    cur.status = o.status;
                    out.orders_updated += 1;
                    applied.insert(o.number.as_str());
                }
            }
        }

        for e in entries {
            let credited = ledger
                .iter()
                .any(|x| x.entry_type == EntryType::Income && x.order_number == e.order_number);
            if applied.contains(e.order_number.as_str()) && !credited {
                ledger.push(e.clone());
                out.entries_inserted += 1;
            }
        }
        out
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn sum_for_user(ledger: &[LedgerEntry], user_id: Uuid) -> Decimal {
    ledger
        .iter()
        .filter(|e| e.user_id == user_id)
        .map(|e| e.amount)
        .sum()
}

#[async_trait]
impl OrderStore for MemStore {
    async fn list_unresolved(&self) -> Result<Vec<Order>> {
        let mut out: Vec<Order> = self
            .orders()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|o| o.uploaded_at);
        Ok(out)
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        Ok(self.order(number))
    }

    async fn get_by_numbers(&self, numbers: &[String]) -> Result<Vec<Order>> {
        if take_failure(&self.inner.fail_lookups) {
            bail!("injected lookup failure");
        }
        let stored = self.orders();
        Ok(numbers.iter().filter_map(|n| stored.get(n).cloned()).collect())
    }

    async fn insert(&self, order: &Order) -> Result<bool> {
        let mut stored = self.orders();
        if stored.contains_key(&order.number) {
            return Ok(false);
        }
        stored.insert(order.number.clone(), order.clone());
        Ok(true)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OrderView>> {
        let ledger = self.inner.ledger.lock().await.clone();
        let mut owned: Vec<Order> = self
            .orders()
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

        Ok(owned
            .into_iter()
            .map(|o| {
                let credited: Vec<Decimal> = ledger
                    .iter()
                    .filter(|e| e.entry_type == EntryType::Income && e.order_number == o.number)
                    .map(|e| e.amount)
                    .collect();
                OrderView {
                    accrual: (!credited.is_empty()).then(|| credited.into_iter().sum()),
                    number: o.number,
                    status: o.status,
                    uploaded_at: o.uploaded_at,
                }
            })
            .collect())
    }

    async fn update_status(&self, number: &str, status: OrderStatus) -> Result<bool> {
        let mut stored = self.orders();
        match stored.get_mut(number) {
            Some(o) if !o.status.is_terminal() => {
                o.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn batch_update(&self, orders: &[Order], entries: &[LedgerEntry]) -> Result<BatchOutcome> {
        self.inner.batch_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_batches) {
            bail!("injected batch persistence failure");
        }
        let mut ledger = self.inner.ledger.lock().await;
        Ok(self.apply_batch(&mut ledger, orders, entries))
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    type Scope = MemLedgerScope;

    async fn balance(&self, user_id: Uuid) -> Result<Decimal> {
        Ok(self.balance_of(user_id).await)
    }

    async fn withdraw_sum(&self, user_id: Uuid) -> Result<Decimal> {
        let ledger = self.inner.ledger.lock().await;
        Ok(ledger
            .iter()
            .filter(|e| e.user_id == user_id && e.entry_type == EntryType::Withdraw)
            .map(|e| e.amount.abs())
            .sum())
    }

    async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let mut out: Vec<LedgerEntry> = self
            .inner
            .ledger
            .lock()
            .await
            .iter()
            .filter(|e| e.user_id == user_id && e.entry_type == EntryType::Withdraw)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(out)
    }

    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.put_entry(entry.clone()).await;
        Ok(())
    }

    async fn begin(&self) -> Result<MemLedgerScope> {
        let guard = Arc::clone(&self.inner.ledger).lock_owned().await;
        Ok(MemLedgerScope {
            guard,
            staged: Vec::new(),
        })
    }
}

/// Holds the whole ledger locked; staged entries become visible on commit.
pub struct MemLedgerScope {
    guard: OwnedMutexGuard<Vec<LedgerEntry>>,
    staged: Vec<LedgerEntry>,
}

#[async_trait]
impl LedgerScope for MemLedgerScope {
    async fn lock_balance(&mut self, user_id: Uuid) -> Result<Decimal> {
        // Let competing withdrawals queue up on the lock.
        tokio::task::yield_now().await;
        Ok(sum_for_user(&self.guard, user_id) + sum_for_user(&self.staged, user_id))
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.staged.push(entry.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.guard.extend(staged);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
