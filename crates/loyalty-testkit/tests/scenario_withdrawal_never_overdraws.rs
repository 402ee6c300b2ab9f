//! Scenario: Withdrawals never drive a balance negative.
//!
//! # Invariants under test
//!
//! 1. Balance 300, withdrawal of 500 against a valid order number:
//!    `InsufficientFunds`, no ledger entry, balance stays 300.
//! 2. Concurrent withdrawals whose sum exceeds the balance: only as many
//!    succeed as the balance covers, the rest fail with `InsufficientFunds`,
//!    and the final balance is never negative.
//! 3. Checksum-invalid order numbers (including valid ones padded with
//!    whitespace) and non-positive amounts are rejected before the ledger is
//!    touched.
//! 4. `balance` reports current and withdrawn totals; `withdrawals` lists
//!    sums as positive numbers.

use std::sync::Arc;

use loyalty_engine::{BalanceError, BalanceService};
use loyalty_schemas::{Decimal, EntryType, LedgerEntry};
use loyalty_testkit::MemStore;
use uuid::Uuid;

async fn funded(amount: i64) -> (MemStore, BalanceService<MemStore>, Uuid) {
    let store = MemStore::new();
    let user = Uuid::new_v4();
    store
        .put_entry(LedgerEntry::income(user, "4561261212345467", Decimal::from(amount)))
        .await;
    let svc = BalanceService::new(Arc::new(store.clone()));
    (store, svc, user)
}

#[tokio::test]
async fn overdraft_is_refused_and_ledger_untouched() {
    let (store, svc, user) = funded(300).await;

    let err = svc
        .withdraw(Decimal::from(500), "2377225624", user)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BalanceError::InsufficientFunds { balance, requested }
                if balance == Decimal::from(300) && requested == Decimal::from(500)
        ),
        "got {err:?}"
    );

    let entries = store.entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries.iter().all(|e| e.entry_type == EntryType::Income));
    assert_eq!(store.balance_of(user).await, Decimal::from(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_cannot_overspend() {
    let (store, svc, user) = funded(1000).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let svc = svc.clone();
        tasks.spawn(async move { svc.withdraw(Decimal::from(150), "9278923470", user).await });
    }

    let mut ok = 0;
    let mut refused = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task") {
            Ok(_) => ok += 1,
            Err(BalanceError::InsufficientFunds { .. }) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 6);
    assert_eq!(refused, 4);
    let left = store.balance_of(user).await;
    assert_eq!(left, Decimal::from(100));
    assert!(left >= Decimal::ZERO);
}

#[tokio::test]
async fn malformed_requests_are_rejected_up_front() {
    let (store, svc, user) = funded(300).await;

    let bad_number = svc
        .withdraw(Decimal::from(10), "12345678901", user)
        .await
        .unwrap_err();
    assert!(matches!(bad_number, BalanceError::InvalidFormat { .. }));

    let padded = svc
        .withdraw(Decimal::from(10), " 2377225624 ", user)
        .await
        .unwrap_err();
    assert!(matches!(padded, BalanceError::InvalidFormat { .. }), "got {padded:?}");

    for amount in [Decimal::ZERO, Decimal::from(-5)] {
        let err = svc.withdraw(amount, "2377225624", user).await.unwrap_err();
        assert!(matches!(err, BalanceError::InvalidAmount { .. }), "got {err:?}");
    }

    assert_eq!(store.entries().await.len(), 1);
}

#[tokio::test]
async fn balance_and_withdrawal_history() {
    let (_store, svc, user) = funded(300).await;

    let entry = svc
        .withdraw(Decimal::new(12050, 2), "2377225624", user)
        .await
        .expect("withdraw");
    assert_eq!(entry.amount, Decimal::new(-12050, 2));
    svc.withdraw(Decimal::from(30), "346436439", user)
        .await
        .expect("withdraw");

    let b = svc.balance(user).await.expect("balance");
    assert_eq!(b.current, Decimal::new(14950, 2));
    assert_eq!(b.withdrawn, Decimal::new(15050, 2));

    let history = svc.withdrawals(user).await.expect("withdrawals");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|w| w.sum > Decimal::ZERO));
    assert!(history
        .iter()
        .any(|w| w.order == "2377225624" && w.sum == Decimal::new(12050, 2)));

    let stranger = svc.balance(Uuid::new_v4()).await.expect("balance");
    assert_eq!(stranger.current, Decimal::ZERO);
    assert_eq!(stranger.withdrawn, Decimal::ZERO);
}
