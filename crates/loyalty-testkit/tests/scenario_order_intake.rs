//! Scenario: Order upload and listing.
//!
//! # Invariants under test
//!
//! 1. A checksum-valid number is stored in NEW for the uploading user.
//! 2. Re-uploading one's own order is `AlreadyUploaded`; uploading another
//!    user's order is `OwnedByAnotherUser`; neither changes the stored row.
//! 3. Checksum-invalid numbers are `InvalidFormat`, and so are valid numbers
//!    carrying whitespace: numbers are stored exactly as given.
//! 4. Two users racing to upload the same number: exactly one wins.
//! 5. `user_orders` lists newest first with the credited accrual, omitted
//!    when nothing was credited.

use std::sync::Arc;

use loyalty_engine::{OrderError, OrderIntake};
use loyalty_schemas::{Decimal, LedgerEntry, Order, OrderStatus};
use loyalty_testkit::{uploaded, MemStore};
use uuid::Uuid;

#[tokio::test]
async fn upload_and_conflicts() {
    let store = MemStore::new();
    let intake = OrderIntake::new(Arc::new(store.clone()));
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let order = intake.upload("79927398713", alice).await.expect("upload");
    assert_eq!(order.number, "79927398713");
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(store.order("79927398713").map(|o| o.user_id), Some(alice));

    let again = intake.upload("79927398713", alice).await.unwrap_err();
    assert!(matches!(again, OrderError::AlreadyUploaded { .. }));

    let stolen = intake.upload("79927398713", bob).await.unwrap_err();
    assert!(matches!(stolen, OrderError::OwnedByAnotherUser { .. }));
    assert_eq!(store.order("79927398713").map(|o| o.user_id), Some(alice));

    for bad in ["12345678901", "", "7992739871a", " 4561261212345467", "4561261212345467\n"] {
        let err = intake.upload(bad, alice).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidFormat { .. }), "{bad:?}: {err:?}");
    }
    assert!(store.order("4561261212345467").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_uploads_have_one_winner() {
    let store = MemStore::new();
    let intake = OrderIntake::new(Arc::new(store.clone()));

    let a = {
        let intake = intake.clone();
        tokio::spawn(async move { intake.upload("4561261212345467", Uuid::new_v4()).await })
    };
    let b = {
        let intake = intake.clone();
        tokio::spawn(async move { intake.upload("4561261212345467", Uuid::new_v4()).await })
    };

    let results = [a.await.expect("join"), b.await.expect("join")];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(OrderError::OwnedByAnotherUser { .. }))));
}

#[tokio::test]
async fn listing_joins_accrual_newest_first() {
    let store = MemStore::new();
    let user = Uuid::new_v4();
    store.put_order(Order::new("12345678903", user, uploaded(0)).with_status(OrderStatus::Processed));
    store.put_order(Order::new("2377225624", user, uploaded(5)));
    store.put_order(Order::new("346436439", Uuid::new_v4(), uploaded(9)));
    store
        .put_entry(LedgerEntry::income(user, "12345678903", Decimal::new(72998, 2)))
        .await;

    let intake = OrderIntake::new(Arc::new(store.clone()));
    let views = intake.user_orders(user).await.expect("list");

    assert_eq!(views.len(), 2);
    assert_eq!(views[0].number, "2377225624");
    assert_eq!(views[0].accrual, None);
    assert_eq!(views[1].number, "12345678903");
    assert_eq!(views[1].status, OrderStatus::Processed);
    assert_eq!(views[1].accrual, Some(Decimal::new(72998, 2)));

    assert!(intake.user_orders(Uuid::new_v4()).await.expect("list").is_empty());
}
