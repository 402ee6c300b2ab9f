use anyhow::{Context, Result};
use loyalty_schemas::{LedgerEntry, Order, OrderStatus, OrderView};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::ledger::insert_income_entry;

/// Insert a new order row.
pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (id, number, user_id, status, uploaded_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(order.id)
    .bind(&order.number)
    .bind(order.user_id)
    .bind(order.status.as_str())
    .bind(order.uploaded_at)
    .execute(pool)
    .await
    .context("insert_order failed")?;
    Ok(())
}

/// Detect a Postgres unique constraint violation by name.
pub fn is_unique_violation(err: &anyhow::Error, constraint: &str) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    })
}

pub async fn fetch_order_by_number<'e, E>(ex: E, number: &str) -> Result<Option<Order>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        select id, number, user_id, status, uploaded_at
        from orders
        where number = $1
        "#,
    )
    .bind(number)
    .fetch_optional(ex)
    .await
    .context("fetch_order_by_number failed")?;

    row.as_ref().map(order_from_row).transpose()
}

/// Batch lookup. Unknown numbers are simply absent from the result.
pub async fn fetch_orders_by_numbers(pool: &PgPool, numbers: &[String]) -> Result<Vec<Order>> {
    if numbers.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        select id, number, user_id, status, uploaded_at
        from orders
        where number = any($1)
        "#,
    )
    .bind(numbers)
    .fetch_all(pool)
    .await
    .context("fetch_orders_by_numbers failed")?;

    rows.iter().map(order_from_row).collect()
}

/// All orders whose status is one of `statuses`, oldest upload first.
pub async fn list_orders_by_statuses(pool: &PgPool, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

    let rows = sqlx::query(
        r#"
        select id, number, user_id, status, uploaded_at
        from orders
        where status = any($1)
        order by uploaded_at asc
        "#,
    )
    .bind(&statuses)
    .fetch_all(pool)
    .await
    .context("list_orders_by_statuses failed")?;

    rows.iter().map(order_from_row).collect()
}

/// Orders not yet in a terminal status.
pub async fn list_unresolved_orders(pool: &PgPool) -> Result<Vec<Order>> {
    list_orders_by_statuses(pool, &OrderStatus::UNRESOLVED).await
}

/// A user's orders with any accrual credited for them, newest first.
pub async fn list_order_views_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<OrderView>> {
    let rows = sqlx::query(
        r#"
        select o.number, o.status, o.uploaded_at, l.amount as accrual
        from orders o
        left join ledger l
          on l.order_number = o.number and l.type = 'INCOME'
        where o.user_id = $1
        order by o.uploaded_at desc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("list_order_views_by_user failed")?;

    rows.iter()
        .map(|row| {
            Ok(OrderView {
                number: row.try_get("number")?,
                status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
                accrual: row.try_get::<Option<Decimal>, _>("accrual")?,
                uploaded_at: row.try_get("uploaded_at")?,
            })
        })
        .collect()
}

/// Set one order's status unless it is already terminal.
/// Returns whether a row changed.
pub async fn update_order_status<'e, E>(ex: E, number: &str, status: OrderStatus) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let res = sqlx::query(
        r#"
        update orders
        set status = $2
        where number = $1
          and status in ('NEW','PROCESSING')
        "#,
    )
    .bind(number)
    .bind(status.as_str())
    .execute(ex)
    .await
    .context("update_order_status failed")?;

    Ok(res.rows_affected() == 1)
}

/// Mark an order INVALID unless it already reached a terminal status.
pub async fn invalidate_order(pool: &PgPool, number: &str) -> Result<bool> {
    update_order_status(pool, number, OrderStatus::Invalid).await
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub orders_updated: usize,
    pub entries_inserted: usize,
}

/// Apply staged status updates and income entries in one transaction.
///
/// An income entry is written only when its order's status update actually
/// applied in this transaction, so a racing writer that already finalised the
/// order cannot cause a second accrual.
pub async fn batch_update_orders_and_ledger(
    pool: &PgPool,
    orders: &[Order],
    entries: &[LedgerEntry],
) -> Result<BatchOutcome> {
    let mut tx = pool.begin().await.context("batch update: begin failed")?;
    let mut out = BatchOutcome::default();
    let mut applied: Vec<&str> = Vec::with_capacity(orders.len());

    for o in orders {
        if update_order_status(&mut *tx, &o.number, o.status).await? {
            out.orders_updated += 1;
            applied.push(o.number.as_str());
        }
    }

    for e in entries {
        if !applied.contains(&e.order_number.as_str()) {
            tracing::warn!(order = %e.order_number, "order update not applied; income entry skipped");
            continue;
        }
        if insert_income_entry(&mut *tx, e).await? {
            out.entries_inserted += 1;
        }
    }

    tx.commit().await.context("batch update: commit failed")?;
    Ok(out)
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        user_id: row.try_get("user_id")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}
