use anyhow::{Context, Result};
use loyalty_schemas::{EntryType, LedgerEntry};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

/// Append one ledger row.
pub async fn insert_ledger_entry<'e, E>(ex: E, e: &LedgerEntry) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        insert into ledger (id, user_id, order_number, amount, type, processed_at)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(e.id)
    .bind(e.user_id)
    .bind(&e.order_number)
    .bind(e.amount)
    .bind(e.entry_type.as_str())
    .bind(e.processed_at)
    .execute(ex)
    .await
    .context("insert_ledger_entry failed")?;
    Ok(())
}

/// Append an INCOME row unless the order was already credited.
/// Returns whether a row was written.
pub async fn insert_income_entry<'e, E>(ex: E, e: &LedgerEntry) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let res = sqlx::query(
        r#"
        insert into ledger (id, user_id, order_number, amount, type, processed_at)
        values ($1, $2, $3, $4, 'INCOME', $5)
        on conflict (order_number) where type = 'INCOME' do nothing
        "#,
    )
    .bind(e.id)
    .bind(e.user_id)
    .bind(&e.order_number)
    .bind(e.amount)
    .bind(e.processed_at)
    .execute(ex)
    .await
    .context("insert_income_entry failed")?;
    Ok(res.rows_affected() == 1)
}

/// Sum of all of a user's entries. Zero for a user with no entries.
pub async fn balance_by_user<'e, E>(ex: E, user_id: Uuid) -> Result<Decimal>
where
    E: PgExecutor<'e>,
{
    let (sum,): (Decimal,) = sqlx::query_as::<_, (Decimal,)>(
        r#"
        select coalesce(sum(amount), 0)
        from ledger
        where user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(ex)
    .await
    .context("balance_by_user failed")?;
    Ok(sum)
}

/// Total withdrawn by a user, as a positive number.
pub async fn withdraw_sum_by_user(pool: &PgPool, user_id: Uuid) -> Result<Decimal> {
    let (sum,): (Decimal,) = sqlx::query_as::<_, (Decimal,)>(
        r#"
        select coalesce(sum(amount), 0)
        from ledger
        where user_id = $1 and type = 'WITHDRAW'
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("withdraw_sum_by_user failed")?;
    Ok(sum.abs())
}

/// A user's WITHDRAW entries, newest first.
pub async fn withdrawals_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        r#"
        select id, user_id, order_number, amount, type, processed_at
        from ledger
        where user_id = $1 and type = 'WITHDRAW'
        order by processed_at desc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("withdrawals_by_user failed")?;

    rows.iter()
        .map(|row| {
            Ok(LedgerEntry {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                order_number: row.try_get("order_number")?,
                amount: row.try_get("amount")?,
                entry_type: EntryType::parse(&row.try_get::<String, _>("type")?)?,
                processed_at: row.try_get("processed_at")?,
            })
        })
        .collect()
}

/// Serialise ledger writers for one user until the surrounding transaction
/// ends. Must be called on a transaction connection.
pub async fn lock_user_ledger<'e, E>(ex: E, user_id: Uuid) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("select pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(user_id.to_string())
        .execute(ex)
        .await
        .context("lock_user_ledger failed")?;
    Ok(())
}
