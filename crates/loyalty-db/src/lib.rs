//! loyalty-db
//!
//! Postgres persistence for orders and the balance ledger.
//!
//! Plain async functions over `sqlx`; callers own the pool. Functions that
//! must run inside a caller's transaction take a `PgExecutor` so they accept
//! either the pool or `&mut *tx`.

mod ledger;
mod orders;

pub use ledger::*;
pub use orders::*;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Env var read by `connect_from_env` and the DB-backed test suites.
pub const ENV_DB_URL: &str = "LOYALTY_DATABASE_URL";

/// Connect to Postgres at `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect to Postgres using LOYALTY_DATABASE_URL.
pub async fn connect_from_env(max_connections: u32) -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, max_connections).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
    pub has_ledger_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (has_orders, has_ledger): (bool, bool) = sqlx::query_as::<_, (bool, bool)>(
        r#"
        select
          exists (select 1 from information_schema.tables
                  where table_schema = 'public' and table_name = 'orders'),
          exists (select 1 from information_schema.tables
                  where table_schema = 'public' and table_name = 'ledger')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: has_orders,
        has_ledger_table: has_ledger,
    })
}
