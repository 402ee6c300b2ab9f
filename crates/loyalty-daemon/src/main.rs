//! loyalty-daemon entry point.
//!
//! Loads configuration, connects and migrates the database, spawns the
//! reconciliation engine and serves the operator endpoints until Ctrl-C.
//! Route handlers live in `routes.rs`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loyalty_config::{
    load_layered_yaml, report_unused_keys, CliOverrides, EnvOverrides, LoadedConfig, Settings,
    UnusedKeyPolicy,
};
use loyalty_daemon::{routes, state};
use loyalty_engine::{Engine, PgStore};
use loyalty_partner::HttpPartnerClient;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "loyalty-daemon")]
#[command(about = "Loyalty order reconciliation daemon", long_about = None)]
struct Args {
    /// HTTP listen address (overrides config; RUN_ADDRESS wins over it)
    #[arg(short = 'a', long = "run-address")]
    run_address: Option<String>,

    /// Postgres DSN, used when the env var named by database.url_env is unset
    #[arg(short = 'd', long = "database-uri")]
    database_uri: Option<String>,

    /// Accrual service base URL (overrides config; ACCRUAL_SYSTEM_ADDRESS wins over it)
    #[arg(short = 'r', long = "accrual-address")]
    accrual_address: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,

    /// Layered config paths in merge order
    #[arg(long = "config")]
    config_paths: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    init_tracing(&args.log_level);

    let loaded = if args.config_paths.is_empty() {
        LoadedConfig::empty()
    } else {
        let paths: Vec<&str> = args.config_paths.iter().map(String::as_str).collect();
        load_layered_yaml(&paths)?
    };
    let unused = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &unused.unused_leaf_pointers {
        warn!(pointer = %pointer, "unused config key");
    }

    let settings = Settings::from_config_json(&loaded.config_json)?.with_overrides(
        CliOverrides {
            run_address: args.run_address,
            partner_base_url: args.accrual_address,
        },
        EnvOverrides::from_env(),
    )?;
    info!(
        config_hash = %loaded.config_hash,
        run_address = %settings.run_address,
        accrual = %settings.partner.base_url,
        workers = settings.fetch.workers,
        "configuration loaded"
    );

    let db_url = settings
        .database
        .resolve_url(args.database_uri.as_deref())?;
    let pool = loyalty_db::connect(&db_url, settings.database.max_connections).await?;
    loyalty_db::migrate(&pool).await?;

    let partner = HttpPartnerClient::new(settings.partner.base_url.clone())
        .with_rate_limit_retries(
            settings.partner.rate_limit_retries,
            settings.partner.rate_limit_wait,
        )
        .with_default_retry_after(settings.partner.default_retry_after);

    let shutdown = CancellationToken::new();
    let engine = Engine::spawn(
        &settings,
        Arc::new(PgStore::new(pool)),
        Arc::new(partner),
        shutdown.clone(),
    );

    let shared = Arc::new(state::AppState::new(engine.stats(), loaded.config_hash));
    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(&settings.run_address)
        .await
        .with_context(|| format!("bind {}", settings.run_address))?;
    info!("loyalty-daemon listening on http://{}", settings.run_address);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed; shutting down");
            }
            info!("shutdown requested");
            stop.cancel();
        })
        .await
        .context("server crashed")?;

    shutdown.cancel();
    engine.join().await?;
    info!("loyalty-daemon stopped");
    Ok(())
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
