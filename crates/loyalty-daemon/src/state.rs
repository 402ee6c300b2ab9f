//! Shared runtime state for loyalty-daemon.

use std::sync::Arc;

use loyalty_engine::EngineStats;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Counters of the running engine.
    pub stats: Arc<EngineStats>,
    pub config_hash: String,
}

impl AppState {
    pub fn new(stats: Arc<EngineStats>, config_hash: impl Into<String>) -> Self {
        Self {
            build: BuildInfo {
                service: "loyalty-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            stats,
            config_hash: config_hash.into(),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
