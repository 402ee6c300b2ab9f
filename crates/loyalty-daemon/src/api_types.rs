//! Response types for the operator endpoints.

use loyalty_engine::StatsSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    /// SHA-256 of the canonical effective config.
    pub config_hash: String,
    pub engine: StatsSnapshot,
}
