//! Typed view over the merged config tree.
//!
//! Every key is optional; absent keys take the defaults below. Only the
//! pointers listed in `CONSUMED_POINTERS` are read here.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub const DEFAULT_RUN_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_DB_URL_ENV: &str = "DATABASE_URI";
pub const DEFAULT_PARTNER_BASE_URL: &str = "http://127.0.0.1:8081";

pub const ENV_RUN_ADDRESS: &str = "RUN_ADDRESS";
pub const ENV_PARTNER_BASE_URL: &str = "ACCRUAL_SYSTEM_ADDRESS";

/// Upper bound on `/fetch/workers`.
pub const MAX_FETCH_WORKERS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub run_address: String,
    pub database: DatabaseSettings,
    pub partner: PartnerSettings,
    pub fetch: FetchSettings,
    pub aggregator: AggregatorSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// NAME of the env var that holds the Postgres DSN.
    pub url_env: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    /// Read the DSN from the configured env var, falling back to `flag` (the
    /// `-d` command-line value) when the var is unset or empty. The error
    /// names the var, never the value.
    pub fn resolve_url(&self, flag: Option<&str>) -> Result<String> {
        if let Some(v) = non_empty_env(&self.url_env) {
            return Ok(v);
        }
        match flag.map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => bail!("missing env var {} and no database URI flag", self.url_env),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerSettings {
    pub base_url: String,
    /// In-client retries on 429 before the scheduler sees `RateLimited`.
    pub rate_limit_retries: u32,
    /// Fixed wait between in-client 429 retries.
    pub rate_limit_wait: Duration,
    /// Used when a 429 carries no parseable `Retry-After`.
    pub default_retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub interval: Duration,
    /// Admission bound on concurrent partner lookups.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_address: DEFAULT_RUN_ADDRESS.to_string(),
            database: DatabaseSettings {
                url_env: DEFAULT_DB_URL_ENV.to_string(),
                max_connections: 10,
            },
            partner: PartnerSettings {
                base_url: DEFAULT_PARTNER_BASE_URL.to_string(),
                rate_limit_retries: 2,
                rate_limit_wait: Duration::from_millis(1000),
                default_retry_after: Duration::from_secs(60),
            },
            fetch: FetchSettings {
                interval: Duration::from_millis(1000),
                workers: 20,
            },
            aggregator: AggregatorSettings {
                interval: Duration::from_millis(1000),
                queue_capacity: 1000,
            },
        }
    }
}

impl Settings {
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let d = Settings::default();

        let s = Settings {
            run_address: read_str(v, "/server/run_address")?.unwrap_or(d.run_address),
            database: DatabaseSettings {
                url_env: read_str(v, "/database/url_env")?.unwrap_or(d.database.url_env),
                max_connections: read_u64(v, "/database/max_connections")?
                    .map(u32::try_from)
                    .transpose()
                    .context("/database/max_connections out of range")?
                    .unwrap_or(d.database.max_connections),
            },
            partner: PartnerSettings {
                base_url: read_str(v, "/partner/base_url")?.unwrap_or(d.partner.base_url),
                rate_limit_retries: read_u64(v, "/partner/rate_limit_retries")?
                    .map(u32::try_from)
                    .transpose()
                    .context("/partner/rate_limit_retries out of range")?
                    .unwrap_or(d.partner.rate_limit_retries),
                rate_limit_wait: read_u64(v, "/partner/rate_limit_wait_ms")?
                    .map(Duration::from_millis)
                    .unwrap_or(d.partner.rate_limit_wait),
                default_retry_after: read_u64(v, "/partner/default_retry_after_secs")?
                    .map(Duration::from_secs)
                    .unwrap_or(d.partner.default_retry_after),
            },
            fetch: FetchSettings {
                interval: read_u64(v, "/fetch/interval_ms")?
                    .map(Duration::from_millis)
                    .unwrap_or(d.fetch.interval),
                workers: read_u64(v, "/fetch/workers")?
                    .map(|n| n as usize)
                    .unwrap_or(d.fetch.workers),
            },
            aggregator: AggregatorSettings {
                interval: read_u64(v, "/aggregator/interval_ms")?
                    .map(Duration::from_millis)
                    .unwrap_or(d.aggregator.interval),
                queue_capacity: read_u64(v, "/aggregator/queue_capacity")?
                    .map(|n| n as usize)
                    .unwrap_or(d.aggregator.queue_capacity),
            },
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.workers == 0 || self.fetch.workers > MAX_FETCH_WORKERS {
            bail!("CONFIG_INVALID: /fetch/workers must be in 1..={MAX_FETCH_WORKERS}");
        }
        if self.fetch.interval.is_zero() {
            bail!("CONFIG_INVALID: /fetch/interval_ms must be > 0");
        }
        if self.aggregator.interval.is_zero() {
            bail!("CONFIG_INVALID: /aggregator/interval_ms must be > 0");
        }
        if self.aggregator.queue_capacity == 0 {
            bail!("CONFIG_INVALID: /aggregator/queue_capacity must be > 0");
        }
        if self.database.max_connections == 0 {
            bail!("CONFIG_INVALID: /database/max_connections must be > 0");
        }
        if self.partner.base_url.trim().is_empty() {
            bail!("CONFIG_INVALID: /partner/base_url must not be empty");
        }
        Ok(())
    }
}

/// Command-line flag values (`-a`, `-r`). They override YAML and are in
/// turn overridden by any non-empty environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub run_address: Option<String>,
    pub partner_base_url: Option<String>,
}

impl CliOverrides {
    pub fn apply(self, s: &mut Settings) {
        if let Some(a) = self.run_address {
            s.run_address = a;
        }
        if let Some(u) = self.partner_base_url {
            s.partner.base_url = u;
        }
    }
}

/// Process-environment overrides, applied last: after YAML and after CLI
/// flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub run_address: Option<String>,
    pub partner_base_url: Option<String>,
}

impl Settings {
    /// Layer command-line flags and then environment variables over the
    /// YAML-derived settings, and re-validate.
    pub fn with_overrides(mut self, cli: CliOverrides, env: EnvOverrides) -> Result<Self> {
        cli.apply(&mut self);
        env.apply(&mut self);
        self.validate()?;
        Ok(self)
    }
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            run_address: non_empty_env(ENV_RUN_ADDRESS),
            partner_base_url: non_empty_env(ENV_PARTNER_BASE_URL),
        }
    }

    pub fn apply(self, s: &mut Settings) {
        if let Some(a) = self.run_address {
            s.run_address = a;
        }
        if let Some(u) = self.partner_base_url {
            s.partner.base_url = u;
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_str(v: &Value, ptr: &str) -> Result<Option<String>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => bail!("CONFIG_INVALID: {ptr} must be a string, got {other}"),
    }
}

fn read_u64(v: &Value, ptr: &str) -> Result<Option<u64>> {
    match v.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(n) => n
            .as_u64()
            .map(Some)
            .with_context(|| format!("CONFIG_INVALID: {ptr} must be a non-negative integer")),
    }
}
