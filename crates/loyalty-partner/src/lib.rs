//! loyalty-partner
//!
//! Client for the partner accrual service:
//! `GET {base_url}/api/orders/{number}` with `Accept: application/json`.
//!
//! | Partner reply             | Result                                   |
//! |---------------------------|------------------------------------------|
//! | `200` + JSON body         | `Ok(PartnerOutcome)`                     |
//! | `204 No Content`          | `Err(PartnerError::NotFound)`            |
//! | `429` + `Retry-After: N`  | `Err(PartnerError::RateLimited)` (N s)   |
//! | anything else             | `UnexpectedStatus` / `Transport` / `Decode` |
//!
//! # Two layers of rate-limit handling
//!
//! 1. This client retries a `429` itself, up to `rate_limit_retries` times
//!    with a fixed `rate_limit_wait` between attempts.
//! 2. Only when those retries are exhausted is `RateLimited { retry_after }`
//!    returned. The fetch scheduler then pauses the whole worker pool for
//!    `retry_after`.
//!
//! The two layers are independent: layer 1 never looks at `Retry-After`,
//! layer 2 never retries the individual order (it is simply re-discovered
//! on a later tick).

use std::time::Duration;

use async_trait::async_trait;
use loyalty_schemas::PartnerOutcome;
use reqwest::{header, StatusCode};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PartnerError {
    /// `204`: the partner has never seen this order. Terminal.
    #[error("order {order} is not registered at the accrual service")]
    NotFound { order: String },

    /// `429` after in-client retries were exhausted.
    #[error("accrual service rate limit hit for order {order}; retry after {retry_after:?}")]
    RateLimited { order: String, retry_after: Duration },

    #[error("accrual service returned http {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("accrual service transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("accrual service response decode failed: {0}")]
    Decode(String),
}

impl PartnerError {
    /// Retry-after carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PartnerError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Partner accrual service contract.
///
/// Object-safe so the engine can hold an `Arc<dyn PartnerClient>` and tests
/// can substitute a scripted implementation.
#[async_trait]
pub trait PartnerClient: Send + Sync {
    async fn fetch_outcome(&self, number: &str) -> Result<PartnerOutcome, PartnerError>;
}

/// reqwest-backed client.
#[derive(Debug, Clone)]
pub struct HttpPartnerClient {
    http: reqwest::Client,
    base_url: String,
    rate_limit_retries: u32,
    rate_limit_wait: Duration,
    default_retry_after: Duration,
}

impl HttpPartnerClient {
    pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 2;
    pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);
    pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            rate_limit_retries: Self::DEFAULT_RATE_LIMIT_RETRIES,
            rate_limit_wait: Self::DEFAULT_RATE_LIMIT_WAIT,
            default_retry_after: Self::DEFAULT_RETRY_AFTER,
        }
    }

    /// In-client retry policy for `429` replies (layer 1).
    pub fn with_rate_limit_retries(mut self, retries: u32, wait: Duration) -> Self {
        self.rate_limit_retries = retries;
        self.rate_limit_wait = wait;
        self
    }

    /// Retry-after reported when a `429` has no usable `Retry-After` header.
    pub fn with_default_retry_after(mut self, d: Duration) -> Self {
        self.default_retry_after = d;
        self
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url.trim_end_matches('/'), number)
    }

    async fn fetch_once(&self, number: &str) -> Result<PartnerOutcome, PartnerError> {
        let resp = self
            .http
            .get(self.order_url(number))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let outcome: PartnerOutcome = resp
                    .json()
                    .await
                    .map_err(|e| PartnerError::Decode(e.to_string()))?;
                if outcome.order != number {
                    return Err(PartnerError::Decode(format!(
                        "asked for order {number}, got {}",
                        outcome.order
                    )));
                }
                Ok(outcome)
            }
            StatusCode::NO_CONTENT => Err(PartnerError::NotFound {
                order: number.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(resp.headers()).unwrap_or_else(|| {
                    warn!(order = %number, "429 without usable Retry-After; using default");
                    self.default_retry_after
                });
                Err(PartnerError::RateLimited {
                    order: number.to_string(),
                    retry_after,
                })
            }
            other => {
                let body = resp.text().await.unwrap_or_default();
                Err(PartnerError::UnexpectedStatus {
                    status: other.as_u16(),
                    body: truncate(body, 256),
                })
            }
        }
    }
}

#[async_trait]
impl PartnerClient for HttpPartnerClient {
    async fn fetch_outcome(&self, number: &str) -> Result<PartnerOutcome, PartnerError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(number).await {
                Err(PartnerError::RateLimited { .. }) if attempt < self.rate_limit_retries => {
                    attempt += 1;
                    debug!(order = %number, attempt, "429 from accrual service; retrying in-client");
                    tokio::time::sleep(self.rate_limit_wait).await;
                }
                other => return other,
            }
        }
    }
}

/// `Retry-After` as delta-seconds.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
