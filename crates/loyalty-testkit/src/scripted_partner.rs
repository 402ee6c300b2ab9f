use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use loyalty_partner::{PartnerClient, PartnerError};
use loyalty_schemas::{Decimal, PartnerOutcome, PartnerStatus};
use tokio::time::Instant;

/// One scripted partner reply.
#[derive(Debug, Clone)]
pub enum PartnerReply {
    Status(PartnerStatus, Decimal),
    /// `204`.
    NotFound,
    /// `429` with the given retry-after.
    RateLimited(Duration),
    /// `500`.
    ServerError,
}

impl PartnerReply {
    pub fn processed(accrual: i64) -> Self {
        PartnerReply::Status(PartnerStatus::Processed, Decimal::from(accrual))
    }

    pub fn processing() -> Self {
        PartnerReply::Status(PartnerStatus::Processing, Decimal::ZERO)
    }

    pub fn registered() -> Self {
        PartnerReply::Status(PartnerStatus::Registered, Decimal::ZERO)
    }

    pub fn invalid() -> Self {
        PartnerReply::Status(PartnerStatus::Invalid, Decimal::ZERO)
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<PartnerReply>>,
    latency: HashMap<String, Duration>,
    calls: Vec<(String, Instant)>,
}

/// Partner fake with per-order reply queues.
///
/// Replies are consumed in order; the last one repeats forever. Orders with
/// no script get `ServerError`.
#[derive(Default)]
pub struct ScriptedPartner {
    script: Mutex<Script>,
}

impl ScriptedPartner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reply(&self, number: &str, replies: impl IntoIterator<Item = PartnerReply>) -> &Self {
        self.script()
            .replies
            .entry(number.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Delay every reply for `number` by `d`.
    pub fn latency(&self, number: &str, d: Duration) -> &Self {
        self.script().latency.insert(number.to_string(), d);
        self
    }

    /// Every call so far with the instant it started.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.script().calls.clone()
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.script().calls.iter().filter(|(n, _)| n == number).count()
    }

    fn next_reply(&self, number: &str) -> Option<PartnerReply> {
        let mut script = self.script();
        let queue = script.replies.get_mut(number)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl PartnerClient for ScriptedPartner {
    async fn fetch_outcome(&self, number: &str) -> Result<PartnerOutcome, PartnerError> {
        let latency = {
            let mut script = self.script();
            script.calls.push((number.to_string(), Instant::now()));
            script.latency.get(number).copied()
        };
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }

        match self.next_reply(number) {
            Some(PartnerReply::Status(status, accrual)) => {
                Ok(PartnerOutcome::new(number, status, accrual))
            }
            Some(PartnerReply::NotFound) => Err(PartnerError::NotFound {
                order: number.to_string(),
            }),
            Some(PartnerReply::RateLimited(retry_after)) => Err(PartnerError::RateLimited {
                order: number.to_string(),
                retry_after,
            }),
            Some(PartnerReply::ServerError) | None => Err(PartnerError::UnexpectedStatus {
                status: 500,
                body: "internal error".to_string(),
            }),
        }
    }
}
