//! Fetch scheduler.
//!
//! Every tick lists the unresolved orders and dispatches one processor task
//! per order, never more than `W` at a time (admission is a semaphore
//! permit held for the task's lifetime). All tasks of a tick run under a
//! child of the shutdown token.
//!
//! A `RateLimited` result from any task throttles the whole pool: the tick
//! token is cancelled, which aborts the tick's in-flight partner requests,
//! no further orders are admitted, and the scheduler sleeps for the largest
//! retry-after seen before the next tick can start. The partner's limit is
//! global, so one task's 429 applies to all of them.
//!
//! The tick waits for all of its tasks before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::processor::{Disposition, OrderProcessor, ProcessError};
use crate::stats::{bump, EngineStats};
use crate::store::OrderStore;

/// Per-tick counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Discovery query failed; nothing was dispatched.
    pub discovery_failed: bool,
    pub discovered: usize,
    pub dispatched: usize,
    pub invalidated: usize,
    pub forwarded: usize,
    pub failed: usize,
    /// Tasks aborted by the tick's cancellation.
    pub cancelled: usize,
    /// Backoff applied at the end of this tick.
    pub backoff: Option<Duration>,
}

enum TaskEnd {
    Finished(Result<Disposition, ProcessError>),
    Cancelled,
}

pub struct FetchScheduler {
    orders: Arc<dyn OrderStore>,
    processor: Arc<OrderProcessor>,
    interval: Duration,
    slots: Arc<Semaphore>,
    stats: Arc<EngineStats>,
}

impl FetchScheduler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        processor: Arc<OrderProcessor>,
        interval: Duration,
        workers: usize,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            orders,
            processor,
            interval,
            slots: Arc::new(Semaphore::new(workers.max(1))),
            stats,
        }
    }

    /// Tick every `interval` until `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            workers = self.slots.available_permits(),
            "fetch scheduler started"
        );

        let mut ticker = time::interval(self.interval);
        // A backoff longer than the interval must not be followed by a burst
        // of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.tick(&shutdown).await;
            bump(&self.stats.ticks, 1);
            if report.discovered > 0 {
                debug!(
                    discovered = report.discovered,
                    dispatched = report.dispatched,
                    invalidated = report.invalidated,
                    forwarded = report.forwarded,
                    failed = report.failed,
                    cancelled = report.cancelled,
                    "fetch tick"
                );
            }
        }
        info!("fetch scheduler stopped");
    }

    /// One discovery-and-dispatch pass, including any backoff it triggers.
    pub async fn tick(&self, shutdown: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        let pending = match self.orders.list_unresolved().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "unresolved order discovery failed; tick skipped");
                report.discovery_failed = true;
                return report;
            }
        };
        report.discovered = pending.len();

        let tick_token = shutdown.child_token();
        let mut tasks: JoinSet<TaskEnd> = JoinSet::new();
        let mut backoff: Option<Duration> = None;

        'dispatch: for order in pending {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = tick_token.cancelled() => break 'dispatch,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Some(d) = self.record(&mut report, joined) {
                            backoff = backoff.max(Some(d));
                            tick_token.cancel();
                        }
                    }
                    acquired = self.slots.clone().acquire_owned() => match acquired {
                        Ok(permit) => break permit,
                        Err(_) => break 'dispatch,
                    },
                }
            };

            let processor = Arc::clone(&self.processor);
            let token = tick_token.clone();
            let number = order.number;
            tasks.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => TaskEnd::Cancelled,
                    res = processor.process(&number) => TaskEnd::Finished(res),
                }
            });
            report.dispatched += 1;
            bump(&self.stats.dispatched, 1);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(d) = self.record(&mut report, joined) {
                backoff = backoff.max(Some(d));
                tick_token.cancel();
            }
        }

        if let Some(retry_after) = backoff {
            report.backoff = Some(retry_after);
            warn!(
                retry_after_secs = retry_after.as_secs(),
                cancelled = report.cancelled,
                "accrual service rate limit; dispatch paused"
            );
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = time::sleep(retry_after) => {}
            }
        }

        report
    }

    /// Fold one finished task into the report. Returns the retry-after when
    /// the task was rate limited.
    fn record(
        &self,
        report: &mut TickReport,
        joined: Result<TaskEnd, JoinError>,
    ) -> Option<Duration> {
        match joined {
            Ok(TaskEnd::Finished(Ok(Disposition::Invalidated))) => {
                report.invalidated += 1;
                bump(&self.stats.invalidated, 1);
            }
            Ok(TaskEnd::Finished(Ok(Disposition::Forwarded(_)))) => {
                report.forwarded += 1;
                bump(&self.stats.forwarded, 1);
            }
            Ok(TaskEnd::Finished(Err(ProcessError::RateLimited { retry_after }))) => {
                bump(&self.stats.rate_limited, 1);
                return Some(retry_after);
            }
            Ok(TaskEnd::Finished(Err(_))) => report.failed += 1,
            Ok(TaskEnd::Cancelled) => report.cancelled += 1,
            Err(e) => {
                error!(error = %e, "processor task panicked");
                report.failed += 1;
            }
        }
        None
    }
}
