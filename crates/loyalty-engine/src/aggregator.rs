//! Result aggregator actor.
//!
//! Producers hand outcomes over through a bounded queue; the actor is the
//! only reader and writer of the per-order buffer. Each flush snapshots the
//! buffer, resolves the orders in one lookup, stages status updates and
//! INCOME entries, and persists them in one atomic batch.
//!
//! A failed flush drops its window. Affected orders are still unresolved in
//! the store, so they are fetched again on a later scheduler tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use loyalty_schemas::{Decimal, LedgerEntry, OrderStatus, PartnerOutcome, StatusMapping};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::stats::{bump, EngineStats};
use crate::store::{BatchOutcome, OrderStore};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("order {order} is not known to the order store")]
    NoSuchOrder { order: String },

    #[error("unmapped accrual status {status} for order {order}")]
    InvalidStatus { order: String, status: String },

    #[error("batch order lookup failed; {dropped} outcome(s) dropped: {error:#}")]
    Lookup { dropped: usize, error: anyhow::Error },

    #[error(
        "batch persistence failed; {dropped_orders} update(s) and {dropped_entries} entr(ies) dropped: {error:#}"
    )]
    Persistence {
        dropped_orders: usize,
        dropped_entries: usize,
        error: anyhow::Error,
    },
}

/// Result of one flush. Errors are collected, never raised.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Buffered outcomes taken into this flush.
    pub outcomes: usize,
    pub staged_orders: usize,
    pub staged_entries: usize,
    /// Outcomes whose status equals the stored one.
    pub unchanged: usize,
    /// Outcomes that would reopen a terminal order or move one backwards.
    pub ignored: usize,
    pub persisted: Option<BatchOutcome>,
    pub errors: Vec<ReconcileError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn persistence_failed(&self) -> bool {
        self.errors.iter().any(|e| {
            matches!(
                e,
                ReconcileError::Persistence { .. } | ReconcileError::Lookup { .. }
            )
        })
    }
}

/// Producer side of the intake queue.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<PartnerOutcome>,
}

impl AggregatorHandle {
    /// Waits while the queue is full.
    pub async fn submit(
        &self,
        outcome: PartnerOutcome,
    ) -> Result<(), mpsc::error::SendError<PartnerOutcome>> {
        self.tx.send(outcome).await
    }
}

pub struct ResultAggregator {
    orders: Arc<dyn OrderStore>,
    rx: mpsc::Receiver<PartnerOutcome>,
    buffer: BTreeMap<String, PartnerOutcome>,
    stats: Arc<EngineStats>,
}

impl ResultAggregator {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        capacity: usize,
        stats: Arc<EngineStats>,
    ) -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let agg = Self {
            orders,
            rx,
            buffer: BTreeMap::new(),
            stats,
        };
        (agg, AggregatorHandle { tx })
    }

    /// Buffer an outcome. A later outcome for the same order replaces the
    /// earlier one.
    pub fn stage(&mut self, outcome: PartnerOutcome) {
        self.buffer.insert(outcome.order.clone(), outcome);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Move everything currently queued into the buffer without waiting.
    pub fn drain_intake(&mut self) -> usize {
        let mut n = 0;
        while let Ok(outcome) = self.rx.try_recv() {
            self.stage(outcome);
            n += 1;
        }
        n
    }

    pub async fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        if self.buffer.is_empty() {
            return report;
        }

        let window = std::mem::take(&mut self.buffer);
        report.outcomes = window.len();
        bump(&self.stats.flushes, 1);

        let numbers: Vec<String> = window.keys().cloned().collect();
        let mut known: HashMap<String, _> = match self.orders.get_by_numbers(&numbers).await {
            Ok(found) => found.into_iter().map(|o| (o.number.clone(), o)).collect(),
            Err(error) => {
                bump(&self.stats.flush_failures, 1);
                report.errors.push(ReconcileError::Lookup {
                    dropped: window.len(),
                    error,
                });
                return report;
            }
        };

        let mut staged_orders = Vec::new();
        let mut staged_entries = Vec::new();

        for (number, outcome) in window {
            let Some(order) = known.remove(&number) else {
                report.errors.push(ReconcileError::NoSuchOrder { order: number });
                continue;
            };

            let next = match outcome.status.local_status() {
                StatusMapping::Mapped(s) => s,
                StatusMapping::Unmapped => {
                    report.errors.push(ReconcileError::InvalidStatus {
                        order: number,
                        status: outcome.status.to_string(),
                    });
                    continue;
                }
            };

            if next == order.status {
                report.unchanged += 1;
                continue;
            }
            if !order.status.can_transition_to(next) {
                debug!(order = %number, from = %order.status, to = %next, "ignoring non-forward status report");
                report.ignored += 1;
                continue;
            }

            if next == OrderStatus::Processed && outcome.accrual > Decimal::ZERO {
                staged_entries.push(LedgerEntry::income(
                    order.user_id,
                    order.number.clone(),
                    outcome.accrual,
                ));
            }
            staged_orders.push(order.with_status(next));
        }

        report.staged_orders = staged_orders.len();
        report.staged_entries = staged_entries.len();
        if staged_orders.is_empty() {
            return report;
        }

        match self.orders.batch_update(&staged_orders, &staged_entries).await {
            Ok(done) => {
                bump(&self.stats.income_entries, done.entries_inserted as u64);
                report.persisted = Some(done);
            }
            Err(error) => {
                bump(&self.stats.flush_failures, 1);
                report.errors.push(ReconcileError::Persistence {
                    dropped_orders: staged_orders.len(),
                    dropped_entries: staged_entries.len(),
                    error,
                });
            }
        }
        report
    }

    /// Stage arriving outcomes and flush every `interval` until `shutdown`,
    /// then drain the queue and flush one last time.
    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "result aggregator started");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.flush().await;
                    log_report(&report);
                }
                msg = self.rx.recv() => match msg {
                    Some(outcome) => self.stage(outcome),
                    None => break,
                },
            }
        }

        self.rx.close();
        while let Some(outcome) = self.rx.recv().await {
            self.stage(outcome);
        }
        let report = self.flush().await;
        log_report(&report);
        info!("result aggregator stopped");
    }
}

fn log_report(report: &FlushReport) {
    for e in &report.errors {
        match e {
            ReconcileError::Lookup { .. } | ReconcileError::Persistence { .. } => {
                error!(error = %e, "reconciliation flush failed")
            }
            _ => warn!(error = %e, "reconciliation skipped an outcome"),
        }
    }
    if report.outcomes > 0 {
        debug!(
            outcomes = report.outcomes,
            staged_orders = report.staged_orders,
            staged_entries = report.staged_entries,
            unchanged = report.unchanged,
            ignored = report.ignored,
            "reconciliation flush"
        );
    }
}
