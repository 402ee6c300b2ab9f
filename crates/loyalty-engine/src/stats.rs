use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Running counters shared by the scheduler and the aggregator.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) ticks: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) invalidated: AtomicU64,
    pub(crate) forwarded: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
    pub(crate) income_entries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub dispatched: u64,
    pub invalidated: u64,
    pub forwarded: u64,
    pub rate_limited: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub income_entries: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            income_entries: self.income_entries.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}
