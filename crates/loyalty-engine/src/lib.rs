//! loyalty-engine
//!
//! The reconciliation core.
//!
//! ```text
//!  FetchScheduler ──(≤ W permits)──> OrderProcessor ──> PartnerClient
//!        │                                 │
//!        │ list_unresolved                 │ invalidate (204)
//!        ▼                                 ▼
//!   OrderStore <──── batch_update ──── ResultAggregator <── bounded intake queue
//!
//!   BalanceService ──> LedgerStore scope (lock, read, check, insert, commit)
//! ```
//!
//! Each long-running component owns its state outright: the scheduler owns
//! the admission semaphore, the aggregator owns the outcome buffer. They talk
//! only through the intake queue ([`AggregatorHandle`]) and a shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! Storage is reached through the [`OrderStore`] and [`LedgerStore`] ports;
//! [`PgStore`] is the Postgres adapter, `loyalty-testkit` provides in-memory
//! ones.

mod aggregator;
mod balance;
mod engine;
mod intake;
mod pg;
mod processor;
mod scheduler;
mod stats;
mod store;

pub use aggregator::{AggregatorHandle, FlushReport, ReconcileError, ResultAggregator};
pub use balance::{BalanceError, BalanceService};
pub use engine::Engine;
pub use intake::{OrderError, OrderIntake};
pub use pg::{PgLedgerScope, PgStore};
pub use processor::{Disposition, OrderProcessor, ProcessError};
pub use scheduler::{FetchScheduler, TickReport};
pub use stats::{EngineStats, StatsSnapshot};
pub use store::{BatchOutcome, LedgerScope, LedgerStore, OrderStore};
