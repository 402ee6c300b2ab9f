//! Deterministic fakes for engine scenario tests.
//!
//! - [`MemStore`] implements both storage ports in memory with the same
//!   guards as the Postgres adapter (terminal orders are never reopened, one
//!   INCOME entry per order, ledger scopes serialise).
//! - [`ScriptedPartner`] replays per-order partner replies and logs every
//!   call with its (possibly paused) tokio instant.

mod mem_store;
mod scripted_partner;

pub use mem_store::{MemLedgerScope, MemStore};
pub use scripted_partner::{PartnerReply, ScriptedPartner};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Fixed upload timestamps so discovery order is predictable: `uploaded(0)`
/// is the oldest.
pub fn uploaded(minute: i64) -> DateTime<Utc> {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single();
    base.unwrap_or_default() + Duration::minutes(minute)
}
