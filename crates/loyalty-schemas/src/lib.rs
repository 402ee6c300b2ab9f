//! loyalty-schemas
//!
//! Domain types shared by every loyalty crate: orders, ledger entries and the
//! transient outcomes reported by the partner accrual service.
//!
//! Pure data and pure functions. No IO, no async.

mod checksum;
mod ledger;
mod order;
mod partner;

pub use checksum::validate_order_number;
pub use ledger::{Balance, EntryType, LedgerEntry, Withdrawal};
pub use order::{Order, OrderStatus, OrderView};
pub use partner::{PartnerOutcome, PartnerStatus, StatusMapping};

/// Re-exported so downstream crates name one decimal type.
pub use rust_decimal::Decimal;
