use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::OrderStatus;

/// Status as reported by the partner accrual service.
///
/// Anything outside the four documented values is kept verbatim in
/// `Unrecognized` so it can be reported instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartnerStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
    Unrecognized(String),
}

impl PartnerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PartnerStatus::Registered => "REGISTERED",
            PartnerStatus::Processing => "PROCESSING",
            PartnerStatus::Invalid => "INVALID",
            PartnerStatus::Processed => "PROCESSED",
            PartnerStatus::Unrecognized(s) => s.as_str(),
        }
    }

    /// Fixed partner -> local status table.
    pub fn local_status(&self) -> StatusMapping {
        match self {
            PartnerStatus::Registered => StatusMapping::Mapped(OrderStatus::New),
            PartnerStatus::Processing => StatusMapping::Mapped(OrderStatus::Processing),
            PartnerStatus::Invalid => StatusMapping::Mapped(OrderStatus::Invalid),
            PartnerStatus::Processed => StatusMapping::Mapped(OrderStatus::Processed),
            PartnerStatus::Unrecognized(_) => StatusMapping::Unmapped,
        }
    }
}

impl From<String> for PartnerStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "REGISTERED" => PartnerStatus::Registered,
            "PROCESSING" => PartnerStatus::Processing,
            "INVALID" => PartnerStatus::Invalid,
            "PROCESSED" => PartnerStatus::Processed,
            _ => PartnerStatus::Unrecognized(s),
        }
    }
}

impl From<PartnerStatus> for String {
    fn from(s: PartnerStatus) -> Self {
        match s {
            PartnerStatus::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for PartnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of looking a partner status up in the local status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMapping {
    Mapped(OrderStatus),
    Unmapped,
}

/// One order's state at the partner. Transient: lives from the partner call
/// until the next aggregator flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerOutcome {
    pub order: String,
    pub status: PartnerStatus,
    /// Absent until the partner has computed a reward.
    #[serde(default)]
    pub accrual: Decimal,
}

impl PartnerOutcome {
    pub fn new(order: impl Into<String>, status: PartnerStatus, accrual: Decimal) -> Self {
        Self {
            order: order.into(),
            status,
            accrual,
        }
    }
}
