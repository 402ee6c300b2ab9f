use std::sync::Arc;
use std::time::Duration;

use loyalty_partner::{PartnerClient, PartnerError};
use loyalty_schemas::{OrderStatus, StatusMapping};
use tracing::{debug, info, warn};

use crate::aggregator::AggregatorHandle;
use crate::store::OrderStore;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Throttling signal for the scheduler, not a failure of the order.
    #[error("accrual service rate limit; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("accrual lookup failed: {0}")]
    Partner(#[source] PartnerError),

    #[error("accrual service reported unmapped status {status} for order {order}")]
    InvalidStatus { order: String, status: String },

    #[error("failed to invalidate order {order}: {error:#}")]
    Invalidate { order: String, error: anyhow::Error },

    #[error("result aggregator intake is closed")]
    IntakeClosed,
}

/// What happened to one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The partner does not know the order; it was marked INVALID.
    Invalidated,
    /// The outcome was handed to the aggregator.
    Forwarded(OrderStatus),
}

/// Resolves a single order number against the partner. Holds no mutable
/// state; one instance is shared by every worker task.
pub struct OrderProcessor {
    partner: Arc<dyn PartnerClient>,
    orders: Arc<dyn OrderStore>,
    intake: AggregatorHandle,
}

impl OrderProcessor {
    pub fn new(
        partner: Arc<dyn PartnerClient>,
        orders: Arc<dyn OrderStore>,
        intake: AggregatorHandle,
    ) -> Self {
        Self {
            partner,
            orders,
            intake,
        }
    }

    pub async fn process(&self, number: &str) -> Result<Disposition, ProcessError> {
        let outcome = match self.partner.fetch_outcome(number).await {
            Ok(outcome) => outcome,
            Err(PartnerError::NotFound { .. }) => {
                let changed = self.orders.invalidate(number).await.map_err(|error| {
                    ProcessError::Invalidate {
                        order: number.to_string(),
                        error,
                    }
                })?;
                if changed {
                    info!(order = %number, "order unknown to accrual service; invalidated");
                } else {
                    debug!(order = %number, "order unknown to accrual service; already terminal");
                }
                return Ok(Disposition::Invalidated);
            }
            Err(PartnerError::RateLimited { retry_after, .. }) => {
                return Err(ProcessError::RateLimited { retry_after });
            }
            Err(e) => {
                warn!(order = %number, error = %e, "accrual lookup failed; order stays unresolved");
                return Err(ProcessError::Partner(e));
            }
        };

        let StatusMapping::Mapped(status) = outcome.status.local_status() else {
            warn!(order = %number, status = %outcome.status, "unmapped accrual status; not forwarded");
            return Err(ProcessError::InvalidStatus {
                order: number.to_string(),
                status: outcome.status.to_string(),
            });
        };

        self.intake
            .submit(outcome)
            .await
            .map_err(|_| ProcessError::IntakeClosed)?;
        Ok(Disposition::Forwarded(status))
    }
}
