use std::sync::Arc;

use chrono::Utc;
use loyalty_schemas::{validate_order_number, Order, OrderView};
use tracing::info;
use uuid::Uuid;

use crate::store::OrderStore;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("order number {order} fails checksum validation")]
    InvalidFormat { order: String },

    #[error("order {order} was already uploaded by this user")]
    AlreadyUploaded { order: String },

    #[error("order {order} was uploaded by another user")]
    OwnedByAnotherUser { order: String },

    #[error("order storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Order upload and listing. New orders enter in NEW and are picked up by
/// the fetch scheduler on its next tick.
#[derive(Clone)]
pub struct OrderIntake {
    orders: Arc<dyn OrderStore>,
}

impl OrderIntake {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// Store `number` for `user_id` in status NEW. The number is taken
    /// verbatim; surrounding whitespace makes it `InvalidFormat`.
    pub async fn upload(&self, number: &str, user_id: Uuid) -> Result<Order, OrderError> {
        if !validate_order_number(number) {
            return Err(OrderError::InvalidFormat {
                order: number.to_string(),
            });
        }

        if let Some(existing) = self
            .orders
            .get_by_number(number)
            .await
            .map_err(OrderError::Storage)?
        {
            return Err(conflict(&existing, user_id));
        }

        let order = Order::new(number, user_id, Utc::now());
        if self.orders.insert(&order).await.map_err(OrderError::Storage)? {
            info!(order = %number, user = %user_id, "order uploaded");
            return Ok(order);
        }

        // Lost an insert race; report against whoever won it.
        match self
            .orders
            .get_by_number(number)
            .await
            .map_err(OrderError::Storage)?
        {
            Some(existing) => Err(conflict(&existing, user_id)),
            None => Err(OrderError::Storage(anyhow::anyhow!(
                "order {number} rejected as duplicate but not found"
            ))),
        }
    }

    pub async fn user_orders(&self, user_id: Uuid) -> Result<Vec<OrderView>, OrderError> {
        self.orders
            .list_by_user(user_id)
            .await
            .map_err(OrderError::Storage)
    }
}

fn conflict(existing: &Order, user_id: Uuid) -> OrderError {
    if existing.user_id == user_id {
        OrderError::AlreadyUploaded {
            order: existing.number.clone(),
        }
    } else {
        OrderError::OwnedByAnotherUser {
            order: existing.number.clone(),
        }
    }
}
