use async_trait::async_trait;
use shared::{HandlerError, InventoryUpdated, LogRecord, RecordHandler};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{OrderStore, StatusChange};

/// Applies `InventoryUpdated` outcomes to their orders.
pub struct OrderFinalizer {
    store: Arc<dyn OrderStore>,
}

impl OrderFinalizer {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordHandler for OrderFinalizer {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        let event = InventoryUpdated::from_fields(&record.fields)
            .map_err(|e| HandlerError::Skip(e.into()))?;

        let change = self
            .store
            .finalize_order(event.order_id, event.status)
            .await
            .map_err(|e| HandlerError::Retry(e.into()))?;

        match change {
            StatusChange::Applied(status) => {
                info!(order_id = event.order_id, %status, "Order finalized");
                Ok(())
            }
            StatusChange::AlreadyFinal(current) => {
                warn!(
                    order_id = event.order_id,
                    %current,
                    received = %event.status,
                    "Order already finalized, keeping existing status"
                );
                Ok(())
            }
            StatusChange::NotFound => Err(HandlerError::Skip(anyhow::anyhow!(
                "order {} does not exist",
                event.order_id
            ))),
        }
    }
}
