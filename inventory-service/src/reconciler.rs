use async_trait::async_trait;
use shared::events;
use shared::{
    EventLog, HandlerError, InventoryStatus, InventoryUpdated, LogRecord, OrderPlaced, RecordHandler,
    INVENTORY_STREAM,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::store::{InventoryStore, Reservation};

/// Reconciles each `OrderPlaced` against stock and reports the outcome as
/// `InventoryUpdated`.
///
/// Every record that names an order ends in a published status: shortage,
/// a malformed product list and store failures all report `FAILED`. Only
/// the publish itself is retried.
pub struct InventoryReconciler {
    store: Arc<dyn InventoryStore>,
    log: Arc<dyn EventLog>,
    status_stream: String,
}

impl InventoryReconciler {
    pub fn new(store: Arc<dyn InventoryStore>, log: Arc<dyn EventLog>) -> Self {
        Self {
            store,
            log,
            status_stream: INVENTORY_STREAM.to_string(),
        }
    }

    pub fn with_status_stream(mut self, stream: impl Into<String>) -> Self {
        self.status_stream = stream.into();
        self
    }

    async fn outcome(&self, order_id: i32, record: &LogRecord) -> InventoryStatus {
        let event = match OrderPlaced::from_fields(&record.fields) {
            Ok(event) => event,
            Err(e) => {
                warn!(order_id, record_id = %record.id, error = %e, "Malformed OrderPlaced event");
                self.remember_failure(order_id).await;
                return InventoryStatus::Failed;
            }
        };

        match self.store.reserve(order_id, &event.products).await {
            Ok(Reservation::Reserved) => {
                info!(order_id, items = event.products.len(), "Inventory reserved");
                InventoryStatus::Completed
            }
            Ok(Reservation::Rejected {
                product_id,
                requested,
            }) => {
                warn!(
                    order_id,
                    product_id, requested, "Insufficient stock or unknown product, order rejected"
                );
                InventoryStatus::Failed
            }
            Ok(Reservation::AlreadyProcessed(status)) => {
                info!(order_id, %status, "Order already reconciled, republishing outcome");
                status
            }
            Err(e) => {
                error!(order_id, error = %e, "Inventory transaction failed");
                self.remember_failure(order_id).await;
                InventoryStatus::Failed
            }
        }
    }

    /// Best effort: if the store is reachable, a later redelivery of the
    /// order becomes a no-op instead of reserving stock for a failed order.
    async fn remember_failure(&self, order_id: i32) {
        if let Err(e) = self.store.record_failure(order_id).await {
            debug!(order_id, error = %e, "Could not record failed order");
        }
    }
}

#[async_trait]
impl RecordHandler for InventoryReconciler {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        // Without an order id there is nobody to report to.
        let order_id = events::order_id(&record.fields).map_err(|e| HandlerError::Skip(e.into()))?;

        let status = self.outcome(order_id, record).await;
        let update = InventoryUpdated { order_id, status };

        let record_id = self
            .log
            .append(&self.status_stream, &update.to_fields())
            .await
            .map_err(|e| HandlerError::Retry(e.into()))?;

        info!(order_id, %status, %record_id, "Published InventoryUpdated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryInventoryStore;
    use shared::{MemoryEventLog, OrderLine, RecordId, ORDERS_STREAM};

    fn placed(order_id: i32, lines: &[(i32, i32)]) -> LogRecord {
        let event = OrderPlaced {
            order_id,
            products: lines
                .iter()
                .map(|&(product_id, quantity)| OrderLine {
                    product_id,
                    price: "10.00".to_string(),
                    quantity,
                })
                .collect(),
        };
        LogRecord {
            stream: ORDERS_STREAM.to_string(),
            id: RecordId::new(i64::from(order_id)),
            fields: event.to_fields().unwrap(),
        }
    }

    fn raw(fields: &[(&str, &str)]) -> LogRecord {
        LogRecord {
            stream: ORDERS_STREAM.to_string(),
            id: RecordId::new(0),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn published(log: &MemoryEventLog) -> Vec<(i32, InventoryStatus)> {
        log.records(INVENTORY_STREAM)
            .iter()
            .map(|record| {
                let update = InventoryUpdated::from_fields(&record.fields).unwrap();
                (update.order_id, update.status)
            })
            .collect()
    }

    fn reconciler(store: &MemoryInventoryStore, log: &MemoryEventLog) -> InventoryReconciler {
        InventoryReconciler::new(Arc::new(store.clone()), Arc::new(log.clone()))
    }

    #[tokio::test]
    async fn covered_order_is_completed() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();

        reconciler(&store, &log).handle(&placed(1, &[(1, 3)])).await.unwrap();

        assert_eq!(store.quantity(1), Some(2));
        assert_eq!(published(&log), vec![(1, InventoryStatus::Completed)]);
    }

    #[tokio::test]
    async fn shortage_fails_without_touching_stock() {
        let store = MemoryInventoryStore::with_stock(&[(1, 2)]);
        let log = MemoryEventLog::new();

        reconciler(&store, &log).handle(&placed(1, &[(1, 3)])).await.unwrap();

        assert_eq!(store.quantity(1), Some(2));
        assert_eq!(published(&log), vec![(1, InventoryStatus::Failed)]);
    }

    #[tokio::test]
    async fn one_short_line_rolls_back_the_whole_order() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5), (2, 1)]);
        let log = MemoryEventLog::new();

        reconciler(&store, &log)
            .handle(&placed(1, &[(1, 3), (2, 2)]))
            .await
            .unwrap();

        assert_eq!(store.quantity(1), Some(5));
        assert_eq!(store.quantity(2), Some(1));
        assert_eq!(published(&log), vec![(1, InventoryStatus::Failed)]);
    }

    #[tokio::test]
    async fn unknown_product_fails_the_order() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();

        reconciler(&store, &log)
            .handle(&placed(1, &[(1, 1), (42, 1)]))
            .await
            .unwrap();

        assert_eq!(store.quantity(1), Some(5));
        assert_eq!(published(&log), vec![(1, InventoryStatus::Failed)]);
    }

    #[tokio::test]
    async fn redelivery_republishes_without_decrementing_again() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();
        let reconciler = reconciler(&store, &log);

        reconciler.handle(&placed(1, &[(1, 3)])).await.unwrap();
        reconciler.handle(&placed(1, &[(1, 3)])).await.unwrap();

        assert_eq!(store.quantity(1), Some(2));
        assert_eq!(
            published(&log),
            vec![(1, InventoryStatus::Completed), (1, InventoryStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn earlier_order_wins_the_last_unit() {
        let store = MemoryInventoryStore::with_stock(&[(1, 1)]);
        let log = MemoryEventLog::new();
        let reconciler = reconciler(&store, &log);

        reconciler.handle(&placed(1, &[(1, 1)])).await.unwrap();
        reconciler.handle(&placed(2, &[(1, 1)])).await.unwrap();

        assert_eq!(store.quantity(1), Some(0));
        assert_eq!(
            published(&log),
            vec![(1, InventoryStatus::Completed), (2, InventoryStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn malformed_products_fail_the_order() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();

        reconciler(&store, &log)
            .handle(&raw(&[("order_id", "9"), ("products", "not json")]))
            .await
            .unwrap();

        assert_eq!(published(&log), vec![(9, InventoryStatus::Failed)]);
        assert_eq!(store.processed(9), Some(InventoryStatus::Failed));
        assert_eq!(store.quantity(1), Some(5));
    }

    #[tokio::test]
    async fn record_without_order_id_is_skipped() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();

        let result = reconciler(&store, &log)
            .handle(&raw(&[("products", "[]")]))
            .await;

        assert!(matches!(result, Err(HandlerError::Skip(_))));
        assert!(published(&log).is_empty());
    }

    #[tokio::test]
    async fn store_outage_reports_failed() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        store.set_offline(true);
        let log = MemoryEventLog::new();

        reconciler(&store, &log).handle(&placed(1, &[(1, 1)])).await.unwrap();

        assert_eq!(published(&log), vec![(1, InventoryStatus::Failed)]);
        store.set_offline(false);
        assert_eq!(store.quantity(1), Some(5));
        assert_eq!(store.processed(1), None);
    }

    #[tokio::test]
    async fn unreachable_log_asks_for_a_retry_of_the_same_outcome() {
        let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
        let log = MemoryEventLog::new();
        let reconciler = reconciler(&store, &log);

        log.set_available(false);
        assert!(matches!(
            reconciler.handle(&placed(1, &[(1, 3)])).await,
            Err(HandlerError::Retry(_))
        ));
        assert_eq!(store.quantity(1), Some(2));

        log.set_available(true);
        reconciler.handle(&placed(1, &[(1, 3)])).await.unwrap();
        assert_eq!(store.quantity(1), Some(2));
        assert_eq!(published(&log), vec![(1, InventoryStatus::Completed)]);
    }
}
