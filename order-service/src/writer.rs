use serde::Serialize;
use shared::StoreError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::info;

use crate::cart::{Cart, CartError, CreateOrderRequest};
use crate::store::OrderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order_id: i32,
    pub item_count: usize,
}

#[derive(Debug, Error)]
pub enum PlaceOrderError {
    #[error(transparent)]
    Invalid(#[from] CartError),
    #[error("failed to store order: {0}")]
    Store(#[from] StoreError),
}

/// Accepts carts and turns them into committed orders.
///
/// The `OrderPlaced` event is written to the outbox inside the order's
/// transaction; the relay publishes it. The writer only nudges the relay,
/// so callers learn the commit outcome and nothing about the publish.
#[derive(Clone)]
pub struct OrderWriter {
    store: Arc<dyn OrderStore>,
    relay: Arc<Notify>,
}

impl OrderWriter {
    pub fn new(store: Arc<dyn OrderStore>, relay: Arc<Notify>) -> Self {
        Self { store, relay }
    }

    pub async fn place_order(&self, user_id: i32, request: CreateOrderRequest) -> Result<PlacedOrder, PlaceOrderError> {
        let cart = Cart::validate(user_id, request)?;
        let created = self.store.create_order(&cart).await?;

        self.relay.notify_one();

        info!(
            event = "ORDER_CREATED",
            status = %cart.status,
            user_id,
            order_id = created.order_id,
            item_count = created.item_count,
            "Order created"
        );

        Ok(PlacedOrder {
            order_id: created.order_id,
            item_count: created.item_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartItemRequest;
    use crate::memory::MemoryOrderStore;
    use crate::models::OrderStatus;
    use shared::{OrderPlaced, ORDERS_STREAM};

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            total_price: "1149.98".to_string(),
            status: None,
            items: vec![
                CartItemRequest {
                    product_id: 1,
                    price: "999.99".to_string(),
                    quantity: 1,
                },
                CartItemRequest {
                    product_id: 2,
                    price: "149.99".to_string(),
                    quantity: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn commits_order_with_its_outbox_event() {
        let store = MemoryOrderStore::new();
        let wake = Arc::new(Notify::new());
        let writer = OrderWriter::new(Arc::new(store.clone()), wake.clone());

        let placed = writer.place_order(7, request()).await.unwrap();
        assert_eq!(placed, PlacedOrder { order_id: 1, item_count: 2 });

        let order = store.find_order(1).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.user_id, 7);
        assert_eq!(order.items.len(), 2);

        let outbox = store.outbox();
        assert_eq!(outbox.len(), 1);
        let (entry, published) = &outbox[0];
        assert!(!published);
        assert_eq!(entry.stream, ORDERS_STREAM);
        let event = OrderPlaced::from_fields(&entry.fields).unwrap();
        assert_eq!(event.order_id, 1);
        assert_eq!(event.products.len(), 2);

        // The relay was woken and the permit is waiting for it.
        tokio::time::timeout(std::time::Duration::from_millis(50), wake.notified())
            .await
            .expect("relay was not notified");
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_order_and_no_event() {
        let store = MemoryOrderStore::new();
        store.reject_writes(true);
        let writer = OrderWriter::new(Arc::new(store.clone()), Arc::new(Notify::new()));

        let result = writer.place_order(7, request()).await;
        assert!(matches!(result, Err(PlaceOrderError::Store(_))));
        assert_eq!(store.order_count(), 0);
        assert!(store.outbox().is_empty());
    }

    #[tokio::test]
    async fn invalid_carts_never_reach_the_store() {
        let store = MemoryOrderStore::new();
        store.set_offline(true);
        let writer = OrderWriter::new(Arc::new(store.clone()), Arc::new(Notify::new()));

        let mut bad = request();
        bad.items.clear();
        let result = writer.place_order(7, bad).await;
        assert!(matches!(result, Err(PlaceOrderError::Invalid(CartError::Empty))));
    }
}
