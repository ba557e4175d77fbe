//! In-memory `OrderStore` with the same transactional guarantees as the
//! PostgreSQL store, for tests and local runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use shared::events::{ORDERS_STREAM, ORDER_PLACED};
use shared::{InventoryStatus, OrderPlaced, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::cart::Cart;
use crate::models::{OrderItemView, OrderStatus, OrderView, OutboxEntry};
use crate::store::{CreatedOrder, OrderStore, StatusChange};

#[derive(Default)]
struct Tables {
    orders: Vec<OrderView>,
    outbox: Vec<(OutboxEntry, bool)>,
}

#[derive(Clone)]
pub struct MemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    offline: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
    orders_stream: String,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            offline: Arc::default(),
            reject_writes: Arc::default(),
            orders_stream: ORDERS_STREAM.to_string(),
        }
    }
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders_stream(mut self, stream: impl Into<String>) -> Self {
        self.orders_stream = stream.into();
        self
    }

    /// Simulates losing the database connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every order insert fail, as a constraint violation would.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.tables().orders.len()
    }

    pub fn outbox(&self) -> Vec<(OutboxEntry, bool)> {
        self.tables().outbox.clone()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connect(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(self.tables())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_order(&self, cart: &Cart) -> Result<CreatedOrder, StoreError> {
        let mut tables = self.connect()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(diesel::result::Error::RollbackTransaction));
        }

        let order_id = tables.orders.len() as i32 + 1;
        let event = OrderPlaced {
            order_id,
            products: cart.lines(),
        };
        let fields = event
            .to_fields()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        tables.orders.push(OrderView {
            id: order_id,
            user_id: cart.user_id,
            total_price: cart.total_price.to_string(),
            status: cart.status,
            created_at: Utc::now(),
            items: cart
                .items
                .iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price.to_string(),
                })
                .collect(),
        });
        tables.outbox.push((
            OutboxEntry {
                id: Uuid::new_v4(),
                order_id,
                stream: self.orders_stream.clone(),
                event_type: ORDER_PLACED.to_string(),
                fields,
            },
            false,
        ));

        Ok(CreatedOrder {
            order_id,
            item_count: cart.items.len(),
        })
    }

    async fn finalize_order(&self, order_id: i32, status: InventoryStatus) -> Result<StatusChange, StoreError> {
        let mut tables = self.connect()?;
        let Some(order) = tables.orders.iter_mut().find(|order| order.id == order_id) else {
            return Ok(StatusChange::NotFound);
        };

        if order.status.is_terminal() {
            return Ok(StatusChange::AlreadyFinal(order.status));
        }
        order.status = OrderStatus::from(status);
        Ok(StatusChange::Applied(order.status))
    }

    async fn find_order(&self, order_id: i32) -> Result<Option<OrderView>, StoreError> {
        let tables = self.connect()?;
        Ok(tables.orders.iter().find(|order| order.id == order_id).cloned())
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let tables = self.connect()?;
        Ok(tables
            .outbox
            .iter()
            .filter(|(_, published)| !published)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.connect()?;
        if let Some((_, published)) = tables.outbox.iter_mut().find(|(entry, _)| entry.id == id) {
            *published = true;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.connect().map(|_| ())
    }
}
