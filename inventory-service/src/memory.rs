//! In-memory `InventoryStore`. Reservations run against a working copy of
//! the stock table that replaces the real one only when every line fits,
//! mirroring the rollback of the PostgreSQL store.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use shared::{InventoryStatus, OrderLine, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{Product, StockView};
use crate::store::{InventoryStore, Reservation};

#[derive(Default)]
struct Tables {
    products: HashMap<i32, Product>,
    processed: HashMap<i32, InventoryStatus>,
}

#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    tables: Arc<Mutex<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `(product_id, quantity)` pairs.
    pub fn with_stock(stock: &[(i32, i32)]) -> Self {
        let store = Self::new();
        for &(product_id, quantity) in stock {
            store.add_product(product_id, &format!("product-{}", product_id), BigDecimal::from(1), quantity);
        }
        store
    }

    pub fn add_product(&self, id: i32, name: &str, price: BigDecimal, quantity: i32) {
        self.tables().products.insert(
            id,
            Product {
                id,
                name: name.to_string(),
                price,
                quantity,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn quantity(&self, product_id: i32) -> Option<i32> {
        self.tables().products.get(&product_id).map(|p| p.quantity)
    }

    pub fn processed(&self, order_id: i32) -> Option<InventoryStatus> {
        self.tables().processed.get(&order_id).copied()
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
impl InventoryStore for MemoryInventoryStore {
    async fn reserve(&self, order_id: i32, lines: &[OrderLine]) -> Result<Reservation, StoreError> {
        let mut tables = self.connect()?;
        if let Some(status) = tables.processed.get(&order_id) {
            return Ok(Reservation::AlreadyProcessed(*status));
        }

        let mut working = tables.products.clone();
        for line in lines {
            match working.get_mut(&line.product_id) {
                Some(product) if product.quantity >= line.quantity => product.quantity -= line.quantity,
                _ => {
                    tables.processed.insert(order_id, InventoryStatus::Failed);
                    return Ok(Reservation::Rejected {
                        product_id: line.product_id,
                        requested: line.quantity,
                    });
                }
            }
        }

        tables.products = working;
        tables.processed.insert(order_id, InventoryStatus::Completed);
        Ok(Reservation::Reserved)
    }

    async fn record_failure(&self, order_id: i32) -> Result<(), StoreError> {
        let mut tables = self.connect()?;
        tables.processed.entry(order_id).or_insert(InventoryStatus::Failed);
        Ok(())
    }

    async fn stock(&self, product_id: i32) -> Result<Option<StockView>, StoreError> {
        let tables = self.connect()?;
        Ok(tables.products.get(&product_id).cloned().map(StockView::from))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.connect().map(|_| ())
    }
}
