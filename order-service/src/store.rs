use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use shared::events::{ORDERS_STREAM, ORDER_PLACED};
use shared::{DbPool, InventoryStatus, OrderPlaced, StoreError};
use uuid::Uuid;

use crate::cart::Cart;
use crate::models::*;
use crate::schema::*;

/// Result of writing a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: i32,
    pub item_count: usize,
}

/// Result of applying an inventory outcome to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied(OrderStatus),
    /// The order already had a terminal status, which was kept.
    AlreadyFinal(OrderStatus),
    NotFound,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order, its items and the `OrderPlaced` outbox entry in
    /// one transaction. On error nothing is written.
    async fn create_order(&self, cart: &Cart) -> Result<CreatedOrder, StoreError>;

    /// Moves a `PENDING` order to the given terminal status.
    async fn finalize_order(&self, order_id: i32, status: InventoryStatus) -> Result<StatusChange, StoreError>;

    async fn find_order(&self, order_id: i32) -> Result<Option<OrderView>, StoreError>;

    /// Unpublished outbox entries, oldest first.
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
    orders_stream: String,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            orders_stream: ORDERS_STREAM.to_string(),
        }
    }

    /// Stream the `OrderPlaced` outbox entries are addressed to.
    pub fn with_orders_stream(mut self, stream: impl Into<String>) -> Self {
        self.orders_stream = stream.into();
        self
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, cart: &Cart) -> Result<CreatedOrder, StoreError> {
        let mut conn = self.pool.get().await?;

        let new_order = NewOrder {
            user_id: cart.user_id,
            total_price: cart.total_price.clone(),
            status: cart.status.as_str().to_string(),
        };
        let items = cart.items.clone();
        let lines = cart.lines();
        let stream = self.orders_stream.clone();

        let order_id = conn
            .transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    let order_id = diesel::insert_into(orders::table)
                        .values(&new_order)
                        .returning(orders::id)
                        .get_result::<i32>(conn)
                        .await?;

                    let new_items: Vec<NewOrderItem> = items
                        .into_iter()
                        .map(|item| NewOrderItem {
                            order_id,
                            product_id: item.product_id,
                            quantity: item.quantity,
                            price: item.price,
                        })
                        .collect();

                    diesel::insert_into(order_items::table)
                        .values(&new_items)
                        .execute(conn)
                        .await?;

                    let event = OrderPlaced { order_id, products: lines };
                    let fields = event
                        .to_fields()
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                    let outbox_event = NewOutboxEvent::new(order_id, &stream, ORDER_PLACED, &fields);

                    diesel::insert_into(outbox_events::table)
                        .values(&outbox_event)
                        .execute(conn)
                        .await?;

                    Ok(order_id)
                })
            })
            .await?;

        Ok(CreatedOrder {
            order_id,
            item_count: cart.items.len(),
        })
    }

    async fn finalize_order(&self, order_id: i32, status: InventoryStatus) -> Result<StatusChange, StoreError> {
        let mut conn = self.pool.get().await?;
        let target = OrderStatus::from(status);

        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::status.eq(OrderStatus::Pending.as_str())),
        )
        .set(orders::status.eq(target.as_str()))
        .execute(&mut conn)
        .await?;

        if updated == 1 {
            return Ok(StatusChange::Applied(target));
        }

        let current = orders::table
            .find(order_id)
            .select(orders::status)
            .first::<String>(&mut conn)
            .await
            .optional()?;

        match current {
            Some(current) => {
                let current = current
                    .parse()
                    .map_err(|e: UnknownStatus| StoreError::InvalidData(e.to_string()))?;
                Ok(StatusChange::AlreadyFinal(current))
            }
            None => Ok(StatusChange::NotFound),
        }
    }

    async fn find_order(&self, order_id: i32) -> Result<Option<OrderView>, StoreError> {
        let mut conn = self.pool.get().await?;

        let Some(order) = orders::table
            .find(order_id)
            .select(Order::as_select())
            .first(&mut conn)
            .await
            .optional()?
        else {
            return Ok(None);
        };

        let items = OrderItem::belonging_to(&order)
            .select(OrderItem::as_select())
            .order(order_items::id.asc())
            .load(&mut conn)
            .await?;

        OrderView::from_rows(order, items)
            .map(Some)
            .map_err(|e| StoreError::InvalidData(e.to_string()))
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|row| OutboxEntry::try_from(row).map_err(|e| StoreError::InvalidData(e.to_string())))
            .collect()
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;

        diesel::update(outbox_events::table.filter(outbox_events::id.eq(id)))
            .set((
                outbox_events::published.eq(true),
                outbox_events::published_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        shared::db::ping(&self.pool).await
    }
}
