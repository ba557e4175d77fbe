use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use shared::events::{self, DecodeError, Fields};
use shared::InventoryStatus;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
#[error("unknown order status `{0}`")]
pub struct UnknownStatus(pub String);

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl From<InventoryStatus> for OrderStatus {
    fn from(status: InventoryStatus) -> Self {
        match status {
            InventoryStatus::Completed => OrderStatus::Completed,
            InventoryStatus::Failed => OrderStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub total_price: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub user_id: i32,
    pub total_price: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(belongs_to(Order))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItem {
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: i32,
    pub stream_name: String,
    pub event_type: String,
    pub fields: serde_json::Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: i32,
    pub stream_name: String,
    pub event_type: String,
    pub fields: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(order_id: i32, stream: &str, event_type: &str, fields: &Fields) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: order_id,
            stream_name: stream.to_string(),
            event_type: event_type.to_string(),
            fields: serde_json::Value::from(events::to_flat(fields)),
        }
    }
}

/// An outbox row waiting to be relayed to the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub order_id: i32,
    pub stream: String,
    pub event_type: String,
    pub fields: Fields,
}

impl TryFrom<DbOutboxEvent> for OutboxEntry {
    type Error = DecodeError;

    fn try_from(row: DbOutboxEvent) -> Result<Self, Self::Error> {
        let flat: Vec<String> = serde_json::from_value(row.fields)?;
        Ok(Self {
            id: row.id,
            order_id: row.aggregate_id,
            stream: row.stream_name,
            event_type: row.event_type,
            fields: events::from_flat(flat)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: i32,
    pub quantity: i32,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i32,
    pub user_id: i32,
    pub total_price: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderView {
    pub fn from_rows(order: Order, items: Vec<OrderItem>) -> Result<Self, UnknownStatus> {
        Ok(Self {
            id: order.id,
            user_id: order.user_id,
            total_price: order.total_price.to_string(),
            status: order.status.parse()?,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price.to_string(),
                })
                .collect(),
        })
    }
}
