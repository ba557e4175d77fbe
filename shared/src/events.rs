use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ORDERS_STREAM: &str = "orders_stream";
pub const INVENTORY_STREAM: &str = "inventory_stream";

pub const ORDER_PLACED: &str = "OrderPlaced";

/// Ordered key/value pairs carried by one log record.
pub type Fields = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid order id `{0}`")]
    InvalidOrderId(String),
    #[error("invalid products payload: {0}")]
    InvalidProducts(#[from] serde_json::Error),
    #[error("order has no products")]
    NoProducts,
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: i32, quantity: i32 },
    #[error("unknown inventory status `{0}`")]
    InvalidStatus(String),
    #[error("record has an odd number of entries ({0})")]
    OddFieldCount(usize),
}

/// One line of an order as it travels in the `products` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: i32,
    pub price: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Completed,
    Failed,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Completed => "COMPLETED",
            InventoryStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(InventoryStatus::Completed),
            "FAILED" => Ok(InventoryStatus::Failed),
            other => Err(DecodeError::InvalidStatus(other.to_string())),
        }
    }
}

/// Published on `orders_stream` once an order and its items are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlaced {
    pub order_id: i32,
    pub products: Vec<OrderLine>,
}

impl OrderPlaced {
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        Ok(vec![
            ("order_id".to_string(), self.order_id.to_string()),
            ("products".to_string(), serde_json::to_string(&self.products)?),
        ])
    }

    /// Decodes and validates the record. Quantities must be positive: a
    /// non-positive quantity would turn the guarded decrement into a restock.
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, DecodeError> {
        let order_id = order_id(fields)?;
        let products: Vec<OrderLine> = serde_json::from_str(field(fields, "products")?)?;
        if products.is_empty() {
            return Err(DecodeError::NoProducts);
        }
        if let Some(line) = products.iter().find(|line| line.quantity <= 0) {
            return Err(DecodeError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }
        Ok(Self { order_id, products })
    }
}

/// Published on `inventory_stream` with the outcome of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryUpdated {
    pub order_id: i32,
    pub status: InventoryStatus,
}

impl InventoryUpdated {
    pub fn to_fields(&self) -> Fields {
        vec![
            ("order_id".to_string(), self.order_id.to_string()),
            ("status".to_string(), self.status.as_str().to_string()),
        ]
    }

    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, DecodeError> {
        Ok(Self {
            order_id: order_id(fields)?,
            status: field(fields, "status")?.parse()?,
        })
    }
}

/// Returns the first value stored under `name`.
pub fn field<'a>(fields: &'a [(String, String)], name: &'static str) -> Result<&'a str, DecodeError> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .ok_or(DecodeError::MissingField(name))
}

pub fn order_id(fields: &[(String, String)]) -> Result<i32, DecodeError> {
    let raw = field(fields, "order_id")?;
    raw.parse()
        .map_err(|_| DecodeError::InvalidOrderId(raw.to_string()))
}

/// Flattens fields into the alternating key/value list used on the wire.
pub fn to_flat(fields: &[(String, String)]) -> Vec<String> {
    fields
        .iter()
        .flat_map(|(key, value)| [key.clone(), value.clone()])
        .collect()
}

pub fn from_flat(flat: Vec<String>) -> Result<Fields, DecodeError> {
    if flat.len() % 2 != 0 {
        return Err(DecodeError::OddFieldCount(flat.len()));
    }
    let mut entries = flat.into_iter();
    let mut fields = Vec::new();
    while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
        fields.push((key, value));
    }
    Ok(fields)
}

pub fn encode_payload(fields: &[(String, String)]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&to_flat(fields))
}

pub fn decode_payload(payload: &str) -> Result<Fields, DecodeError> {
    from_flat(serde_json::from_str(payload)?)
}
