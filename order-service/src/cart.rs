use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::Deserialize;
use shared::OrderLine;
use std::str::FromStr;
use thiserror::Error;

use crate::models::OrderStatus;

/// Largest absolute value a `NUMERIC(10, 2)` column holds.
const MAX_AMOUNT: i64 = 100_000_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub product_id: i32,
    pub price: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub total_price: String,
    pub status: Option<String>,
    pub items: Vec<CartItemRequest>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("order must contain at least one item")]
    Empty,
    #[error("quantity for product {product_id} must be positive, got {quantity}")]
    InvalidQuantity { product_id: i32, quantity: i32 },
    #[error("{field} `{value}` is not a valid amount")]
    InvalidAmount { field: String, value: String },
    #[error("status `{0}` is not allowed when creating an order")]
    InvalidStatus(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub product_id: i32,
    pub price: BigDecimal,
    pub quantity: i32,
}

impl CartItem {
    pub fn to_line(&self) -> OrderLine {
        OrderLine {
            product_id: self.product_id,
            price: self.price.to_string(),
            quantity: self.quantity,
        }
    }
}

/// A cart that passed validation and may be written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Cart {
    pub user_id: i32,
    pub total_price: BigDecimal,
    pub status: OrderStatus,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn validate(user_id: i32, request: CreateOrderRequest) -> Result<Self, CartError> {
        if request.items.is_empty() {
            return Err(CartError::Empty);
        }

        let status = match request.status.as_deref() {
            None | Some("PENDING") => OrderStatus::Pending,
            Some("COMPLETED") => OrderStatus::Completed,
            Some(other) => return Err(CartError::InvalidStatus(other.to_string())),
        };

        let total_price = parse_amount("totalPrice", &request.total_price)?;

        let items = request
            .items
            .into_iter()
            .map(|item| {
                if item.quantity <= 0 {
                    return Err(CartError::InvalidQuantity {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    });
                }
                Ok(CartItem {
                    product_id: item.product_id,
                    price: parse_amount("price", &item.price)?,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            user_id,
            total_price,
            status,
            items,
        })
    }

    pub fn lines(&self) -> Vec<OrderLine> {
        self.items.iter().map(CartItem::to_line).collect()
    }
}

/// Parses a non-negative money amount with at most two decimal places.
fn parse_amount(field: &str, value: &str) -> Result<BigDecimal, CartError> {
    let invalid = || CartError::InvalidAmount {
        field: field.to_string(),
        value: value.to_string(),
    };

    let amount = BigDecimal::from_str(value.trim()).map_err(|_| invalid())?;
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if amount < BigDecimal::zero() || scale > 2 || amount >= BigDecimal::from(MAX_AMOUNT) {
        return Err(invalid());
    }
    Ok(amount)
}
