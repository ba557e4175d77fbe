use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_orders)]
pub struct NewProcessedOrder<'a> {
    pub order_id: i32,
    pub status: &'a str,
}

/// Stock level of one product as served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockView {
    pub product_id: i32,
    pub name: String,
    pub price: String,
    pub quantity: i32,
}

impl From<Product> for StockView {
    fn from(product: Product) -> Self {
        Self {
            product_id: product.id,
            name: product.name,
            price: product.price.to_string(),
            quantity: product.quantity,
        }
    }
}
