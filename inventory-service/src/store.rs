use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use shared::{DbPool, InventoryStatus, OrderLine, StoreError};
use thiserror::Error;

use crate::models::{NewProcessedOrder, Product, StockView};
use crate::schema::*;

/// Outcome of reconciling one order against stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Every line was decremented and committed.
    Reserved,
    /// A line could not be covered; nothing was decremented.
    Rejected { product_id: i32, requested: i32 },
    /// The order was reconciled before; stock was left untouched.
    AlreadyProcessed(InventoryStatus),
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Decrements stock for every line of the order in one transaction,
    /// in line order, stopping at the first line that is not covered.
    /// Records a processed-order marker so a second call for the same
    /// order changes nothing.
    async fn reserve(&self, order_id: i32, lines: &[OrderLine]) -> Result<Reservation, StoreError>;

    async fn record_failure(&self, order_id: i32) -> Result<(), StoreError>;

    async fn stock(&self, product_id: i32) -> Result<Option<StockView>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
enum ReserveError {
    #[error("insufficient stock for product {product_id} (requested {requested})")]
    Insufficient { product_id: i32, requested: i32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for ReserveError {
    fn from(e: diesel::result::Error) -> Self {
        ReserveError::Store(StoreError::Database(e))
    }
}

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: DbPool,
}

impl PgInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn reserve(&self, order_id: i32, lines: &[OrderLine]) -> Result<Reservation, StoreError> {
        let mut conn = self.pool.get().await?;

        let lines = lines.to_vec();
        let result = conn
            .transaction::<_, ReserveError, _>(|conn| {
                Box::pin(async move {
                    // Claiming the marker first serializes concurrent deliveries
                    // of one order on its primary key.
                    let claimed = diesel::insert_into(processed_orders::table)
                        .values(NewProcessedOrder {
                            order_id,
                            status: InventoryStatus::Completed.as_str(),
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    if claimed == 0 {
                        let status = processed_orders::table
                            .find(order_id)
                            .select(processed_orders::status)
                            .first::<String>(conn)
                            .await?;
                        let status = status
                            .parse()
                            .map_err(|e: shared::DecodeError| StoreError::InvalidData(e.to_string()))?;
                        return Ok(Reservation::AlreadyProcessed(status));
                    }

                    for line in &lines {
                        // Single-statement guard: the row is only touched if it
                        // still covers the requested quantity.
                        let updated = diesel::update(
                            products::table
                                .filter(products::id.eq(line.product_id))
                                .filter(products::quantity.ge(line.quantity)),
                        )
                        .set(products::quantity.eq(products::quantity - line.quantity))
                        .execute(conn)
                        .await?;

                        if updated == 0 {
                            return Err(ReserveError::Insufficient {
                                product_id: line.product_id,
                                requested: line.quantity,
                            });
                        }
                    }

                    Ok(Reservation::Reserved)
                })
            })
            .await;

        match result {
            Ok(reservation) => Ok(reservation),
            Err(ReserveError::Insufficient {
                product_id,
                requested,
            }) => {
                insert_failure(&mut conn, order_id).await?;
                Ok(Reservation::Rejected {
                    product_id,
                    requested,
                })
            }
            Err(ReserveError::Store(e)) => Err(e),
        }
    }

    async fn record_failure(&self, order_id: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        insert_failure(&mut conn, order_id).await
    }

    async fn stock(&self, product_id: i32) -> Result<Option<StockView>, StoreError> {
        let mut conn = self.pool.get().await?;

        let product = products::table
            .find(product_id)
            .select(Product::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(product.map(StockView::from))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        shared::db::ping(&self.pool).await
    }
}

async fn insert_failure(conn: &mut diesel_async::AsyncPgConnection, order_id: i32) -> Result<(), StoreError> {
    diesel::insert_into(processed_orders::table)
        .values(NewProcessedOrder {
            order_id,
            status: InventoryStatus::Failed.as_str(),
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}
