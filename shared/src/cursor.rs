use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use crate::db::{DbPool, StoreError};
use crate::log::RecordId;

diesel::table! {
    consumer_cursors (consumer_name, stream_name) {
        consumer_name -> Varchar,
        stream_name -> Varchar,
        last_record_id -> Int8,
        updated_at -> Timestamptz,
    }
}

#[derive(Debug, Error)]
#[error("cursor store error: {0}")]
pub struct CursorError(#[from] pub StoreError);

impl From<diesel::result::Error> for CursorError {
    fn from(e: diesel::result::Error) -> Self {
        CursorError(StoreError::Database(e))
    }
}

/// Durable record of how far each consumer got in each stream.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, consumer: &str, stream: &str) -> Result<Option<RecordId>, CursorError>;
    async fn save(&self, consumer: &str, stream: &str, id: RecordId) -> Result<(), CursorError>;
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = consumer_cursors)]
struct CursorRow<'a> {
    consumer_name: &'a str,
    stream_name: &'a str,
    last_record_id: i64,
    updated_at: DateTime<Utc>,
}

/// Keeps cursors in the `consumer_cursors` table of the consuming
/// service's own database.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: DbPool,
}

impl PgCursorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, consumer: &str, stream: &str) -> Result<Option<RecordId>, CursorError> {
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;

        let last = consumer_cursors::table
            .filter(consumer_cursors::consumer_name.eq(consumer))
            .filter(consumer_cursors::stream_name.eq(stream))
            .select(consumer_cursors::last_record_id)
            .first::<i64>(&mut conn)
            .await
            .optional()?;

        Ok(last.map(RecordId::new))
    }

    async fn save(&self, consumer: &str, stream: &str, id: RecordId) -> Result<(), CursorError> {
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;

        let row = CursorRow {
            consumer_name: consumer,
            stream_name: stream,
            last_record_id: id.offset(),
            updated_at: Utc::now(),
        };

        diesel::insert_into(consumer_cursors::table)
            .values(&row)
            .on_conflict((consumer_cursors::consumer_name, consumer_cursors::stream_name))
            .do_update()
            .set((
                consumer_cursors::last_record_id.eq(excluded(consumer_cursors::last_record_id)),
                consumer_cursors::updated_at.eq(excluded(consumer_cursors::updated_at)),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
