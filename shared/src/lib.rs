//! Building blocks shared by the order and inventory services: the event
//! model that travels over the log, the log clients, consumer cursors and
//! the supervised stream worker that drives every consumer.

pub mod config;
pub mod cursor;
pub mod db;
pub mod events;
pub mod health;
pub mod kafka;
pub mod log;
pub mod memory;
pub mod shutdown;
pub mod worker;

pub use cursor::{CursorError, CursorStore, PgCursorStore};
pub use db::{DbPool, StoreError};
pub use events::{
    DecodeError, Fields, InventoryStatus, InventoryUpdated, OrderLine, OrderPlaced,
    INVENTORY_STREAM, ORDERS_STREAM,
};
pub use kafka::{KafkaConfig, KafkaEventLog};
pub use log::{EventLog, LogError, LogRecord, ReadPosition, RecordId};
pub use memory::{MemoryCursorStore, MemoryEventLog};
pub use worker::{
    Backoff, ConsumerState, HandlerError, RecordHandler, StreamWorker, WorkerConfig, WorkerError,
};
