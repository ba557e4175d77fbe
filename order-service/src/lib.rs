//! Order side of the fulfillment saga: accepts carts, records them with an
//! `OrderPlaced` outbox entry, relays the outbox to the event log and
//! finalizes orders from inventory outcomes.

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod memory;
pub mod models;
pub mod outbox;
pub mod schema;
pub mod store;
pub mod writer;
