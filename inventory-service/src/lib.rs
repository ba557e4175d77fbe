//! Inventory side of the fulfillment saga: reconciles placed orders
//! against stock with guarded, all-or-nothing decrements and reports the
//! outcome on the inventory stream.

pub mod api;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod reconciler;
pub mod schema;
pub mod store;
