//! Ticket inventory reservation and fulfillment service.
//!
//! Finite ticket pools are sold without oversubscription, every purchase
//! yields unique credentials, and each credential can be redeemed once.

pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
