//! Storefront checkout core: transaction snapshots, the risk rule engine,
//! verification holds and order materialization, persisted in SQLite.

pub mod admin;
pub mod cart_lock;
pub mod catalog;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod materializer;
pub mod order;
pub mod risk_engine;
pub mod risk_rules;
pub mod routes;
pub mod store;
pub mod transaction_record;
pub mod types;
pub mod verification;
