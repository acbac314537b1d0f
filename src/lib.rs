//! Settlement engine for shared expense groups: expense ledgers kept in a
//! document store, reduced to per-member balances and suggested transfers.
pub mod auth;
pub mod balance;
pub mod config;
pub mod directory;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod mongo;
pub mod routes;
pub mod schemas;
pub mod store;
pub mod subscription;
pub mod telemetry;
