//! `SQLite` storage for the MCC relay.
//!
//! Provides persistence for relay users, device sessions and the retry queue.
//! Every table is keyed by tenant so one database serves all tenants.

mod db;
mod models;
mod queries;
mod queries_queue;

#[cfg(test)]
mod tests;

pub use db::{DatabaseError, RelayDatabase, now_millis, now_secs};
pub use models::*;
pub use queries::NewDeviceSession;
