//! MCC Relay Core Library
//!
//! Shared functionality for the relay components:
//! - Configuration resolution (defaults, JSON file, environment)
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{MissingPacketPolicy, RelayConfig};
pub use error::{Error, Result};
