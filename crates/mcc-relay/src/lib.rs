//! MCC Relay Library
//!
//! Store-and-forward relay between mobile devices and the internal API:
//! - Polling the Mobile Comm Center exchange for onboarding and request packets
//! - Per-device AES sessions established from RSA-wrapped keys
//! - Reassembly, decryption and replay of device requests against the API
//! - Encrypted, chunked delivery of responses back to the exchange
//! - `SQLite` retry queue guaranteeing eventual delivery

pub mod assembler;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod job;
pub mod pipeline;
pub mod poller;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod storage;
pub mod upstream;
pub mod users;

#[cfg(test)]
mod test_support;

pub use error::RelayError;
