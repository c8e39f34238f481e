//! MCC Relay Crypto Library
//!
//! Primitives shared between the relay and the mobile devices it serves.
//!
//! ## Crypto primitives
//!
//! - **Tokens**: AES-256-CBC (PKCS#7), fresh 16-byte IV per message, encoded as
//!   `<base64 ciphertext>:::<hex iv>`
//! - **Key exchange**: devices send their AES key wrapped with the relay user's
//!   RSA public key (PKCS#1 v1.5)
//! - **Packets**: encrypted tokens are bisected into fragments that fit the
//!   exchange's upload limit

pub mod codec;
pub mod error;
pub mod keys;
pub mod packets;

pub use codec::{Payload, TOKEN_DELIMITER, decrypt, encrypt};
pub use error::CryptoError;
pub use keys::{
    RSA_KEY_BITS, RelayKeyPair, generate_registration_token, hash_registration_token, unwrap_key,
};
pub use packets::chunk;
