//! AES-256-CBC token codec.
//!
//! Every message exchanged with a device is a JSON document encrypted with
//! that device's AES key. The wire form is
//! `<base64 ciphertext>:::<hex iv>` with a fresh random IV per message.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Separator between the ciphertext and the IV in an encrypted token.
pub const TOKEN_DELIMITER: &str = ":::";

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;

/// A decrypted message.
///
/// Devices normally send JSON, but anything that decrypts cleanly and is not
/// JSON is handed back as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    /// Returns the JSON value, or `None` for a text payload.
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

fn decode_key(key_hex: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = Zeroizing::new(
        hex::decode(key_hex.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
    );
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "expected {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// Serialize `data` to JSON and encrypt it with the hex-encoded AES-256 key.
pub fn encrypt<T: Serialize + ?Sized>(data: &T, key_hex: &str) -> Result<String, CryptoError> {
    let key = decode_key(key_hex)?;
    let plaintext =
        serde_json::to_vec(data).map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    Ok(format!(
        "{}{TOKEN_DELIMITER}{}",
        BASE64.encode(ciphertext),
        hex::encode(iv)
    ))
}

/// Decrypt a `<base64 ciphertext>:::<hex iv>` token with the hex-encoded key.
///
/// The plaintext is parsed as JSON when possible; otherwise it is returned as
/// [`Payload::Text`].
pub fn decrypt(token: &str, key_hex: &str) -> Result<Payload, CryptoError> {
    let (ciphertext_b64, iv_hex) = token
        .split_once(TOKEN_DELIMITER)
        .ok_or_else(|| CryptoError::InvalidToken("missing ':::' delimiter".into()))?;
    if iv_hex.contains(TOKEN_DELIMITER) {
        return Err(CryptoError::InvalidToken(
            "more than one ':::' delimiter".into(),
        ));
    }

    let key = decode_key(key_hex)?;
    let iv = hex::decode(iv_hex.trim()).map_err(|e| CryptoError::InvalidToken(e.to_string()))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64.trim())
        .map_err(|e| CryptoError::InvalidToken(e.to_string()))?;

    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|_| CryptoError::InvalidToken(format!("IV must be {IV_SIZE} bytes")))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    let text = String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))?;

    Ok(serde_json::from_str(&text).map_or(Payload::Text(text), Payload::Json))
}
