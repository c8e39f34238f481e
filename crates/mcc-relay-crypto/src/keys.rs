//! Relay user key material.
//!
//! Each relay user owns an RSA key pair. The public half is published to the
//! exchange; devices use it to wrap the AES key they generate during
//! onboarding, and the relay unwraps it here with the private half.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::{Digest, Sha224, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Modulus size for newly generated relay user keys.
pub const RSA_KEY_BITS: usize = 2048;

/// A PEM-encoded RSA key pair.
pub struct RelayKeyPair {
    /// PKCS#8 private key PEM.
    pub private_pem: Zeroizing<String>,
    /// SPKI public key PEM.
    pub public_pem: String,
}

impl std::fmt::Debug for RelayKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayKeyPair")
            .field("public_pem", &self.public_pem)
            .field("private_pem", &"[REDACTED]")
            .finish()
    }
}

impl RelayKeyPair {
    /// Generate a fresh key pair with a `bits`-bit modulus.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            private_pem,
            public_pem,
        })
    }
}

/// Shape of the plaintext inside a device's wrapped key.
#[derive(Deserialize)]
struct WrappedAesKey {
    #[serde(rename = "aesKey")]
    aes_key: String,
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::KeyUnwrap(format!("invalid private key: {e}")))
}

/// Recover a device's AES key from its RSA-wrapped onboarding blob.
///
/// `rsa_cipher_b64` is the base64 PKCS#1 v1.5 ciphertext of
/// `{"aesKey": "<hex>"}`. Accepts PKCS#8 and PKCS#1 private key PEMs.
/// Returns the hex-encoded AES key.
pub fn unwrap_key(rsa_cipher_b64: &str, private_key_pem: &str) -> Result<String, CryptoError> {
    let private = parse_private_key(private_key_pem)?;
    let ciphertext = BASE64
        .decode(rsa_cipher_b64.trim())
        .map_err(|e| CryptoError::KeyUnwrap(format!("invalid base64: {e}")))?;

    let plaintext = Zeroizing::new(
        private
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(|e| CryptoError::KeyUnwrap(e.to_string()))?,
    );
    let wrapped: WrappedAesKey = serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::KeyUnwrap(format!("unexpected key payload: {e}")))?;

    Ok(wrapped.aes_key)
}

/// Generate a single-use registration token (SHA-224 hex of random bytes).
pub fn generate_registration_token() -> String {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    hex::encode(Sha224::digest(seed))
}

/// Hash a registration token the way the exchange stores it:
/// base64 of its SHA-256 digest.
pub fn hash_registration_token(token: &str) -> String {
    BASE64.encode(Sha256::digest(token.as_bytes()))
}
