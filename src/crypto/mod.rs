//! Password-based encryption, hashing, and secure storage.
//!
//! Keys are derived per call with PBKDF2-HMAC-SHA256 and used with
//! ChaCha20-Poly1305 authenticated encryption. The ciphertext blob embeds
//! everything needed to decrypt except the password:
//!
//! ```text
//! base64( salt(16) || nonce(12) || ciphertext+tag )
//! ```
//!
//! Salt and nonce are freshly random on every encryption; nothing is cached
//! between calls. Decryption fails closed: tampered, truncated, or
//! wrong-password input yields an error, never partial plaintext.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod secure_storage;

pub use secure_storage::SecureStorage;

/// Salt length prepended to every ciphertext blob
const SALT_LENGTH: usize = 16;

/// Nonce length for the AEAD cipher
const NONCE_LENGTH: usize = 12;

/// Authentication tag length appended by the cipher
const TAG_LENGTH: usize = 16;

/// Derived key length (256-bit)
const KEY_LENGTH: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count
const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Ciphertext is malformed or truncated")]
    InvalidCiphertext,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed - wrong password or tampered data")]
    DecryptFailed,

    #[error("Decrypted data is not valid UTF-8")]
    InvalidUtf8,

    #[error("Failed to generate randomness")]
    RandomFailed,
}

/// Derive a 256-bit encryption key from a password and salt.
///
/// The key is returned already bound to the cipher - callers can encrypt
/// and decrypt with it but never read the raw key material back.
pub fn derive_key(password: &str, salt: &[u8]) -> ChaCha20Poly1305 {
    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key_bytes);
    ChaCha20Poly1305::new(Key::from_slice(&key_bytes))
}

/// Encrypt `plaintext` under `password`. Every call draws a fresh random
/// salt and nonce, so encrypting the same input twice yields different
/// blobs.
pub fn encrypt_data(plaintext: &str, password: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|_| CryptoError::RandomFailed)?;
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CryptoError::RandomFailed)?;

    let cipher = derive_key(password, &salt);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut blob = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt_data`] with the same password.
pub fn decrypt_data(blob: &str, password: &str) -> Result<String, CryptoError> {
    let bytes = BASE64
        .decode(blob)
        .map_err(|_| CryptoError::InvalidCiphertext)?;

    if bytes.len() < SALT_LENGTH + NONCE_LENGTH + TAG_LENGTH {
        return Err(CryptoError::InvalidCiphertext);
    }

    let (salt, rest) = bytes.split_at(SALT_LENGTH);
    let (nonce, ciphertext) = rest.split_at(NONCE_LENGTH);

    let cipher = derive_key(password, salt);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

/// One-way SHA-256 fingerprint, base64-encoded.
///
/// Not suitable for password storage - there is no salting or stretching
/// here. Password-derived keys go through [`derive_key`] instead.
pub fn hash_data(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    BASE64.encode(hasher.finalize())
}
