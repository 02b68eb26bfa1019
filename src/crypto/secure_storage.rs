//! Encrypted key-value storage over a plain string store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::crypto::{decrypt_data, encrypt_data};
use crate::storage::StringStore;

/// Wraps a [`StringStore`] so values are encrypted at rest. The passphrase
/// is supplied per call; nothing key-related is retained between calls.
pub struct SecureStorage {
    store: Arc<dyn StringStore>,
}

impl SecureStorage {
    pub fn new(store: Arc<dyn StringStore>) -> Self {
        Self { store }
    }

    /// Encrypt `value` under `password` and write it at `key`.
    pub fn set_item(&self, key: &str, value: &str, password: &str) -> Result<()> {
        let blob = encrypt_data(value, password)
            .with_context(|| format!("Failed to encrypt value for key '{}'", key))?;
        self.store.set(key, &blob)
    }

    /// Read and decrypt the value at `key`.
    ///
    /// Returns `None` when the key is missing, and also when the stored
    /// blob fails to decrypt (corrupted data or wrong password). Callers
    /// cannot tell the two apart; the failure is logged for diagnosis.
    pub fn get_item(&self, key: &str, password: &str) -> Option<String> {
        let blob = self.store.get(key)?;
        match decrypt_data(&blob, password) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecryptable secure storage entry");
                None
            }
        }
    }

    /// Remove the value at `key`, if any.
    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.store.remove(key)
    }

    /// Remove every entry in the backing store.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}
