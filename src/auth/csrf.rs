//! Session-scoped CSRF token.
//!
//! One random token per browsing session, created the first time a
//! mutating request needs it and discarded on logout. The token only ever
//! travels in the `X-CSRF-Token` request header.

use std::sync::Mutex;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Random bytes per token; rendered as twice as many hex characters.
const CSRF_TOKEN_BYTES: usize = 32;

/// Lazily-created CSRF token holder. One per session, shared by reference
/// with the transport client; there is no module-level instance.
#[derive(Debug, Default)]
pub struct CsrfTokenStore {
    token: Mutex<Option<String>>,
}

impl CsrfTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's CSRF token, generating and retaining it on first use.
    pub fn token(&self) -> Result<String> {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let mut bytes = [0u8; CSRF_TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("Failed to generate CSRF token")?;
        let fresh = hex::encode(bytes);
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the token (called on logout). The next mutating request gets a
    /// fresh one.
    pub fn clear(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *token = None;
    }
}
