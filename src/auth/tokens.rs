//! Credential token storage and expiry inspection.
//!
//! Tokens are opaque signed strings issued elsewhere; the only thing this
//! module reads out of them is the expiry claim. The store holds the
//! current access/refresh pair in memory and, when constructed with a
//! durable backing store (explicit-token deployments), writes the pair
//! through so a restarted client can resume the session.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::storage::StringStore;

/// Durable store key for the access token
const ACCESS_TOKEN_KEY: &str = "access_token";

/// Durable store key for the refresh token
const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// Expiry instant encoded in a JWT-style token, if one can be read.
///
/// The token is `header.payload.signature` with a base64url payload whose
/// `exp` claim is seconds since the epoch. Opaque tokens yield `None`.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp, 0).single()
}

/// Whether the token's expiry instant has passed. Tokens without a
/// readable expiry are treated as not expired - the server remains the
/// authority and will answer 401 if it disagrees.
pub fn is_expired(token: &str) -> bool {
    match expires_at(token) {
        Some(expiry) => Utc::now() > expiry,
        None => false,
    }
}

#[derive(Debug, Default)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

/// Holds the session's credential tokens. One per session, shared by
/// reference with the transport client.
pub struct TokenStore {
    tokens: Mutex<TokenPair>,
    durable: Option<Arc<dyn StringStore>>,
}

impl TokenStore {
    /// Store without persistence - cookie-transport deployments, where the
    /// refresh credential lives in the cookie jar.
    pub fn in_memory() -> Self {
        Self {
            tokens: Mutex::new(TokenPair::default()),
            durable: None,
        }
    }

    /// Store backed by a durable string store - explicit-token
    /// deployments. Any previously persisted pair is loaded immediately.
    pub fn with_durable(store: Arc<dyn StringStore>) -> Self {
        let pair = TokenPair {
            access: store.get(ACCESS_TOKEN_KEY),
            refresh: store.get(REFRESH_TOKEN_KEY),
        };
        Self {
            tokens: Mutex::new(pair),
            durable: Some(store),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .access
            .clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .refresh
            .clone()
    }

    /// Replace the access token and, when a rotated refresh token is
    /// supplied, the refresh token as well.
    pub fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.access = Some(access.to_string());
            if let Some(refresh) = refresh {
                tokens.refresh = Some(refresh.to_string());
            }
        }

        if let Some(store) = &self.durable {
            if let Err(e) = store.set(ACCESS_TOKEN_KEY, access) {
                warn!(error = %e, "Failed to persist access token");
            }
            if let Some(refresh) = refresh {
                if let Err(e) = store.set(REFRESH_TOKEN_KEY, refresh) {
                    warn!(error = %e, "Failed to persist refresh token");
                }
            }
        }
    }

    /// Discard both tokens, here and in the durable store.
    pub fn clear(&self) {
        {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.access = None;
            tokens.refresh = None;
        }

        if let Some(store) = &self.durable {
            if let Err(e) = store.remove(ACCESS_TOKEN_KEY) {
                warn!(error = %e, "Failed to remove persisted access token");
            }
            if let Err(e) = store.remove(REFRESH_TOKEN_KEY) {
                warn!(error = %e, "Failed to remove persisted refresh token");
            }
        }
    }
}
