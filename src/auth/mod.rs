//! Session authentication state.
//!
//! This module provides:
//! - `TokenStore`: the session's access/refresh credential pair, with
//!   optional durable persistence and JWT expiry inspection
//! - `CsrfTokenStore`: the session-scoped CSRF token
//!
//! Both are explicit context objects constructed at session start and
//! shared with the transport client via `Arc`.

pub mod csrf;
pub mod tokens;

pub use csrf::CsrfTokenStore;
pub use tokens::{expires_at, is_expired, TokenStore};
