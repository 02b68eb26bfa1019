//! Core client library for WattWise - the security and session layer of
//! the energy-management client.
//!
//! The crate covers the parts of the client where a bug is a security
//! failure rather than a cosmetic one:
//!
//! - [`api`]: HTTP transport with CSRF stamping and single-flight session
//!   refresh under concurrent 401s
//! - [`auth`]: credential token and CSRF token stores
//! - [`crypto`]: password-based authenticated encryption and secure
//!   key-value storage
//! - [`ratelimit`]: sliding-window attempt limiting for form logic
//! - [`validation`]: input validation and sanitization
//! - [`storage`] / [`config`]: the persistence and environment boundaries
//!
//! UI components, business rules, and plain data-fetch wrappers live in
//! the application layers on top and consume these APIs.

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod ratelimit;
pub mod storage;
pub mod validation;

pub use api::{ApiClient, ApiError, RefreshError};
pub use auth::{CsrfTokenStore, TokenStore};
pub use config::{Config, RefreshMode};
pub use crypto::{decrypt_data, encrypt_data, hash_data, CryptoError, SecureStorage};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use storage::{FileStore, MemoryStore, StringStore};
pub use validation::{ValidationResult, sanitize_string, validate_form};
