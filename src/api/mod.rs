//! REST API transport for the WattWise backend.
//!
//! This module provides the `ApiClient` for making authenticated requests:
//! bearer tokens on every call, CSRF stamping on mutating calls, and a
//! shared single-flight session refresh behind 401 responses.
//!
//! The refresh endpoint and transport mode come from [`crate::config`];
//! credential state lives in [`crate::auth`].

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, RefreshError};
