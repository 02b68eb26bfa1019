//! Client configuration.
//!
//! The base API URL and the refresh transport mode come from the
//! environment (optionally via a `.env` file). The refresh mode is fixed
//! for the lifetime of the client - deployments use cookie transport or
//! explicit refresh tokens, never a per-request mix.

use std::str::FromStr;

use anyhow::{Context, Result};

/// Environment variable naming the API base URL
const ENV_API_BASE_URL: &str = "WATTWISE_API_BASE_URL";

/// Environment variable selecting the refresh transport mode
const ENV_REFRESH_MODE: &str = "WATTWISE_REFRESH_MODE";

/// How the refresh credential travels to `POST /auth/refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// The refresh token lives in a server-set cookie; the refresh call
    /// sends no body and relies on the credentialed cookie jar.
    Cookie,
    /// The client holds the refresh token and sends it in the request
    /// body.
    Body,
}

impl FromStr for RefreshMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(RefreshMode::Cookie),
            "body" | "token" => Ok(RefreshMode::Body),
            other => Err(anyhow::anyhow!("Unknown refresh mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_mode: RefreshMode,
}

impl Config {
    pub fn new(api_base_url: impl Into<String>, refresh_mode: RefreshMode) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        Self {
            api_base_url,
            refresh_mode,
        }
    }

    /// Load configuration from the environment. A `.env` file is read
    /// first if present. The base URL is required; the refresh mode
    /// defaults to cookie transport.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let api_base_url = std::env::var(ENV_API_BASE_URL)
            .with_context(|| format!("{} is not set", ENV_API_BASE_URL))?;

        let refresh_mode = match std::env::var(ENV_REFRESH_MODE) {
            Ok(value) => value.parse()?,
            Err(_) => RefreshMode::Cookie,
        };

        Ok(Self::new(api_base_url, refresh_mode))
    }
}
