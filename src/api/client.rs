//! HTTP transport client with CSRF stamping and automatic session renewal.
//!
//! Every mutating request carries the session's CSRF token. A 401 response
//! triggers one token refresh and one replay of the original request; the
//! refresh is shared, so any number of requests failing in the same window
//! produce a single `POST /auth/refresh` round trip. A request that still
//! gets 401 after its replay is surfaced as a final authorization failure.
//!
//! Refresh failure is fatal to the session: all credentials are dropped
//! and the logout signal fires so the application can return to its
//! unauthenticated entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::auth::{CsrfTokenStore, TokenStore};
use crate::config::{Config, RefreshMode};

use super::error::{ApiError, RefreshError};

/// HTTP request timeout in seconds.
/// Also bounds the refresh call - there is no separate refresh timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Header carrying the CSRF token on mutating requests
const CSRF_HEADER: &str = "X-CSRF-Token";

/// Refresh endpoint path, relative to the base URL
const REFRESH_PATH: &str = "/auth/refresh";

/// The single in-flight refresh, joinable by any number of callers.
type RefreshFuture = Shared<BoxFuture<'static, std::result::Result<Option<String>, RefreshError>>>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

/// API client for the WattWise backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection
/// pooling, and the session state is shared behind Arcs.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    refresh_mode: RefreshMode,
    tokens: Arc<TokenStore>,
    csrf: Arc<CsrfTokenStore>,
    refresh_in_flight: Arc<Mutex<Option<RefreshFuture>>>,
    logout_tx: Arc<watch::Sender<bool>>,
}

impl ApiClient {
    /// Create a new API client over the session's token and CSRF stores.
    pub fn new(
        config: &Config,
        tokens: Arc<TokenStore>,
        csrf: Arc<CsrfTokenStore>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .build()?;

        let (logout_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            refresh_mode: config.refresh_mode,
            tokens,
            csrf,
            refresh_in_flight: Arc::new(Mutex::new(None)),
            logout_tx: Arc::new(logout_tx),
        })
    }

    /// Receiver that flips to `true` once the session is irrecoverably
    /// lost (failed refresh or explicit logout). The application watches
    /// this to redirect to its sign-in entry point.
    pub fn subscribe_logout(&self) -> watch::Receiver<bool> {
        self.logout_tx.subscribe()
    }

    /// Drop all session credentials and fire the logout signal.
    pub fn logout(&self) {
        self.tokens.clear();
        self.csrf.clear();
        let _ = self.logout_tx.send(true);
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    /// Send a request, renewing the session once if it answers 401.
    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .dispatch(&method, &url, body)
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, url))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::parse(response, &url).await;
        }

        debug!(url = %url, "Received 401, joining session refresh");
        self.refresh_session()
            .await
            .map_err(ApiError::RefreshFailed)?;

        // Replay exactly once with the renewed credentials; a second 401
        // is final.
        let retry = self
            .dispatch(&method, &url, body)
            .await
            .with_context(|| format!("Failed to resend {} request to {}", method, url))?;

        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Request unauthorized after refresh, giving up");
            return Err(ApiError::Unauthorized.into());
        }

        Self::parse(retry, &url).await
    }

    /// Build and send one request attempt with the current credentials.
    async fn dispatch<B: Serialize>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method.clone(), url);

        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token);
        }
        if Self::is_mutating(method) {
            let csrf = self.csrf.token().context("Failed to obtain CSRF token")?;
            request = request.header(CSRF_HEADER, csrf);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::Network)?;
        Ok(response)
    }

    fn is_mutating(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Check if response is successful and parse the JSON body.
    /// An empty body parses as JSON `null`, so endpoints answering 204 work
    /// with `T = ()` or an `Option`.
    async fn parse<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body).into());
        }

        let text = response.text().await.map_err(ApiError::Network)?;
        let body = if text.is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(body)
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// Join the in-flight refresh, or start one if none is running.
    ///
    /// Every caller in the same expiry episode awaits the same shared
    /// future and receives the same outcome, so one episode costs exactly
    /// one network round trip.
    async fn refresh_session(&self) -> std::result::Result<Option<String>, RefreshError> {
        let fut = {
            let mut slot = self.refresh_in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fut = Self::run_refresh(
                        self.client.clone(),
                        self.base_url.clone(),
                        self.refresh_mode,
                        Arc::clone(&self.tokens),
                        Arc::clone(&self.csrf),
                        Arc::clone(&self.logout_tx),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = fut.clone().await;

        // Whoever observes settlement first releases the slot. The ptr_eq
        // guard leaves a newer refresh started in the meantime untouched.
        let mut slot = self.refresh_in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&fut)) {
            *slot = None;
        }
        drop(slot);

        result
    }

    /// The single refresh operation. On failure the session is over:
    /// credentials are dropped and the logout signal fires before the
    /// error fans out to the waiters.
    async fn run_refresh(
        client: Client,
        base_url: String,
        mode: RefreshMode,
        tokens: Arc<TokenStore>,
        csrf: Arc<CsrfTokenStore>,
        logout_tx: Arc<watch::Sender<bool>>,
    ) -> std::result::Result<Option<String>, RefreshError> {
        match Self::call_refresh_endpoint(&client, &base_url, mode, &tokens, &csrf).await {
            Ok(new_access) => {
                debug!("Session refresh succeeded");
                Ok(new_access)
            }
            Err(reason) => {
                warn!(error = %reason, "Session refresh failed, clearing credentials");
                tokens.clear();
                csrf.clear();
                let _ = logout_tx.send(true);
                Err(RefreshError::new(reason))
            }
        }
    }

    async fn call_refresh_endpoint(
        client: &Client,
        base_url: &str,
        mode: RefreshMode,
        tokens: &TokenStore,
        csrf: &CsrfTokenStore,
    ) -> std::result::Result<Option<String>, String> {
        let url = format!("{}{}", base_url, REFRESH_PATH);

        let mut request = client.post(&url);

        // The refresh POST is a mutating request like any other.
        let csrf_token = csrf.token().map_err(|e| e.to_string())?;
        request = request.header(CSRF_HEADER, csrf_token);

        match mode {
            RefreshMode::Cookie => {
                // The refresh credential travels in the cookie jar.
            }
            RefreshMode::Body => {
                let refresh_token = tokens
                    .refresh_token()
                    .ok_or_else(|| "No refresh token held".to_string())?;
                request = request.json(&serde_json::json!({ "refreshToken": refresh_token }));
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Refresh request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body).to_string());
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse refresh response: {}", e))?;

        match (mode, parsed.access_token) {
            (_, Some(access)) => {
                tokens.set_tokens(&access, parsed.refresh_token.as_deref());
                Ok(Some(access))
            }
            // Cookie deployments may deliver the renewed credential in the
            // cookie alone.
            (RefreshMode::Cookie, None) => Ok(None),
            (RefreshMode::Body, None) => Err("Refresh response missing accessToken".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use mockito::Matcher;
    use serde_json::{json, Value};

    fn test_client(
        base_url: &str,
        mode: RefreshMode,
    ) -> (ApiClient, Arc<TokenStore>, Arc<CsrfTokenStore>) {
        let config = Config::new(base_url, mode);
        let tokens = Arc::new(TokenStore::in_memory());
        let csrf = Arc::new(CsrfTokenStore::new());
        let client = ApiClient::new(&config, tokens.clone(), csrf.clone()).unwrap();
        (client, tokens, csrf)
    }

    #[tokio::test]
    async fn test_get_parses_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings/today")
            .with_body(r#"{"kwh": 12.5}"#)
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);
        let value: Value = client.get("/readings/today").await.unwrap();

        assert_eq!(value["kwh"], 12.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mutating_requests_carry_csrf_header() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/devices")
            .match_header(
                "x-csrf-token",
                Matcher::Regex("^[0-9a-f]{64}$".to_string()),
            )
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);
        let value: Value = client
            .post("/devices", &json!({"name": "Heat pump"}))
            .await
            .unwrap();

        assert_eq!(value["id"], 7);
        created.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_requests_are_not_stamped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/devices")
            .match_header("x-csrf-token", Matcher::Missing)
            .with_body("[]")
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);
        let _: Value = client.get("/devices").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_patch_delete_are_stamped() {
        let mut server = mockito::Server::new_async().await;
        let csrf_present = Matcher::Regex("^[0-9a-f]{64}$".to_string());

        let put = server
            .mock("PUT", "/devices/7")
            .match_header("x-csrf-token", csrf_present.clone())
            .with_body("{}")
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/devices/7")
            .match_header("x-csrf-token", csrf_present.clone())
            .with_body("{}")
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/devices/7")
            .match_header("x-csrf-token", csrf_present)
            .with_status(204)
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);
        let _: Value = client.put("/devices/7", &json!({"name": "EV"})).await.unwrap();
        let _: Value = client.patch("/devices/7", &json!({"name": "EV"})).await.unwrap();
        let _: Option<Value> = client.delete("/devices/7").await.unwrap();

        put.assert_async().await;
        patch.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_401_refreshes_and_replays_once() {
        let mut server = mockito::Server::new_async().await;

        let stale = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer stale-token")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "refresh-1"})))
            .with_body(r#"{"accessToken": "fresh-token"}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer fresh-token")
            .with_body(r#"{"kwh": 42}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));

        let value: Value = client.get("/readings").await.unwrap();

        assert_eq!(value["kwh"], 42);
        assert_eq!(tokens.access_token().as_deref(), Some("fresh-token"));
        stale.assert_async().await;
        refresh.assert_async().await;
        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let mut server = mockito::Server::new_async().await;

        let _stale = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer stale-token")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", "/auth/refresh")
            .with_body(r#"{"accessToken": "fresh-token", "refreshToken": "refresh-2"}"#)
            .create_async()
            .await;
        let _fresh = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer fresh-token")
            .with_body("{}")
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));

        let _: Value = client.get("/readings").await.unwrap();

        assert_eq!(tokens.refresh_token().as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;

        let stale = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer stale-token")
            .with_status(401)
            .expect_at_least(1)
            .create_async()
            .await;
        // Delay the refresh response so every caller's 401 lands while the
        // refresh is still in flight.
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(200));
                writer.write_all(br#"{"accessToken": "fresh-token"}"#)
            })
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/readings")
            .match_header("authorization", "Bearer fresh-token")
            .with_body(r#"{"kwh": 42}"#)
            .expect(10)
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.get::<Value>("/readings").await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value["kwh"], 42);
        }

        // One expiry episode, one refresh round trip, ten replays.
        stale.assert_async().await;
        refresh.assert_async().await;
        fresh.assert_async().await;
        assert_eq!(tokens.access_token().as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn test_second_401_is_final() {
        let mut server = mockito::Server::new_async().await;

        let protected = server
            .mock("GET", "/locked")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_body(r#"{"accessToken": "fresh-token"}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));

        let err = client.get::<Value>("/locked").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Unauthorized)
        ));
        // Original attempt plus exactly one replay - never a third call.
        protected.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_ends_the_session() {
        let mut server = mockito::Server::new_async().await;

        let _protected = server
            .mock("GET", "/readings")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens, csrf) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));
        let csrf_before = csrf.token().unwrap();
        let logout_rx = client.subscribe_logout();

        let err = client.get::<Value>("/readings").await.unwrap_err();

        // The refresh failure is surfaced, not the original 401.
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::RefreshFailed(_))
        ));
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert!(*logout_rx.borrow());
        // CSRF token was dropped and regenerates as a different value.
        assert_ne!(csrf.token().unwrap(), csrf_before);
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_fans_out_to_all_waiters() {
        let mut server = mockito::Server::new_async().await;

        let _protected = server
            .mock("GET", "/readings")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(200));
                writer.write_all(b"denied")
            })
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Body);
        tokens.set_tokens("stale-token", Some("refresh-1"));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.get::<Value>("/readings").await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ApiError>(),
                Some(ApiError::RefreshFailed(_))
            ));
        }

        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_cookie_mode_refreshes_without_body_or_token() {
        let mut server = mockito::Server::new_async().await;

        let unauthenticated = server
            .mock("GET", "/profile")
            .match_header("cookie", Matcher::Missing)
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        // Refresh sets the session cookie; the response body carries no
        // access token.
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_header("set-cookie", "wattwise_session=fresh; Path=/")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let authenticated = server
            .mock("GET", "/profile")
            .match_header("cookie", Matcher::Regex("wattwise_session=fresh".to_string()))
            .with_body(r#"{"name": "Ada"}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens, _) = test_client(&server.url(), RefreshMode::Cookie);

        let profile: Value = client.get("/profile").await.unwrap();

        assert_eq!(profile["name"], "Ada");
        // Cookie mode never materializes a bearer token.
        assert_eq!(tokens.access_token(), None);
        unauthenticated.assert_async().await;
        refresh.assert_async().await;
        authenticated.assert_async().await;
    }

    #[tokio::test]
    async fn test_body_mode_without_refresh_token_fails_without_network() {
        let mut server = mockito::Server::new_async().await;

        let _protected = server
            .mock("GET", "/readings")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);

        let err = client.get::<Value>("/readings").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::RefreshFailed(_))
        ));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_auth_errors_surface_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("no such meter")
            .expect(1)
            .create_async()
            .await;

        let (client, _, _) = test_client(&server.url(), RefreshMode::Body);
        let err = client.get::<Value>("/missing").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::NotFound(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        // Nothing listens on the discard port.
        let config = Config::new("http://127.0.0.1:9", RefreshMode::Body);
        let tokens = Arc::new(TokenStore::in_memory());
        let csrf = Arc::new(CsrfTokenStore::new());
        let client = ApiClient::new(&config, tokens, csrf).unwrap();

        let err = client.get::<Value>("/anything").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_state_and_signals() {
        let (client, tokens, csrf) = test_client("http://127.0.0.1:9", RefreshMode::Body);
        tokens.set_tokens("access", Some("refresh"));
        let csrf_before = csrf.token().unwrap();
        let logout_rx = client.subscribe_logout();

        client.logout();

        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_ne!(csrf.token().unwrap(), csrf_before);
        assert!(*logout_rx.borrow());
    }
}
