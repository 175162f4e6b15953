//! Client-side session handling.
//!
//! `ClientSessionManager` wraps any HTTP `tower::Service` and keeps the
//! session alive across access token expiry:
//!
//! - the access token lives only in memory and is sent as a bearer token
//! - the refresh cookie sits in a private slot and is replayed on every
//!   request, like a browser does with an HttpOnly cookie
//! - an access token in a response header replaces the stored one
//! - on 401 every concurrently failing request waits on the same renewal,
//!   then retries once
//!
//! Every change to the access token bumps a generation counter. A renewal is
//! keyed by the generation it replaces, so requests sent with an already
//! superseded token retry straight away instead of renewing again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, header,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tower::{Service, ServiceExt};
use tracing::{debug, warn};

use crate::auth::{DEFAULT_ACCESS_HEADER_NAME, DEFAULT_REFRESH_COOKIE_NAME};

/// Default upper bound for one renewal call.
pub const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Prefix for every request path, e.g. `https://crm.example.com`
    pub base_url: String,
    pub refresh_path: String,
    pub login_path: String,
    pub register_path: String,
    pub logout_path: String,
    pub refresh_cookie_name: String,
    pub access_header: HeaderName,
    pub renewal_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            refresh_path: "/api/auth/refresh".to_string(),
            login_path: "/api/auth/login".to_string(),
            register_path: "/api/auth/register".to_string(),
            logout_path: "/api/auth/logout".to_string(),
            refresh_cookie_name: DEFAULT_REFRESH_COOKIE_NAME.to_string(),
            access_header: HeaderName::from_static(DEFAULT_ACCESS_HEADER_NAME),
            renewal_timeout: DEFAULT_RENEWAL_TIMEOUT,
        }
    }
}

/// Errors surfaced to callers of the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Renewal failed or timed out; the user has to log in again
    SessionExpired,
    /// The request could not be built
    InvalidRequest(String),
    /// The underlying service failed
    Transport(String),
    /// The response body could not be read or decoded
    Decode(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::SessionExpired => write!(f, "Session expired"),
            ClientError::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            ClientError::Transport(e) => write!(f, "Transport error: {}", e),
            ClientError::Decode(e) => write!(f, "Failed to decode response: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// A request that can be sent (and re-sent) by the session manager.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    method: Method,
    path: String,
    body: Option<Bytes>,
    renew_on_unauthorized: bool,
}

impl ClientRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            renew_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ClientError> {
        let bytes =
            serde_json::to_vec(body).map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Return a 401 as is instead of renewing. Used for credential endpoints.
    pub fn without_renewal(mut self) -> Self {
        self.renew_on_unauthorized = false;
        self
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ClientResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[derive(Default)]
struct Credentials {
    access: Option<String>,
    /// Never handed out to callers.
    refresh_cookie: Option<String>,
    generation: u64,
}

impl Credentials {
    fn set_access(&mut self, access: Option<String>) {
        if self.access != access {
            self.access = access;
            self.generation += 1;
        }
    }
}

type RenewalFuture = Shared<BoxFuture<'static, Result<(), ClientError>>>;

struct InFlight {
    generation: u64,
    future: RenewalFuture,
}

struct Inner<S> {
    service: S,
    config: ClientConfig,
    credentials: Mutex<Credentials>,
    renewal: Mutex<Option<InFlight>>,
}

/// Keeps one session alive on top of an HTTP service. Cheap to clone; clones
/// share the session.
pub struct ClientSessionManager<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ClientSessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> ClientSessionManager<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: fmt::Display,
{
    pub fn new(service: S) -> Self {
        Self::with_config(service, ClientConfig::default())
    }

    pub fn with_config(service: S, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                config,
                credentials: Mutex::new(Credentials::default()),
                renewal: Mutex::new(None),
            }),
        }
    }

    /// The access token currently held in memory.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.credentials.lock().await.access.clone()
    }

    /// Forget the in-memory access token, as a page reload would. The refresh
    /// cookie is kept, so the next 401 renews the session.
    pub async fn clear_access_token(&self) {
        self.inner.credentials.lock().await.set_access(None);
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<ClientResponse, ClientError> {
        let request = ClientRequest::post(self.inner.config.login_path.clone())
            .json(&serde_json::json!({ "email": email, "password": password }))?
            .without_renewal();
        self.send(request).await
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<ClientResponse, ClientError> {
        let request = ClientRequest::post(self.inner.config.register_path.clone())
            .json(&serde_json::json!({ "name": name, "email": email, "password": password }))?
            .without_renewal();
        self.send(request).await
    }

    /// Ask the server to clear the refresh cookie and forget the access token.
    pub async fn logout(&self) -> Result<ClientResponse, ClientError> {
        let request =
            ClientRequest::post(self.inner.config.logout_path.clone()).without_renewal();
        let response = self.send(request).await;
        self.clear_access_token().await;
        response
    }

    /// Send a request, renewing the session once if it comes back 401.
    pub async fn send(&self, request: ClientRequest) -> Result<ClientResponse, ClientError> {
        let (response, sent_generation) = self.inner.dispatch(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED || !request.renew_on_unauthorized {
            return Ok(response);
        }

        debug!(path = %request.path, "Unauthorized, renewing session");
        self.renew(sent_generation).await?;

        let (response, _) = self.inner.dispatch(&request).await?;
        Ok(response)
    }

    /// Join the in-flight renewal replacing `sent_generation`, or start one.
    /// A finished renewal is never joined, so a failure does not stick.
    async fn renew(&self, sent_generation: u64) -> Result<(), ClientError> {
        let future = {
            let mut slot = self.inner.renewal.lock().await;
            let current = self.inner.credentials.lock().await.generation;

            let joined = slot
                .as_ref()
                .filter(|in_flight| {
                    in_flight.generation == sent_generation && in_flight.future.peek().is_none()
                })
                .map(|in_flight| in_flight.future.clone());

            if let Some(future) = joined {
                future
            } else if current != sent_generation {
                // Someone already replaced the token this request was sent with.
                return Ok(());
            } else {
                let inner = self.inner.clone();
                let future = async move { inner.refresh().await }.boxed().shared();
                *slot = Some(InFlight {
                    generation: current,
                    future: future.clone(),
                });
                future
            }
        };
        future.await
    }
}

impl<S> Inner<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: fmt::Display,
{
    /// Attach credentials, send, and absorb credentials from the response.
    /// Returns the generation of the access token that was sent.
    async fn dispatch(
        &self,
        request: &ClientRequest,
    ) -> Result<(ClientResponse, u64), ClientError> {
        let (access, cookie, generation) = {
            let credentials = self.credentials.lock().await;
            (
                credentials.access.clone(),
                credentials.refresh_cookie.clone(),
                credentials.generation,
            )
        };

        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(format!("{}{}", self.config.base_url, request.path));
        if let Some(access) = access {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", access));
        }
        if let Some(cookie) = cookie {
            builder = builder.header(
                header::COOKIE,
                format!("{}={}", self.config.refresh_cookie_name, cookie),
            );
        }
        let body = match &request.body {
            Some(bytes) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(bytes.clone())
            }
            None => Body::empty(),
        };
        let http_request = builder
            .body(body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        let response = self
            .service
            .clone()
            .oneshot(http_request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        self.absorb(&parts.headers).await;

        Ok((
            ClientResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            },
            generation,
        ))
    }

    /// Pick up a renewed access token and refresh cookie changes.
    async fn absorb(&self, headers: &HeaderMap) {
        let access = headers
            .get(&self.config.access_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let cookie = refresh_cookie_update(headers, &self.config.refresh_cookie_name);

        if access.is_none() && cookie.is_none() {
            return;
        }

        let mut credentials = self.credentials.lock().await;
        if let Some(access) = access {
            credentials.set_access(Some(access));
        }
        if let Some(cookie) = cookie {
            credentials.refresh_cookie = cookie;
        }
    }

    /// One renewal call. Shared by every request waiting on it.
    async fn refresh(self: Arc<Self>) -> Result<(), ClientError> {
        let request = ClientRequest::post(self.config.refresh_path.clone());
        let outcome =
            tokio::time::timeout(self.config.renewal_timeout, self.dispatch(&request)).await;

        let failure = match outcome {
            Ok(Ok((response, _))) if response.status.is_success() => {
                debug!("Session renewed");
                return Ok(());
            }
            Ok(Ok((response, _))) => format!("refresh rejected with {}", response.status),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "refresh timed out".to_string(),
        };

        warn!(reason = %failure, "Session renewal failed");
        self.credentials.lock().await.set_access(None);
        Err(ClientError::SessionExpired)
    }
}

/// `Some(None)` when the server cleared the cookie, `Some(Some(v))` when it
/// set a new value, `None` when the response does not touch it.
fn refresh_cookie_update(headers: &HeaderMap, name: &str) -> Option<Option<String>> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(parse_set_cookie)
        .filter(|(cookie_name, _, _)| cookie_name == name)
        .last()
        .map(|(_, value, expired)| (!expired && !value.is_empty()).then_some(value))
}

fn parse_set_cookie(value: &HeaderValue) -> Option<(String, String, bool)> {
    let value = value.to_str().ok()?;
    let mut parts = value.split(';');
    let (name, cookie_value) = parts.next()?.trim().split_once('=')?;
    let expired = parts.any(|attr| attr.trim().eq_ignore_ascii_case("max-age=0"));
    Some((name.to_string(), cookie_value.to_string(), expired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        extract::State,
        http::HeaderMap,
        response::IntoResponse,
        routing::{get, post},
    };
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct MockState {
        refresh_calls: Arc<AtomicUsize>,
        refresh_ok: bool,
        refresh_delay: Duration,
        /// Only the first refresh call is delayed.
        delay_first_only: bool,
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    async fn mock_login() -> impl IntoResponse {
        (
            [
                (header::SET_COOKIE, "refreshToken=r1; HttpOnly; Path=/; Max-Age=600"),
                (HeaderName::from_static("x-access-token"), "stale"),
            ],
            "{}",
        )
    }

    async fn mock_refresh(State(state): State<MockState>, headers: HeaderMap) -> impl IntoResponse {
        let call = state.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 || !state.delay_first_only {
            tokio::time::sleep(state.refresh_delay).await;
        }

        let has_cookie = crate::auth::get_cookie(&headers, "refreshToken") == Some("r1");
        if !state.refresh_ok || !has_cookie {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        (
            [
                (header::SET_COOKIE, "refreshToken=r1; HttpOnly; Path=/; Max-Age=600"),
                (HeaderName::from_static("x-access-token"), "fresh"),
            ],
            "{}",
        )
            .into_response()
    }

    async fn mock_logout() -> impl IntoResponse {
        (
            StatusCode::NO_CONTENT,
            [(header::SET_COOKIE, "refreshToken=; HttpOnly; Path=/; Max-Age=0")],
        )
    }

    async fn mock_data(headers: HeaderMap) -> StatusCode {
        match bearer(&headers) {
            Some("fresh") => StatusCode::OK,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    async fn mock_rotating() -> impl IntoResponse {
        [(HeaderName::from_static("x-access-token"), "rotated")]
    }

    fn mock_server(refresh_ok: bool, refresh_delay: Duration) -> (Router, Arc<AtomicUsize>) {
        mock_server_with(MockState {
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            refresh_ok,
            refresh_delay,
            delay_first_only: false,
        })
    }

    fn mock_server_with(state: MockState) -> (Router, Arc<AtomicUsize>) {
        let refresh_calls = state.refresh_calls.clone();
        let router = Router::new()
            .route("/api/auth/login", post(mock_login))
            .route("/api/auth/refresh", post(mock_refresh))
            .route("/api/auth/logout", post(mock_logout))
            .route("/api/data", get(mock_data))
            .route("/api/rotating", get(mock_rotating))
            .with_state(state);
        (router, refresh_calls)
    }

    async fn logged_in(router: Router, config: ClientConfig) -> ClientSessionManager<Router> {
        let client = ClientSessionManager::with_config(router, config);
        let response = client.login("a@example.com", "password123").await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(client.access_token().await.as_deref(), Some("stale"));
        client
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_renewal() {
        let (router, refresh_calls) = mock_server(true, Duration::from_millis(50));
        let client = logged_in(router, ClientConfig::default()).await;

        let responses =
            join_all((0..5).map(|_| client.send(ClientRequest::get("/api/data")))).await;

        for response in responses {
            assert_eq!(response.unwrap().status, StatusCode::OK);
        }
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.access_token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_superseded_token_retries_without_renewal() {
        let (router, refresh_calls) = mock_server(true, Duration::ZERO);
        let client = logged_in(router, ClientConfig::default()).await;

        assert_eq!(
            client.send(ClientRequest::get("/api/data")).await.unwrap().status,
            StatusCode::OK
        );
        // Both generations were replaced already, so neither renews again.
        client.renew(1).await.unwrap();
        client.renew(0).await.unwrap();
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_renewal_expires_session() {
        let (router, refresh_calls) = mock_server(false, Duration::from_millis(20));
        let client = logged_in(router, ClientConfig::default()).await;

        let results = join_all((0..3).map(|_| client.send(ClientRequest::get("/api/data")))).await;

        for result in results {
            assert_eq!(result.unwrap_err(), ClientError::SessionExpired);
        }
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.access_token().await, None);
    }

    #[tokio::test]
    async fn test_renewal_timeout_expires_session() {
        let (router, _) = mock_server(true, Duration::from_millis(500));
        let config = ClientConfig {
            renewal_timeout: Duration::from_millis(20),
            ..ClientConfig::default()
        };
        let client = logged_in(router, config).await;

        let result = client.send(ClientRequest::get("/api/data")).await;
        assert_eq!(result.unwrap_err(), ClientError::SessionExpired);
        assert_eq!(client.access_token().await, None);
    }

    #[tokio::test]
    async fn test_timed_out_renewal_is_retried_on_next_unauthorized() {
        let (router, refresh_calls) = mock_server_with(MockState {
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            refresh_ok: true,
            refresh_delay: Duration::from_millis(500),
            delay_first_only: true,
        });
        let config = ClientConfig {
            renewal_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let client = logged_in(router, config).await;
        // After a reload only the cookie is left; the failed renewal below
        // leaves the generation unchanged.
        client.clear_access_token().await;

        let first = client.send(ClientRequest::get("/api/data")).await;
        assert_eq!(first.unwrap_err(), ClientError::SessionExpired);
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);

        let second = client.send(ClientRequest::get("/api/data")).await.unwrap();
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.access_token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_rejected_renewal_is_retried_after_reload() {
        let (router, refresh_calls) = mock_server(false, Duration::ZERO);
        let client = logged_in(router, ClientConfig::default()).await;
        client.clear_access_token().await;

        for expected_calls in 1..=2 {
            let result = client.send(ClientRequest::get("/api/data")).await;
            assert_eq!(result.unwrap_err(), ClientError::SessionExpired);
            assert_eq!(refresh_calls.load(Ordering::SeqCst), expected_calls);
        }
    }

    #[tokio::test]
    async fn test_unauthorized_without_renewal_is_returned() {
        let (router, refresh_calls) = mock_server(true, Duration::ZERO);
        let client = ClientSessionManager::new(router);

        let response = client
            .send(ClientRequest::get("/api/data").without_renewal())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_response_header_replaces_token() {
        let (router, _) = mock_server(true, Duration::ZERO);
        let client = logged_in(router, ClientConfig::default()).await;

        client.send(ClientRequest::get("/api/rotating")).await.unwrap();
        assert_eq!(client.access_token().await.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_slot() {
        let (router, refresh_calls) = mock_server(true, Duration::ZERO);
        let client = logged_in(router, ClientConfig::default()).await;

        client.logout().await.unwrap();
        assert_eq!(client.access_token().await, None);

        // The mock only renews when the cookie is replayed.
        let result = client.send(ClientRequest::get("/api/data")).await;
        assert_eq!(result.unwrap_err(), ClientError::SessionExpired);
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refresh_cookie_update() {
        let mut headers = HeaderMap::new();
        assert_eq!(refresh_cookie_update(&headers, "refreshToken"), None);

        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("other=x; Path=/"),
        );
        assert_eq!(refresh_cookie_update(&headers, "refreshToken"), None);

        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("refreshToken=abc; HttpOnly; Max-Age=60"),
        );
        assert_eq!(
            refresh_cookie_update(&headers, "refreshToken"),
            Some(Some("abc".to_string()))
        );

        let mut cleared = HeaderMap::new();
        cleared.append(
            header::SET_COOKIE,
            HeaderValue::from_static("refreshToken=; HttpOnly; Max-Age=0"),
        );
        assert_eq!(refresh_cookie_update(&cleared, "refreshToken"), Some(None));
    }
}
