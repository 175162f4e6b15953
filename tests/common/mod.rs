#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderName, Request, Response, StatusCode, header},
};
use nutricrm::{
    ServerConfig,
    auth::{DEFAULT_ACCESS_HEADER_NAME, DEFAULT_REFRESH_COOKIE_NAME, IpSource},
    cli::Environment,
    create_app,
    db::Database,
    jwt::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL, TokenSigner},
    rate_limit::RateLimits,
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-that-is-long-enough";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-that-is-long-enough";
pub const PASSWORD: &str = "correct-horse-battery";
pub const CLIENT_IP: &str = "203.0.113.10";

/// Limits high enough that no test trips them by accident.
pub fn relaxed_limits() -> RateLimits {
    RateLimits {
        login_per_second: 1000,
        login_burst: 1000,
        register_per_minute: 1000,
    }
}

pub async fn test_config(environment: Environment, rate_limits: RateLimits) -> ServerConfig {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        access_ttl: DEFAULT_ACCESS_TTL,
        refresh_ttl: DEFAULT_REFRESH_TTL,
        environment,
        refresh_cookie_name: DEFAULT_REFRESH_COOKIE_NAME.to_string(),
        access_header_name: HeaderName::from_static(DEFAULT_ACCESS_HEADER_NAME),
        cors_origins: Vec::new(),
        ip_source: IpSource::ForwardedFor,
        rate_limits,
    }
}

pub async fn create_test_app() -> Router {
    create_app(&test_config(Environment::Development, relaxed_limits()).await)
}

/// Signer sharing the app's secrets, for minting tokens at arbitrary times.
pub fn signer() -> TokenSigner {
    TokenSigner::new(ACCESS_SECRET, REFRESH_SECRET)
}

pub fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Value of the refresh cookie set by the response, if any.
pub fn refresh_cookie(response: &Response<Body>) -> Option<String> {
    set_cookie_header(response).and_then(|cookie| {
        cookie
            .split(';')
            .next()?
            .strip_prefix(&format!("{}=", DEFAULT_REFRESH_COOKIE_NAME))
            .map(str::to_string)
    })
}

/// Raw refresh cookie `Set-Cookie` header, if any.
pub fn set_cookie_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", DEFAULT_REFRESH_COOKIE_NAME)))
        .map(str::to_string)
}

pub fn access_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(DEFAULT_ACCESS_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub struct Session {
    pub id: String,
    pub access: String,
    pub refresh: String,
}

/// Register an account and return its session.
pub async fn register(app: &Router, email: &str) -> Session {
    let response = send(
        app,
        json_post(
            "/api/auth/register",
            json!({ "name": "Ana Souza", "email": email, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let refresh = refresh_cookie(&response).expect("register sets the refresh cookie");
    let body = body_json(response).await;
    Session {
        id: body["user"]["id"].as_str().unwrap().to_string(),
        access: body["tokens"]["accessToken"].as_str().unwrap().to_string(),
        refresh,
    }
}

/// GET `/api/me` with an optional bearer token and refresh cookie.
pub fn me_request(access: Option<&str>, refresh: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/me");
    if let Some(access) = access {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", access));
    }
    if let Some(refresh) = refresh {
        builder = builder.header(
            header::COOKIE,
            format!("{}={}", DEFAULT_REFRESH_COOKIE_NAME, refresh),
        );
    }
    builder.body(Body::empty()).unwrap()
}
