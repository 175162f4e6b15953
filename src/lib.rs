pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::create_api_router;
use auth::{AuthBackend, IpSource, SessionTransport};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, Method, header},
    routing::get,
};
use cli::Environment;
use db::Database;
use jwt::TokenSigner;
use rate_limit::{RateLimitConfig, RateLimits};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Production turns on `Secure; SameSite=None` for the refresh cookie
    pub environment: Environment,
    pub refresh_cookie_name: String,
    /// Response header carrying a freshly issued access token
    pub access_header_name: HeaderName,
    /// Allowed CORS origins. Empty mirrors the request origin.
    pub cors_origins: Vec<String>,
    /// IP extraction strategy for rate limiting
    pub ip_source: IpSource,
    pub rate_limits: RateLimits,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    env: &'static str,
}

async fn health(State(environment): State<Environment>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        env: environment.as_str(),
    })
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = if config.cors_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    // Credentials rule out wildcards, so methods and headers are explicit.
    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
        ]))
        .expose_headers([config.access_header_name.clone()])
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let rate_limit_config = Arc::new(RateLimitConfig::new(config.rate_limits, config.ip_source));
    build_app(config, rate_limit_config)
}

fn build_app(config: &ServerConfig, rate_limit_config: Arc<RateLimitConfig>) -> Router {
    let signer = TokenSigner::with_ttls(
        &config.access_secret,
        &config.refresh_secret,
        config.access_ttl,
        config.refresh_ttl,
    );
    let transport = SessionTransport::new(
        config.refresh_cookie_name.clone(),
        config.access_header_name.clone(),
        config.environment.is_production(),
        config.refresh_ttl,
    );
    let auth = AuthBackend::new(signer, transport);

    let api_router = create_api_router(
        config.db.clone(),
        auth,
        rate_limit_config,
        config.environment,
    )
    .route("/health", get(health).with_state(config.environment));

    Router::new()
        .route("/health", get(health).with_state(config.environment))
        .nest("/api", api_router)
        .layer(build_cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let rate_limit_config = Arc::new(RateLimitConfig::new(config.rate_limits, config.ip_source));
    rate_limit::spawn_pruning_scheduler(rate_limit_config.clone(), rate_limit::PRUNE_INTERVAL);

    let app = build_app(&config, rate_limit_config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
