mod auth;
mod config;
mod error;
mod me;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::auth::{AuthBackend, optional_auth, require_auth};
use crate::cli::Environment;
use crate::db::Database;
use crate::password::PasswordHasher;
use crate::rate_limit::RateLimitConfig;

pub use auth::AuthApiState;
pub use error::{ApiError, FieldIssue};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    auth: AuthBackend,
    rate_limit_config: Arc<RateLimitConfig>,
    environment: Environment,
) -> Router {
    let auth_state = AuthApiState {
        db: db.clone(),
        auth: auth.clone(),
        hasher: PasswordHasher::new(),
    };

    let me_state = me::MeState { db };

    let config_state = config::ConfigState {
        environment: environment.as_str(),
        access_header: Arc::from(auth.transport.access_header().as_str()),
    };

    let me_router = me::router(me_state)
        .layer(middleware::from_fn_with_state(auth.clone(), require_auth));

    let config_router = config::router(config_state)
        .layer(middleware::from_fn_with_state(auth, optional_auth));

    Router::new()
        .nest("/auth", auth::router(auth_state, rate_limit_config))
        .nest("/me", me_router)
        .nest("/config", config_router)
}
