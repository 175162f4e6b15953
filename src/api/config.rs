//! Public configuration endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::OptionalAuth;

/// Version embedded at compile time from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct ConfigState {
    pub environment: &'static str,
    pub access_header: Arc<str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    authenticated: bool,
    environment: &'static str,
    access_header: Arc<str>,
    version: &'static str,
}

pub fn router(state: ConfigState) -> Router {
    Router::new().route("/", get(get_config)).with_state(state)
}

async fn get_config(
    State(state): State<ConfigState>,
    OptionalAuth(principal): OptionalAuth,
) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        authenticated: principal.is_some(),
        environment: state.environment,
        access_header: state.access_header,
        version: VERSION,
    })
}
