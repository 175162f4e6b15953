//! Profile of the authenticated nutritionist.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::error::{ApiError, ResultExt};
use crate::auth::Auth;
use crate::db::{Database, Profile};

#[derive(Clone)]
pub struct MeState {
    pub db: Database,
}

#[derive(Serialize)]
struct MeResponse {
    user: Profile,
}

pub fn router(state: MeState) -> Router {
    Router::new().route("/", get(get_me)).with_state(state)
}

async fn get_me(
    State(state): State<MeState>,
    Auth(principal): Auth,
) -> Result<Json<MeResponse>, ApiError> {
    // A valid token can outlive its account.
    let user = state
        .db
        .nutritionists()
        .get_profile(&principal.id)
        .await
        .db_err("Failed to load profile")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(MeResponse { user }))
}
