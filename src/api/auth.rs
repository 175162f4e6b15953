//! Account and session endpoints.
//!
//! - POST `/register` - Create an account and start a session
//! - POST `/login` - Start a session with email and password
//! - POST `/refresh` - Exchange a refresh token for a new pair
//! - POST `/logout` - Clear the refresh cookie

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use super::error::{ApiError, ResultExt};
use crate::auth::AuthBackend;
use crate::db::{Database, NewNutritionist, Nutritionist, NutritionistStore, Role};
use crate::jwt::{Principal, TokenPair};
use crate::password::PasswordHasher;
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};

#[derive(Clone)]
pub struct AuthApiState {
    pub db: Database,
    pub auth: AuthBackend,
    pub hasher: PasswordHasher,
}

pub fn router(state: AuthApiState, rate_limit_config: Arc<RateLimitConfig>) -> Router {
    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config.clone(),
            rate_limit_register,
        ));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config,
            rate_limit_login,
        ));

    let session_router = Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state);

    Router::new()
        .merge(register_router)
        .merge(login_router)
        .merge(session_router)
}

#[derive(Deserialize, Validate)]
struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 2, max = 120, message = "Name must have 2 to 120 characters"))]
    name: String,
    #[serde(default)]
    #[validate(email(message = "Must be a valid email address"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 8, max = 256, message = "Password must have 8 to 256 characters"))]
    password: String,
}

#[derive(Deserialize, Validate)]
struct LoginRequest {
    #[serde(default)]
    #[validate(email(message = "Must be a valid email address"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 8, message = "Password must have at least 8 characters"))]
    password: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct UserInfo {
    id: String,
    name: String,
    email: String,
    role: Role,
}

impl From<Nutritionist> for UserInfo {
    fn from(n: Nutritionist) -> Self {
        Self {
            id: n.id,
            name: n.name,
            email: n.email,
            role: n.role,
        }
    }
}

#[derive(Serialize)]
struct SessionResponse {
    user: UserInfo,
    tokens: TokenPair,
}

#[derive(Serialize)]
struct TokensResponse {
    tokens: TokenPair,
}

/// Issue a pair and put it on the response headers.
fn start_session(
    auth: &AuthBackend,
    principal: &Principal,
) -> Result<(HeaderMap, TokenPair), ApiError> {
    let pair = auth
        .signer
        .issue(principal)
        .hash_err("Failed to generate token")?;
    let mut headers = HeaderMap::new();
    auth.transport.write_pair(&mut headers, &pair);
    Ok((headers, pair))
}

async fn register(
    State(state): State<AuthApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    payload.name = payload.name.trim().to_string();
    payload.email = payload.email.trim().to_string();
    payload.validate()?;
    let (name, email) = (payload.name.as_str(), payload.email.as_str());

    let store = state.db.nutritionists();
    if store
        .email_exists(email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::duplicate_email());
    }

    let password_hash = state
        .hasher
        .hash(&payload.password)
        .await
        .hash_err("Failed to hash password")?;

    let account = Nutritionist {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        password_hash,
        role: Role::Nutritionist,
    };

    store
        .create(&NewNutritionist {
            id: &account.id,
            name: &account.name,
            email: &account.email,
            password_hash: &account.password_hash,
            role: account.role,
        })
        .await
        .map_err(|e| {
            // Lost a race with a concurrent registration of the same email.
            if NutritionistStore::is_duplicate(&e) {
                ApiError::duplicate_email()
            } else {
                ApiError::db_error("Failed to create account", e)
            }
        })?;

    let principal = Principal {
        id: account.id.clone(),
        role: account.role,
    };
    let (headers, tokens) = start_session(&state.auth, &principal)?;
    info!(id = %account.id, "Registered nutritionist");

    Ok((
        StatusCode::CREATED,
        headers,
        Json(SessionResponse {
            user: account.into(),
            tokens,
        }),
    ))
}

async fn login(
    State(state): State<AuthApiState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    payload.email = payload.email.trim().to_string();
    payload.validate()?;
    let email = payload.email.as_str();

    let account = state
        .db
        .nutritionists()
        .get_by_email(email)
        .await
        .db_err("Failed to look up account")?;

    let Some(account) = account else {
        state
            .hasher
            .verify_dummy(&payload.password)
            .await
            .hash_err("Failed to verify password")?;
        return Err(ApiError::invalid_credentials());
    };

    let matches = state
        .hasher
        .verify(&payload.password, &account.password_hash)
        .await
        .hash_err("Failed to verify password")?;
    if !matches {
        return Err(ApiError::invalid_credentials());
    }

    let principal = Principal {
        id: account.id.clone(),
        role: account.role,
    };
    let (headers, tokens) = start_session(&state.auth, &principal)?;

    Ok((
        StatusCode::OK,
        headers,
        Json(SessionResponse {
            user: account.into(),
            tokens,
        }),
    ))
}

/// Reissue both tokens. The cookie wins over the body field; the old refresh
/// token stays valid until it expires on its own.
async fn refresh(
    State(state): State<AuthApiState>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let from_body = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice::<RefreshRequest>(&body).unwrap_or_default()
    };

    let refresh_token = state
        .auth
        .transport
        .read_refresh(&request_headers)
        .map(str::to_string)
        .or(from_body.refresh_token.filter(|t| !t.is_empty()))
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let claims = state
        .auth
        .signer
        .verify_refresh(&refresh_token)
        .map_err(|e| {
            tracing::debug!(error = %e, "Refresh rejected");
            ApiError::unauthorized("Invalid refresh token")
        })?;

    let (headers, tokens) = start_session(&state.auth, &claims.principal())?;
    Ok((StatusCode::OK, headers, Json(TokensResponse { tokens })))
}

/// Clear the refresh cookie. Tokens already issued stay valid until expiry.
async fn logout(State(state): State<AuthApiState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    state.auth.transport.clear(&mut headers);
    (StatusCode::NO_CONTENT, headers)
}
