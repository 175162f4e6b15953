//! Axum middleware running the authentication gate.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::errors::{ApiAuthError, AuthErrorKind};
use super::gate::{GateOutcome, Requirement, evaluate};
use super::state::AuthBackend;
use crate::jwt::unix_now;

/// Reject requests without a valid (or silently renewable) credential.
pub async fn require_auth(
    State(auth): State<AuthBackend>,
    request: Request,
    next: Next,
) -> Response {
    run_gate(&auth, Requirement::Required, request, next).await
}

/// Let anonymous requests through; authenticate those that carry a credential.
pub async fn optional_auth(
    State(auth): State<AuthBackend>,
    request: Request,
    next: Next,
) -> Response {
    run_gate(&auth, Requirement::Optional, request, next).await
}

async fn run_gate(
    auth: &AuthBackend,
    requirement: Requirement,
    mut request: Request,
    next: Next,
) -> Response {
    let now = match unix_now() {
        Ok(now) => now,
        Err(e) => {
            tracing::error!(error = %e, "Clock unavailable");
            return ApiAuthError::new(AuthErrorKind::Internal).into_response();
        }
    };

    match evaluate(
        &auth.signer,
        &auth.transport,
        request.headers(),
        requirement,
        now,
    ) {
        GateOutcome::Anonymous => next.run(request).await,
        GateOutcome::Rejected(kind) => {
            debug!(reason = ?kind, path = %request.uri().path(), "Rejected request");
            let mut response = ApiAuthError::new(kind).into_response();
            if kind == AuthErrorKind::RefreshFailed {
                auth.transport.clear(response.headers_mut());
            }
            response
        }
        GateOutcome::Authenticated { principal, renewed } => {
            if renewed.is_some() {
                debug!(sub = %principal.id, "Silently renewed session");
            }
            request.extensions_mut().insert(principal);

            let mut response = next.run(request).await;
            if let Some(pair) = renewed {
                auth.transport.write_pair(response.headers_mut(), &pair);
            }
            response
        }
    }
}
