//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::jwt::JwtError;

/// Internal reason a request failed authentication. Logged, never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    MissingCredential,
    MalformedCredential,
    InvalidSignature,
    ExpiredCredential,
    RefreshFailed,
    /// Clock or signing failure on our side
    Internal,
}

impl From<&JwtError> for AuthErrorKind {
    fn from(err: &JwtError) -> Self {
        match err {
            JwtError::Malformed => AuthErrorKind::MalformedCredential,
            JwtError::InvalidSignature => AuthErrorKind::InvalidSignature,
            JwtError::Expired => AuthErrorKind::ExpiredCredential,
            JwtError::Encoding(_) | JwtError::TimeError => AuthErrorKind::Internal,
        }
    }
}

/// API authentication error. Every credential failure renders the same 401.
#[derive(Debug)]
pub struct ApiAuthError {
    kind: AuthErrorKind,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let (status, error) = match self.kind {
            AuthErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
            _ => (StatusCode::UNAUTHORIZED, "Not authenticated"),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(kind: AuthErrorKind) -> (StatusCode, String) {
        let response = ApiAuthError::new(kind).into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_credential_failures_are_indistinguishable() {
        let expected = body_of(AuthErrorKind::MissingCredential).await;
        assert_eq!(expected.0, StatusCode::UNAUTHORIZED);

        for kind in [
            AuthErrorKind::MalformedCredential,
            AuthErrorKind::InvalidSignature,
            AuthErrorKind::ExpiredCredential,
            AuthErrorKind::RefreshFailed,
        ] {
            assert_eq!(body_of(kind).await, expected, "{:?} leaked", kind);
        }
    }

    #[tokio::test]
    async fn test_internal_is_server_error() {
        let (status, _) = body_of(AuthErrorKind::Internal).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
