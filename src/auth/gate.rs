//! Per-request authentication decision.
//!
//! Stages run in order and each either settles the outcome or hands over to
//! the next one:
//!
//! 1. no bearer token: anonymous, or rejected when authentication is required
//! 2. bearer token verifies as an access token: authenticated
//! 3. otherwise silent renewal from the refresh cookie: authenticated with a
//!    freshly issued pair, or rejected
//!
//! Everything here is a pure function of the headers, the signer and `now`.

use axum::http::{HeaderMap, header};

use super::errors::AuthErrorKind;
use super::transport::SessionTransport;
use crate::jwt::{Principal, TokenPair, TokenSigner};

/// Whether a route needs an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// `renewed` is set when the access token was replaced during this request.
    Authenticated {
        principal: Principal,
        renewed: Option<TokenPair>,
    },
    Anonymous,
    Rejected(AuthErrorKind),
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

pub fn evaluate(
    signer: &TokenSigner,
    transport: &SessionTransport,
    headers: &HeaderMap,
    requirement: Requirement,
    now: u64,
) -> GateOutcome {
    let Some(access) = bearer_token(headers) else {
        return match requirement {
            Requirement::Required => GateOutcome::Rejected(AuthErrorKind::MissingCredential),
            Requirement::Optional => GateOutcome::Anonymous,
        };
    };

    match signer.verify_access_at(access, now) {
        Ok(claims) => GateOutcome::Authenticated {
            principal: claims.principal(),
            renewed: None,
        },
        Err(e) => renew(signer, transport, headers, now, AuthErrorKind::from(&e)),
    }
}

fn renew(
    signer: &TokenSigner,
    transport: &SessionTransport,
    headers: &HeaderMap,
    now: u64,
    access_failure: AuthErrorKind,
) -> GateOutcome {
    let Some(refresh) = transport.read_refresh(headers) else {
        return GateOutcome::Rejected(access_failure);
    };

    let claims = match signer.verify_refresh_at(refresh, now) {
        Ok(claims) => claims,
        Err(_) => return GateOutcome::Rejected(AuthErrorKind::RefreshFailed),
    };

    let principal = claims.principal();
    match signer.issue_at(&principal, now) {
        Ok(pair) => GateOutcome::Authenticated {
            principal,
            renewed: Some(pair),
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue renewed tokens");
            GateOutcome::Rejected(AuthErrorKind::Internal)
        }
    }
}
