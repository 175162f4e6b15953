//! Shared authentication backend handed to middleware and handlers.

use std::sync::Arc;

use super::transport::SessionTransport;
use crate::jwt::TokenSigner;

/// Signer and transport, built once at startup. Cheap to clone.
#[derive(Clone)]
pub struct AuthBackend {
    pub signer: Arc<TokenSigner>,
    pub transport: Arc<SessionTransport>,
}

impl AuthBackend {
    pub fn new(signer: TokenSigner, transport: SessionTransport) -> Self {
        Self {
            signer: Arc::new(signer),
            transport: Arc::new(transport),
        }
    }
}
