//! JWT token generation and validation.
//!
//! Access and refresh tokens carry the same claims but are signed with two
//! independent secrets, so a token of one kind can never pass as the other.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::db::Role;

/// Algorithm used for both token kinds. Never read from the token header.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Default access token duration: 15 minutes
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token duration: 7 days
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The authenticated identity carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

/// JWT claims shared by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (nutritionist UUID)
    pub sub: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.sub.clone(),
            role: self.role,
        }
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    fn sign(&self, principal: &Principal, now: u64) -> Result<String, JwtError> {
        let claims = Claims {
            sub: principal.id.clone(),
            role: principal.role,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding)
            .map_err(JwtError::Encoding)
    }

    fn verify(&self, token: &str, now: u64) -> Result<Claims, JwtError> {
        // Expiry is checked below against the caller's clock with `now >= exp`.
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(JwtError::from_decode)?;

        if now >= data.claims.exp {
            return Err(JwtError::Expired);
        }
        Ok(data.claims)
    }
}

/// Signs and verifies access and refresh tokens.
#[derive(Clone)]
pub struct TokenSigner {
    access: KeyPair,
    refresh: KeyPair,
}

impl TokenSigner {
    /// Create a signer with the default TTLs (15 minutes / 7 days).
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self::with_ttls(
            access_secret,
            refresh_secret,
            DEFAULT_ACCESS_TTL,
            DEFAULT_REFRESH_TTL,
        )
    }

    pub fn with_ttls(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access: KeyPair::new(access_secret, access_ttl),
            refresh: KeyPair::new(refresh_secret, refresh_ttl),
        }
    }

    /// Issue a new access/refresh pair for the principal.
    pub fn issue(&self, principal: &Principal) -> Result<TokenPair, JwtError> {
        self.issue_at(principal, unix_now()?)
    }

    /// Issue a pair as if the current time were `now` (Unix seconds).
    pub fn issue_at(&self, principal: &Principal, now: u64) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access_token: self.access.sign(principal, now)?,
            refresh_token: self.refresh.sign(principal, now)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_access_at(token, unix_now()?)
    }

    pub fn verify_access_at(&self, token: &str, now: u64) -> Result<Claims, JwtError> {
        self.access.verify(token, now)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_refresh_at(token, unix_now()?)
    }

    pub fn verify_refresh_at(&self, token: &str, now: u64) -> Result<Claims, JwtError> {
        self.refresh.verify(token, now)
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Token is structurally invalid or its claims do not parse
    Malformed,
    /// Signature does not verify, or the header names another algorithm
    InvalidSignature,
    /// `now >= exp`
    Expired,
    /// System time error
    TimeError,
}

impl JwtError {
    fn from_decode(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => JwtError::InvalidSignature,
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Malformed,
        }
    }
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Malformed => write!(f, "Malformed token"),
            JwtError::InvalidSignature => write!(f, "Invalid token signature"),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}
