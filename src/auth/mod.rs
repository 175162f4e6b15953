//! Stateless JWT authentication.
//!
//! Dual-token system: short-lived access tokens sent as bearer credentials,
//! long-lived refresh tokens kept in an HttpOnly cookie. An expired access
//! token is renewed inside the same request when the refresh cookie is valid;
//! the new access token comes back in a response header.

mod errors;
mod extractors;
mod gate;
mod ip;
mod middleware;
mod state;
mod transport;

pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{Auth, OptionalAuth};
pub use gate::{GateOutcome, Requirement, bearer_token, evaluate};
pub use ip::{HasHeadersAndExtensions, IpSource, extract_client_ip};
pub use middleware::{optional_auth, require_auth};
pub use state::AuthBackend;
pub use transport::{
    DEFAULT_ACCESS_HEADER_NAME, DEFAULT_REFRESH_COOKIE_NAME, SessionTransport, get_cookie,
};
