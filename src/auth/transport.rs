//! Session transport: refresh token in an HttpOnly cookie, access token in a
//! response header readable by client script.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::jwt::TokenPair;

/// Default name of the refresh token cookie.
pub const DEFAULT_REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Default name of the response header carrying a new access token.
pub const DEFAULT_ACCESS_HEADER_NAME: &str = "x-access-token";

/// Extract a cookie value from the Cookie header(s).
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    return Some(value.trim());
                }
            }
        }
    }
    None
}

/// Writes and reads session credentials on HTTP messages.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    cookie_name: String,
    access_header: HeaderName,
    production: bool,
    refresh_max_age: Duration,
}

impl SessionTransport {
    /// `production` turns on `Secure` and `SameSite=None`; plain-HTTP
    /// development setups get `SameSite=Lax` without `Secure`.
    pub fn new(
        cookie_name: impl Into<String>,
        access_header: HeaderName,
        production: bool,
        refresh_max_age: Duration,
    ) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            access_header,
            production,
            refresh_max_age,
        }
    }

    pub fn access_header(&self) -> &HeaderName {
        &self.access_header
    }

    fn cookie_attributes(&self) -> &'static str {
        if self.production {
            "HttpOnly; Secure; SameSite=None; Path=/"
        } else {
            "HttpOnly; SameSite=Lax; Path=/"
        }
    }

    fn refresh_cookie(&self, value: &str, max_age: u64) -> String {
        format!(
            "{}={}; {}; Max-Age={}",
            self.cookie_name,
            value,
            self.cookie_attributes(),
            max_age
        )
    }

    /// Set the refresh token cookie.
    pub fn write(&self, headers: &mut HeaderMap, refresh: &str) {
        let cookie = self.refresh_cookie(refresh, self.refresh_max_age.as_secs());
        append_set_cookie(headers, &cookie);
    }

    /// Overwrite the refresh token cookie with an empty, already-expired one.
    pub fn clear(&self, headers: &mut HeaderMap) {
        let cookie = self.refresh_cookie("", 0);
        append_set_cookie(headers, &cookie);
    }

    /// Put the access token in the dedicated response header.
    pub fn expose_access(&self, headers: &mut HeaderMap, access: &str) {
        match HeaderValue::from_str(access) {
            Ok(value) => {
                headers.insert(self.access_header.clone(), value);
            }
            Err(e) => tracing::error!(error = %e, "Access token is not a valid header value"),
        }
    }

    /// Write both halves of a freshly issued pair.
    pub fn write_pair(&self, headers: &mut HeaderMap, pair: &TokenPair) {
        self.write(headers, &pair.refresh_token);
        self.expose_access(headers, &pair.access_token);
    }

    /// Read the refresh token from the request cookies. Empty values count as absent.
    pub fn read_refresh<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        get_cookie(headers, &self.cookie_name).filter(|value| !value.is_empty())
    }
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Refresh cookie is not a valid header value"),
    }
}
