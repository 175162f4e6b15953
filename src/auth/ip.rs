//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;

/// Where to read the client address from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpSource {
    /// The TCP peer address (requires `into_make_service_with_connect_info`).
    #[default]
    ConnectInfo,
    /// The first entry of `X-Forwarded-For`. Only safe behind a trusted proxy.
    ForwardedFor,
}

/// Trait for types that provide access to HTTP headers and extensions.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract client IP address based on configuration.
///
/// With `ForwardedFor`, a missing or empty header is an error (no fallback to
/// the socket address, which would be the proxy's).
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_source: IpSource,
) -> Result<String, &'static str> {
    match ip_source {
        IpSource::ForwardedFor => {
            let value = source
                .headers()
                .get("x-forwarded-for")
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            value
                .split(',')
                .next()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .ok_or("IP header is empty")
        }
        IpSource::ConnectInfo => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;

    #[test]
    fn test_forwarded_for_takes_first() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            extract_client_ip(&request, IpSource::ForwardedFor),
            Ok("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_forwarded_for_missing() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, IpSource::ForwardedFor).is_err());
    }

    #[test]
    fn test_connect_info() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, IpSource::ConnectInfo).is_err());

        let addr: SocketAddr = "198.51.100.2:4000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(
            extract_client_ip(&request, IpSource::ConnectInfo),
            Ok("198.51.100.2".to_string())
        );
    }
}
