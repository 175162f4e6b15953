//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and signup spam.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use crate::auth::{IpSource, extract_client_ip};

/// How often idle per-IP entries are dropped.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Tunable limits. Zero values are clamped to one.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub login_per_second: u32,
    pub login_burst: u32,
    pub register_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login_per_second: 1,
            login_burst: 5,
            register_per_minute: 3,
        }
    }
}

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login
    pub login: Arc<IpLimiter>,
    /// Per-IP limiter for registration
    pub register: Arc<IpLimiter>,
    pub ip_source: IpSource,
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

impl RateLimitConfig {
    pub fn new(limits: RateLimits, ip_source: IpSource) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(non_zero(limits.login_per_second))
                    .allow_burst(non_zero(limits.login_burst)),
            )),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(non_zero(
                limits.register_per_minute,
            )))),
            ip_source,
        }
    }

    /// Drop entries for clients whose buckets have refilled completely.
    pub fn prune(&self) {
        for limiter in [&self.login, &self.register] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

/// Prune the limiters on a fixed interval for as long as the server runs.
pub fn spawn_pruning_scheduler(
    config: Arc<RateLimitConfig>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            config.prune();
            tracing::debug!(
                login = config.login.len(),
                register = config.register.len(),
                "Pruned rate limiters"
            );
        }
    })
}

fn check(
    limiter: &IpLimiter,
    ip_source: IpSource,
    request: &Request,
    message: &'static str,
) -> Option<Response> {
    let ip = match extract_client_ip(request, ip_source) {
        Ok(ip) => ip,
        Err(reason) => {
            tracing::warn!(reason, "Unable to determine client IP");
            return Some(
                (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response(),
            );
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => None,
        Err(_) => {
            tracing::info!(ip = %ip, "Rate limit exceeded");
            Some((StatusCode::TOO_MANY_REQUESTS, message).into_response())
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(
        &config.login,
        config.ip_source,
        &request,
        "Too many authentication attempts. Please wait before trying again.",
    ) {
        Some(rejection) => rejection,
        None => next.run(request).await,
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(
        &config.register,
        config.ip_source,
        &request,
        "Too many signup attempts. Please wait before trying again.",
    ) {
        Some(rejection) => rejection,
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_burst_then_blocked() {
        let config = RateLimitConfig::new(
            RateLimits {
                login_per_second: 1,
                login_burst: 2,
                register_per_minute: 1,
            },
            IpSource::ForwardedFor,
        );
        let ip = "203.0.113.1".to_string();

        assert!(config.login.check_key(&ip).is_ok());
        assert!(config.login.check_key(&ip).is_ok());
        assert!(config.login.check_key(&ip).is_err());
        // Other clients are unaffected.
        assert!(config.login.check_key(&"203.0.113.2".to_string()).is_ok());
    }

    fn fast_refill() -> RateLimitConfig {
        RateLimitConfig::new(
            RateLimits {
                login_per_second: 1000,
                login_burst: 1,
                register_per_minute: 1,
            },
            IpSource::ForwardedFor,
        )
    }

    #[test]
    fn test_prune_drops_refilled_clients() {
        let config = fast_refill();
        assert!(config.login.check_key(&"203.0.113.1".to_string()).is_ok());
        assert!(config.register.check_key(&"203.0.113.1".to_string()).is_ok());
        assert_eq!(config.login.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        config.prune();

        assert!(config.login.is_empty());
        // The register bucket takes a minute to refill.
        assert_eq!(config.register.len(), 1);
    }

    #[tokio::test]
    async fn test_pruning_scheduler_runs() {
        let config = Arc::new(fast_refill());
        assert!(config.login.check_key(&"203.0.113.1".to_string()).is_ok());

        let handle = spawn_pruning_scheduler(config.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(config.login.is_empty());
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let config = RateLimitConfig::new(
            RateLimits {
                login_per_second: 0,
                login_burst: 0,
                register_per_minute: 0,
            },
            IpSource::ConnectInfo,
        );
        assert!(config.register.check_key(&"ip".to_string()).is_ok());
    }
}
