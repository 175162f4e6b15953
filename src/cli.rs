//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use crate::ServerConfig;
use crate::auth::{DEFAULT_ACCESS_HEADER_NAME, DEFAULT_REFRESH_COOKIE_NAME, IpSource};
use crate::db::Database;
use crate::rate_limit::RateLimits;
use axum::http::HeaderName;
use clap::Parser;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Deployment environment. Decides the refresh cookie attributes.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nutricrm",
    about = "Authentication and session service for the nutrition CRM"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7300")]
    pub port: u16,

    /// Path to SQLite database file, or `:memory:`
    #[arg(short, long, default_value = "nutricrm.db")]
    pub database: String,

    /// Deployment environment
    #[arg(long, env = "APP_ENV", value_enum, default_value = "development")]
    pub environment: Environment,

    /// Access token lifetime (e.g. "15m")
    #[arg(long, env = "JWT_ACCESS_EXPIRES", default_value = "15m", value_parser = humantime::parse_duration)]
    pub access_ttl: Duration,

    /// Refresh token lifetime (e.g. "7d")
    #[arg(long, env = "JWT_REFRESH_EXPIRES", default_value = "7d", value_parser = humantime::parse_duration)]
    pub refresh_ttl: Duration,

    /// Name of the HttpOnly cookie holding the refresh token
    #[arg(long, env = "REFRESH_COOKIE_NAME", default_value = DEFAULT_REFRESH_COOKIE_NAME, value_parser = validate_cookie_name)]
    pub refresh_cookie_name: String,

    /// Response header carrying renewed access tokens
    #[arg(long, env = "ACCESS_HEADER_NAME", default_value = DEFAULT_ACCESS_HEADER_NAME, value_parser = parse_header_name)]
    pub access_header_name: HeaderName,

    /// Allowed CORS origins, comma separated. Empty mirrors the request origin
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Take the client IP from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Login attempts per second allowed per client IP
    #[arg(long, env = "LOGIN_RATE_PER_SECOND", default_value_t = RateLimits::default().login_per_second)]
    pub login_rate_per_second: u32,

    /// Login attempts a client IP may burst before being throttled
    #[arg(long, env = "LOGIN_BURST", default_value_t = RateLimits::default().login_burst)]
    pub login_burst: u32,

    /// Registrations per minute allowed per client IP
    #[arg(long, env = "REGISTER_RATE_PER_MINUTE", default_value_t = RateLimits::default().register_per_minute)]
    pub register_rate_per_minute: u32,

    /// Path to file containing the access token secret. Prefer JWT_ACCESS_SECRET
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer JWT_REFRESH_SECRET
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn parse_header_name(s: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(s.as_bytes()).map_err(|_| format!("Invalid header name: {}", s))
}

fn validate_cookie_name(s: &str) -> Result<String, String> {
    let valid = !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if valid {
        Ok(s.to_string())
    } else {
        Err(format!("Invalid cookie name: {}", s))
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one secret from its environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>, flag: &str) -> Option<String> {
    if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: main calls this before building the tokio runtime, so no
        // other thread exists yet to read the environment concurrently.
        unsafe { std::env::remove_var(env_var) };
        Some(secret)
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                None
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or use {}",
            env_var, flag
        );
        None
    }
}

/// Both secrets must be long enough and must differ, otherwise a refresh
/// token would verify as an access token.
pub fn validate_secrets(access: &str, refresh: &str) -> Result<(), String> {
    if access.len() < MIN_JWT_SECRET_LENGTH {
        return Err(format!(
            "Access token secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        ));
    }
    if refresh.len() < MIN_JWT_SECRET_LENGTH {
        return Err(format!(
            "Refresh token secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        ));
    }
    if access == refresh {
        return Err("Access and refresh token secrets must be different".to_string());
    }
    Ok(())
}

/// Load and validate both secrets. Returns None and logs on any failure.
pub fn load_secrets(args: &Args) -> Option<(String, String)> {
    let access = load_secret(
        "JWT_ACCESS_SECRET",
        args.access_secret_file.as_deref(),
        "--access-secret-file",
    );
    let refresh = load_secret(
        "JWT_REFRESH_SECRET",
        args.refresh_secret_file.as_deref(),
        "--refresh-secret-file",
    );
    let (access, refresh) = (access?, refresh?);

    if let Err(msg) = validate_secrets(&access, &refresh) {
        error!("{}", msg);
        return None;
    }
    Some((access, refresh))
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    access_secret: String,
    refresh_secret: String,
) -> ServerConfig {
    let ip_source = if args.trust_proxy {
        IpSource::ForwardedFor
    } else {
        IpSource::ConnectInfo
    };

    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_ttl: args.access_ttl,
        refresh_ttl: args.refresh_ttl,
        environment: args.environment,
        refresh_cookie_name: args.refresh_cookie_name.clone(),
        access_header_name: args.access_header_name.clone(),
        cors_origins: args
            .cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect(),
        ip_source,
        rate_limits: RateLimits {
            login_per_second: args.login_rate_per_second,
            login_burst: args.login_burst,
            register_per_minute: args.register_rate_per_minute,
        },
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS: &str = "access-secret-access-secret-access-secret";
    const REFRESH: &str = "refresh-secret-refresh-secret-refresh-secret";

    #[test]
    fn test_validate_secrets() {
        assert!(validate_secrets(ACCESS, REFRESH).is_ok());
        assert!(validate_secrets("short", REFRESH).is_err());
        assert!(validate_secrets(ACCESS, "short").is_err());
        assert!(validate_secrets(ACCESS, ACCESS).is_err());
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "nutricrm",
            "--environment",
            "production",
            "--access-ttl",
            "5m",
            "--refresh-ttl",
            "2d",
            "--access-header-name",
            "X-Renewed-Token",
            "--cors-origins",
            "https://app.example.com,https://admin.example.com",
            "--trust-proxy",
            "--login-burst",
            "10",
            "--register-rate-per-minute",
            "6",
        ])
        .unwrap();

        assert_eq!(args.environment, Environment::Production);
        assert_eq!(args.access_ttl, Duration::from_secs(300));
        assert_eq!(args.refresh_ttl, Duration::from_secs(2 * 86_400));
        assert_eq!(args.access_header_name.as_str(), "x-renewed-token");
        assert_eq!(args.cors_origins.len(), 2);
        assert!(args.trust_proxy);
        assert_eq!(args.login_burst, 10);
        assert_eq!(args.register_rate_per_minute, 6);
        assert_eq!(args.login_rate_per_second, RateLimits::default().login_per_second);
    }

    #[tokio::test]
    async fn test_build_config_applies_rate_limits() {
        let args = Args::try_parse_from([
            "nutricrm",
            "--login-rate-per-second",
            "4",
            "--login-burst",
            "8",
            "--register-rate-per-minute",
            "2",
        ])
        .unwrap();
        let db = Database::open(":memory:").await.unwrap();

        let config = build_config(&args, db, ACCESS.to_string(), REFRESH.to_string());
        assert_eq!(config.rate_limits.login_per_second, 4);
        assert_eq!(config.rate_limits.login_burst, 8);
        assert_eq!(config.rate_limits.register_per_minute, 2);
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(parse_header_name("bad header").is_err());
        assert!(validate_cookie_name("refresh token").is_err());
        assert!(validate_cookie_name("a=b").is_err());
        assert!(validate_cookie_name("refreshToken").is_ok());
    }
}
