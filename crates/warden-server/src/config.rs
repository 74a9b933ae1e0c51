//! Environment-driven configuration, following the `from_env()` idiom
//! used throughout this codebase (see the rate limiter and auth
//! modules): one struct per concern, populated with `std::env::var` and
//! documented defaults, loaded once at startup.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use warden_core::source::{LoadOptions, Mode};

/// Listener + body-size knobs (spec.md §6).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_body_bytes: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let port = env_parse("PORT", 8080)?;
        let max_body_bytes = env_parse("MAX_BODY_BYTES", 1024 * 1024)?;
        Ok(ServerConfig { port, max_body_bytes })
    }
}

/// Rule-source configuration: file path, rule directory, remote URL and
/// auth header, mode, and the load-time knobs (spec.md §3 `LoadOptions`,
/// §6 "rule file path, rule directory, remote URL and auth header...
/// mode").
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub file_path: Option<String>,
    pub dir_glob: Option<String>,
    pub remote_url: Option<String>,
    pub remote_auth: Option<String>,
    pub options: LoadOptions,
}

impl SourceConfig {
    pub fn from_env() -> Result<Self> {
        let mode = std::env::var("WARDEN_MODE")
            .ok()
            .map(|v| v.parse::<Mode>())
            .transpose()
            .map_err(|e| anyhow!("invalid WARDEN_MODE: {e}"))?
            .unwrap_or_default();

        let rsa_private_key_pem = match std::env::var("WARDEN_RSA_PRIVATE_KEY_FILE").ok() {
            Some(path) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading RSA private key from {path}"))?,
            ),
            None => std::env::var("WARDEN_RSA_PRIVATE_KEY_PEM").ok(),
        };

        let options = LoadOptions {
            mode,
            max_file_size: env_parse("WARDEN_MAX_FILE_SIZE", 10 * 1024 * 1024)?,
            allow_empty_file: env_parse("WARDEN_ALLOW_EMPTY_FILE", true)?,
            allow_empty_data: env_parse("WARDEN_ALLOW_EMPTY_DATA", false)?,
            http_timeout: Duration::from_secs(env_parse("WARDEN_HTTP_TIMEOUT_SECONDS", 5)?),
            retry_count: env_parse("WARDEN_HTTP_RETRY_COUNT", 2)?,
            retry_delay: Duration::from_millis(env_parse("WARDEN_HTTP_RETRY_DELAY_MS", 250)?),
            tls_verify: env_parse("WARDEN_TLS_VERIFY", true)?,
            rsa_private_key_pem,
        };

        Ok(SourceConfig {
            file_path: std::env::var("WARDEN_RULE_FILE").ok(),
            dir_glob: std::env::var("WARDEN_RULE_DIR").ok(),
            remote_url: std::env::var("WARDEN_REMOTE_URL").ok(),
            remote_auth: std::env::var("WARDEN_REMOTE_AUTH").ok(),
            options,
        })
    }
}

/// Refresh-scheduler knobs: tick interval, distributed-lock backend,
/// write-through KV (spec.md §6 "refresh interval", §4.3, §9 lock
/// pluggability).
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub lock_name: String,
    pub lock_ttl: Duration,
    pub redis_url: Option<String>,
}

impl RefreshConfig {
    pub fn from_env() -> Result<Self> {
        Ok(RefreshConfig {
            interval: Duration::from_secs(env_parse("WARDEN_REFRESH_INTERVAL_SECONDS", 30)?),
            lock_name: std::env::var("WARDEN_LOCK_NAME")
                .unwrap_or_else(|_| "warden:refresh".to_string()),
            lock_ttl: Duration::from_secs(env_parse("WARDEN_LOCK_TTL_SECONDS", 30)?),
            redis_url: std::env::var("REDIS_URL").ok(),
        })
    }
}

/// Rate-limiter knobs (spec.md §4.4, §6).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub rate: u32,
    pub window: Duration,
    pub max_visitors: usize,
    pub max_whitelist: usize,
    pub cleanup_interval: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self> {
        Ok(RateLimitConfig {
            rate: env_parse("WARDEN_RATE_LIMIT", 100)?,
            window: Duration::from_secs(env_parse("WARDEN_RATE_LIMIT_WINDOW_SECONDS", 1)?),
            max_visitors: env_parse("WARDEN_RATE_LIMIT_MAX_VISITORS", 50_000)?,
            max_whitelist: env_parse("WARDEN_RATE_LIMIT_MAX_WHITELIST", 1_000)?,
            cleanup_interval: Duration::from_secs(env_parse(
                "WARDEN_RATE_LIMIT_CLEANUP_INTERVAL_SECONDS",
                60,
            )?),
        })
    }
}

/// Service-auth knobs: the HMAC key map, API key set, timestamp
/// tolerance, trusted proxies, and the private-IP-auto-trust fallback
/// (spec.md §4.5, §6, §9 open question on private-IP trust).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `X-Key-Id` -> HMAC secret.
    pub hmac_keys: HashMap<String, String>,
    pub timestamp_tolerance: Duration,
    pub api_keys: Vec<String>,
    pub trusted_proxies: Vec<IpAddr>,
    /// Resolved separately (spec.md §9): defaults to `false`, auto-trust
    /// of private addresses is an explicit opt-in, never a default.
    pub trust_private_proxies: bool,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let hmac_keys = parse_key_value_list(&std::env::var("WARDEN_HMAC_KEYS").unwrap_or_default());

        let api_keys = std::env::var("WARDEN_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let trusted_proxies = std::env::var("WARDEN_TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<IpAddr>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("parsing WARDEN_TRUSTED_PROXIES")?;

        Ok(AuthConfig {
            hmac_keys,
            timestamp_tolerance: Duration::from_secs(env_parse(
                "WARDEN_HMAC_TIMESTAMP_TOLERANCE_SECONDS",
                60,
            )?),
            api_keys,
            trusted_proxies,
            trust_private_proxies: env_parse("WARDEN_TRUST_PRIVATE_PROXIES", false)?,
        })
    }
}

/// Parses `key1=value1,key2=value2` into a map, used for the HMAC key
/// registry (`X-Key-Id` -> secret).
fn parse_key_value_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
