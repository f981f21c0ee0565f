//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use wadesk_shared::constants::{
    DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_HTTP_PORT, DEFAULT_INVITATION_TTL_HOURS, WEBHOOK_PATH,
};

/// What the webhook does when an event cannot be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and answer 200. The gateway will not redeliver.
    Acknowledge,
    /// Log, keep the raw event in `dead_letters`, answer 200.
    DeadLetter,
    /// Answer 503 so the gateway redelivers.
    Reject,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "acknowledge" | "ack" => Ok(Self::Acknowledge),
            "dead_letter" => Ok(Self::DeadLetter),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown failure policy `{other}`")),
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./wadesk.db`
    pub database_path: PathBuf,

    /// Externally reachable base URL of this server; the gateway posts
    /// webhooks to `{PUBLIC_BASE_URL}/webhooks/waha`.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Ed25519 public key of the identity provider (hex-encoded, 64 chars).
    /// Env: `IDENTITY_PUBLIC_KEY`
    /// Default: all-zeros, which verifies no token (development only).
    pub identity_public_key: [u8; 32],

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Shared secret expected in `X-Webhook-Secret`.
    /// Env: `WEBHOOK_SECRET`
    /// Default: empty (no check).
    pub webhook_secret: Option<String>,

    /// Timeout for every outbound gateway call.
    /// Env: `GATEWAY_TIMEOUT_SECS`
    /// Default: 15 seconds.
    pub gateway_timeout: Duration,

    /// Env: `WEBHOOK_FAILURE_POLICY` (`acknowledge` | `dead_letter` | `reject`)
    /// Default: `acknowledge`
    pub failure_policy: FailurePolicy,

    /// Env: `INVITATION_TTL_HOURS`
    /// Default: 168 (7 days)
    pub invitation_ttl_hours: i64,

    /// Maximum request body size in bytes.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 1 MiB
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./wadesk.db"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            identity_public_key: [0u8; 32],
            admin_token: None,
            webhook_secret: None,
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            failure_policy: FailurePolicy::Acknowledge,
            invitation_ttl_hours: DEFAULT_INVITATION_TTL_HOURS,
            max_body_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("public_base_url", &self.public_base_url)
            .field("identity_public_key", &hex::encode(self.identity_public_key))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("gateway_timeout", &self.gateway_timeout)
            .field("failure_policy", &self.failure_policy)
            .field("invitation_ttl_hours", &self.invitation_ttl_hours)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`], reading variables through `get`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(url) = get("PUBLIC_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.public_base_url = url.trim().trim_end_matches('/').to_string();
        }

        if let Some(hex_key) = get("IDENTITY_PUBLIC_KEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.identity_public_key = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid IDENTITY_PUBLIC_KEY, using default (dev-only)"
                    );
                }
            }
        }

        config.admin_token = get("ADMIN_TOKEN").filter(|t| !t.is_empty());
        config.webhook_secret = get("WEBHOOK_SECRET").filter(|t| !t.is_empty());

        if let Some(val) = get("GATEWAY_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.gateway_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid GATEWAY_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = get("WEBHOOK_FAILURE_POLICY") {
            match val.parse::<FailurePolicy>() {
                Ok(policy) => config.failure_policy = policy,
                Err(e) => tracing::warn!(error = %e, "Invalid WEBHOOK_FAILURE_POLICY, using default"),
            }
        }

        if let Some(val) = get("INVITATION_TTL_HOURS") {
            match val.trim().parse::<i64>() {
                Ok(hours) if hours > 0 => config.invitation_ttl_hours = hours,
                _ => tracing::warn!(value = %val, "Invalid INVITATION_TTL_HOURS, using default"),
            }
        }

        if let Some(val) = get("MAX_BODY_BYTES") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_BYTES, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// URL the gateway is told to post events to.
    pub fn webhook_url(&self) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), WEBHOOK_PATH)
    }

    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.invitation_ttl_hours)
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex, &mut bytes).map_err(|e| format!("invalid hex: {e}"))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.identity_public_key, [0u8; 32]);
        assert_eq!(config.failure_policy, FailurePolicy::Acknowledge);
        assert_eq!(config.gateway_timeout, Duration::from_secs(15));
        assert_eq!(config.webhook_url(), "http://localhost:8080/webhooks/waha");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let key = "ab".repeat(32);
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("PUBLIC_BASE_URL", "https://desk.example.com/"),
            ("IDENTITY_PUBLIC_KEY", key.as_str()),
            ("ADMIN_TOKEN", "s3cret"),
            ("WEBHOOK_FAILURE_POLICY", "dead-letter"),
            ("GATEWAY_TIMEOUT_SECS", "5"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.webhook_url(), "https://desk.example.com/webhooks/waha");
        assert_eq!(config.identity_public_key, [0xab; 32]);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.failure_policy, FailurePolicy::DeadLetter);
        assert_eq!(config.gateway_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "nonsense"),
            ("GATEWAY_TIMEOUT_SECS", "0"),
            ("WEBHOOK_FAILURE_POLICY", "explode"),
            ("ADMIN_TOKEN", ""),
        ]));
        let default = ServerConfig::default();

        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.gateway_timeout, default.gateway_timeout);
        assert_eq!(config.failure_policy, FailurePolicy::Acknowledge);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("ADMIN_TOKEN", "s3cret"),
            ("WEBHOOK_SECRET", "wh-secret-value"),
        ]));
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cret"));
        assert!(!printed.contains("wh-secret-value"));
    }

    #[test]
    fn test_parse_hex_pubkey() {
        let hex = "ab".repeat(32);
        let key = parse_hex_pubkey(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_pubkey_wrong_length() {
        assert!(parse_hex_pubkey("abcd").is_err());
        assert!(parse_hex_pubkey(&"zz".repeat(32)).is_err());
    }
}
