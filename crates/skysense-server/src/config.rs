//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. Without device credentials the
//! poller stays off; without a token secret an ephemeral signing key is
//! generated at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use skysense_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MQTT_BROKER, DEFAULT_MQTT_TOPIC, ECOWITT_REALTIME_URL,
    FETCH_TIMEOUT_SECS, MAX_TOKEN_TTL_SECS, PERSIST_INTERVAL_SECS, POLL_INTERVAL_SECS, TOKEN_TTL_SECS,
};

/// Credentials and endpoint of the device telemetry API.
#[derive(Clone, Default)]
pub struct EcowittConfig {
    /// Env: `ECOWITT_URL`
    pub url: String,
    /// Env: `ECOWITT_APP_KEY`
    pub application_key: String,
    /// Env: `ECOWITT_API_KEY`
    pub api_key: String,
    /// Device MAC address. Env: `ECOWITT_MAC`
    pub mac: String,
}

impl EcowittConfig {
    pub fn is_configured(&self) -> bool {
        !self.application_key.is_empty() && !self.api_key.is_empty() && !self.mac.is_empty()
    }
}

// Keys stay out of the startup log.
impl std::fmt::Debug for EcowittConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcowittConfig")
            .field("url", &self.url)
            .field("mac", &self.mac)
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./skysense.db`
    pub database_path: PathBuf,

    /// Ed25519 secret used to sign session tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SECRET`
    /// Default: none (a random key is generated at startup).
    pub token_secret: Option<[u8; 32]>,

    /// Lifetime of issued session tokens.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 7 days
    pub token_ttl_secs: i64,

    pub ecowitt: EcowittConfig,

    /// Env: `POLL_INTERVAL_SECS`, default 5
    pub poll_interval: Duration,

    /// Env: `FETCH_TIMEOUT_SECS`, default 10
    pub fetch_timeout: Duration,

    /// Env: `PERSIST_INTERVAL_SECS`, default 3600
    pub persist_interval: Duration,

    /// MQTT broker URI for republished readings; empty disables it.
    /// Env: `MQTT_BROKER`
    /// Default: `tcp://broker.hivemq.com:1883`
    pub mqtt_broker: Option<String>,

    /// Env: `MQTT_TOPIC`
    /// Default: `ecowitt/weather`
    pub mqtt_topic: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("token_secret", &self.token_secret.map(|_| "<set>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("ecowitt", &self.ecowitt)
            .field("poll_interval", &self.poll_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("persist_interval", &self.persist_interval)
            .field("mqtt_broker", &self.mqtt_broker)
            .field("mqtt_topic", &self.mqtt_topic)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./skysense.db"),
            token_secret: None,
            token_ttl_secs: TOKEN_TTL_SECS,
            ecowitt: EcowittConfig {
                url: ECOWITT_REALTIME_URL.to_string(),
                ..Default::default()
            },
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
            persist_interval: Duration::from_secs(PERSIST_INTERVAL_SECS),
            mqtt_broker: Some(DEFAULT_MQTT_BROKER.to_string()),
            mqtt_topic: DEFAULT_MQTT_TOPIC.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = var("TOKEN_SECRET") {
            match parse_hex_secret(&hex_key) {
                Ok(key) => config.token_secret = Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid TOKEN_SECRET, generating an ephemeral key");
                }
            }
        }

        if let Some(ttl) = parse_positive(&var, "TOKEN_TTL_SECS") {
            match i64::try_from(ttl) {
                Ok(secs) if secs <= MAX_TOKEN_TTL_SECS => config.token_ttl_secs = secs,
                _ => tracing::warn!(
                    value = ttl,
                    max = MAX_TOKEN_TTL_SECS,
                    "TOKEN_TTL_SECS too large, using default"
                ),
            }
        }

        // -- Device API --

        if let Some(url) = var("ECOWITT_URL") {
            config.ecowitt.url = url;
        }
        if let Some(key) = var("ECOWITT_APP_KEY") {
            config.ecowitt.application_key = key;
        }
        if let Some(key) = var("ECOWITT_API_KEY") {
            config.ecowitt.api_key = key;
        }
        if let Some(mac) = var("ECOWITT_MAC") {
            config.ecowitt.mac = mac;
        }

        // -- Schedules --

        if let Some(secs) = parse_positive(&var, "POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&var, "FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&var, "PERSIST_INTERVAL_SECS") {
            config.persist_interval = Duration::from_secs(secs);
        }

        // -- Telemetry --

        if let Some(broker) = var("MQTT_BROKER") {
            config.mqtt_broker = if broker.trim().is_empty() {
                None
            } else {
                Some(broker)
            };
        }
        if let Some(topic) = var("MQTT_TOPIC") {
            if !topic.is_empty() {
                config.mqtt_topic = topic;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = var(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            None
        }
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_secret(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }

    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
