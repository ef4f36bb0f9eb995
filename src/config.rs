use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

use crate::auth::codec;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_RUST_LOG: &str = "info";

// HS256 needs a key at least as long as the digest
pub const MIN_SIGNING_KEY_BYTES: usize = 32;
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;

const DEFAULT_QUEUE_CONNECTION_STRING: &str = "redis://127.0.0.1:6379";
const DEFAULT_DATA_QUEUE: &str = "data";
const DEFAULT_FEEDBACK_QUEUE: &str = "feedback";
// Largest single batch accepted by the upstream event hub (1 MB minus framing)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1_046_528;
const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

const DEFAULT_HUB_ENDPOINT: &str = "/hub";
const DEFAULT_HUB_PATH: &str = "anomalyHub";
const DEFAULT_HUB_KEEPALIVE_INTERVAL_SECS: u64 = 15;
const DEFAULT_HUB_CLIENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HUB_SEND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HUB_CHANNEL_CAPACITY: usize = 64;

const DEFAULT_CORS_ORIGIN_SUFFIXES: &str = ".azurestaticapps.net,.azurewebsites.net";

pub const SECONDS_PER_MINUTE: i64 = 60;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Shared secret and claim expectations used to sign and verify credentials.
#[derive(Clone)]
pub struct SigningMaterial {
    pub key: Vec<u8>,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("key", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

/// The single trusted client allowed to request tokens
#[derive(Clone)]
pub struct ClientSettings {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Which queue implementation receives forwarded submissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    Kafka,
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "kafka" => Ok(Self::Kafka),
            "memory" | "in-memory" => Ok(Self::Memory),
            _ => anyhow::bail!(
                "Invalid QUEUE_BACKEND: {}. Must be 'redis', 'kafka' or 'memory'",
                s
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis URL or comma-separated Kafka brokers, depending on the backend
    pub connection_string: String,
    pub data_queue: String,
    pub feedback_queue: String,
    /// Capacity of a single outbound batch in bytes
    pub max_batch_bytes: usize,
    /// Approximate MAXLEN applied to Redis streams on XADD
    pub stream_max_len: usize,
}

/// Real-time hub settings
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Base path of the real-time endpoint (e.g. "/hub")
    pub endpoint: String,
    /// Hub sub-path under the endpoint (e.g. "anomalyHub")
    pub hub_path: String,
    pub keepalive_interval: Duration,
    pub client_timeout: Duration,
    pub send_timeout: Duration,
    pub channel_capacity: usize,
}

impl HubConfig {
    /// Full route of the hub, e.g. "/hub/anomalyHub"
    pub fn route(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        let hub = self.hub_path.trim_start_matches('/');
        if endpoint.starts_with('/') {
            format!("{}/{}", endpoint, hub)
        } else {
            format!("/{}/{}", endpoint, hub)
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            keepalive_interval: Duration::from_secs(DEFAULT_HUB_KEEPALIVE_INTERVAL_SECS),
            client_timeout: Duration::from_secs(DEFAULT_HUB_CLIENT_TIMEOUT_SECS),
            send_timeout: Duration::from_millis(DEFAULT_HUB_SEND_TIMEOUT_MS),
            channel_capacity: DEFAULT_HUB_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CorsConfig {
    /// Origins ending with any of these suffixes are allowed
    pub allowed_origin_suffixes: Vec<String>,
}

impl CorsConfig {
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origin_suffixes
            .iter()
            .any(|suffix| origin.ends_with(suffix.as_str()))
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub signing: SigningMaterial,
    pub client: ClientSettings,
    pub queue: QueueConfig,
    pub hub: HubConfig,
    pub cors: CorsConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Missing required configuration: {}", key))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let key = required("AUTH_TOKEN_KEY")?;
        if key.len() < MIN_SIGNING_KEY_BYTES {
            anyhow::bail!(
                "AUTH_TOKEN_KEY must be at least {} bytes long",
                MIN_SIGNING_KEY_BYTES
            );
        }

        let ttl_minutes: i64 = parse_or(
            &lookup,
            "AUTH_TOKEN_EXPIRES_IN_MINUTES",
            DEFAULT_TOKEN_TTL_MINUTES,
        )?;
        if ttl_minutes <= 0 {
            anyhow::bail!("AUTH_TOKEN_EXPIRES_IN_MINUTES must be positive");
        }
        let expiry_fits = codec::token_lifetime(ttl_minutes)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .is_some();
        if !expiry_fits {
            anyhow::bail!(
                "AUTH_TOKEN_EXPIRES_IN_MINUTES is too large: {} minutes",
                ttl_minutes
            );
        }

        let signing = SigningMaterial {
            key: key.into_bytes(),
            issuer: required("AUTH_TOKEN_ISSUER")?,
            audience: required("AUTH_TOKEN_AUDIENCE")?,
            ttl_minutes,
        };

        let client = ClientSettings {
            client_id: required("AUTH_CLIENT_ID")?,
            client_secret: required("AUTH_CLIENT_SECRET")?,
        };

        let queue = QueueConfig {
            backend: or_default("QUEUE_BACKEND", "redis").parse()?,
            connection_string: or_default(
                "QUEUE_CONNECTION_STRING",
                DEFAULT_QUEUE_CONNECTION_STRING,
            ),
            data_queue: or_default("QUEUE_DATA_NAME", DEFAULT_DATA_QUEUE),
            feedback_queue: or_default("QUEUE_FEEDBACK_NAME", DEFAULT_FEEDBACK_QUEUE),
            max_batch_bytes: parse_or(&lookup, "QUEUE_MAX_BATCH_BYTES", DEFAULT_MAX_BATCH_BYTES)?,
            stream_max_len: parse_or(&lookup, "QUEUE_STREAM_MAX_LEN", DEFAULT_STREAM_MAX_LEN)?,
        };

        let channel_capacity: usize =
            parse_or(&lookup, "HUB_CHANNEL_CAPACITY", DEFAULT_HUB_CHANNEL_CAPACITY)?;
        if channel_capacity == 0 {
            anyhow::bail!("HUB_CHANNEL_CAPACITY must be greater than zero");
        }

        let keepalive_secs: u64 = parse_or(
            &lookup,
            "HUB_KEEPALIVE_INTERVAL_SECS",
            DEFAULT_HUB_KEEPALIVE_INTERVAL_SECS,
        )?;
        let client_timeout_secs: u64 = parse_or(
            &lookup,
            "HUB_CLIENT_TIMEOUT_SECS",
            DEFAULT_HUB_CLIENT_TIMEOUT_SECS,
        )?;
        if keepalive_secs == 0 || client_timeout_secs == 0 {
            anyhow::bail!("HUB_KEEPALIVE_INTERVAL_SECS and HUB_CLIENT_TIMEOUT_SECS must be positive");
        }

        let hub = HubConfig {
            endpoint: or_default("HUB_ENDPOINT", DEFAULT_HUB_ENDPOINT),
            hub_path: or_default("HUB_PATH", DEFAULT_HUB_PATH),
            keepalive_interval: Duration::from_secs(keepalive_secs),
            client_timeout: Duration::from_secs(client_timeout_secs),
            send_timeout: Duration::from_millis(parse_or(
                &lookup,
                "HUB_SEND_TIMEOUT_MS",
                DEFAULT_HUB_SEND_TIMEOUT_MS,
            )?),
            channel_capacity,
        };

        let cors = CorsConfig {
            allowed_origin_suffixes: or_default(
                "CORS_ALLOWED_ORIGIN_SUFFIXES",
                DEFAULT_CORS_ORIGIN_SUFFIXES,
            )
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        };

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            rust_log: or_default("RUST_LOG", DEFAULT_RUST_LOG),
            signing,
            client,
            queue,
            hub,
            cors,
        })
    }

    /// Builds the configuration from a fixed map of variables
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_source(|key| vars.get(key).cloned())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}
