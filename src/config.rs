// src/config.rs
use governor::Quota;
use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_QUERY_PORT: u16 = 25565;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required environment variable {}", key),
            Self::Invalid(key, value) => write!(f, "invalid value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct Config {
    // HTTP
    pub bind_address: String,
    pub port: u16,
    pub api_rate_period_secs: u64,
    pub api_rate_burst: u32,

    // Query
    pub query_address: String,
    pub query_timeout_ms: u64,
    pub query_retries: u32,
    pub query_backoff_ms: u64,

    // RCON
    pub rcon_address: String,
    pub rcon_password: String,
    pub rcon_timeout_ms: u64,

    // Other configs
    pub player_lookup_concurrency: usize,
    pub uuid_cache_ttl_secs: u64,
    pub dimension_map_path: PathBuf,
    pub dimension_map_reload_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("query_address", &self.query_address)
            .field("rcon_address", &self.rcon_address)
            .field("rcon_password", &"<redacted>")
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("query_retries", &self.query_retries)
            .field("rcon_timeout_ms", &self.rcon_timeout_ms)
            .field("player_lookup_concurrency", &self.player_lookup_concurrency)
            .finish_non_exhaustive()
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn optional<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, value)),
        Err(_) => Ok(default),
    }
}

/// Appends `default_port` unless `host` already carries one.
fn with_port(host: &str, default_port: u16) -> String {
    let has_port = match host.rsplit_once(':') {
        // Bracketed or bare IPv6 literals contain colons of their own.
        Some((head, port)) => {
            port.parse::<u16>().is_ok() && (!head.contains(':') || head.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        host.to_string()
    } else if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, default_port)
    } else {
        format!("{}:{}", host, default_port)
    }
}

fn strip_port(address: &str) -> &str {
    match address.rsplit_once(':') {
        Some((head, port)) if port.parse::<u16>().is_ok() => head,
        _ => address,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_address = required("SERVER_ADDRESS")?;
        let query_address = match env::var("QUERY_PORT") {
            Ok(port) => {
                let port: u16 = port
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("QUERY_PORT", port.clone()))?;
                format!("{}:{}", strip_port(&with_port(&server_address, DEFAULT_QUERY_PORT)), port)
            }
            Err(_) => with_port(&server_address, DEFAULT_QUERY_PORT),
        };

        let rcon_host = required("RCON_HOST")?;
        let rcon_port: u16 = optional("RCON_PORT", 25575)?;

        Ok(Self {
            bind_address: optional("BIND_ADDRESS", "0.0.0.0".to_string())?,
            port: optional("PORT", 5000)?,
            api_rate_period_secs: optional("API_RATE_PERIOD_SECS", 1)?,
            api_rate_burst: optional("API_RATE_BURST", 20)?,

            query_address,
            query_timeout_ms: optional("QUERY_TIMEOUT_MS", 3000)?,
            query_retries: optional("QUERY_RETRIES", 3)?,
            query_backoff_ms: optional("QUERY_BACKOFF_MS", 200)?,

            rcon_address: with_port(&rcon_host, rcon_port),
            rcon_password: required("RCON_PASSWORD")?,
            rcon_timeout_ms: optional("RCON_TIMEOUT_MS", 5000)?,

            player_lookup_concurrency: optional("PLAYER_LOOKUP_CONCURRENCY", 4)?,
            uuid_cache_ttl_secs: optional("UUID_CACHE_TTL_SECS", 3600)?,
            dimension_map_path: optional("DIMENSION_MAP_PATH", PathBuf::from("dimension_map.json"))?,
            dimension_map_reload_secs: optional("DIMENSION_MAP_RELOAD_SECS", 300)?,
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_millis(self.rcon_timeout_ms)
    }

    pub fn query_backoff(&self) -> Duration {
        Duration::from_millis(self.query_backoff_ms)
    }

    pub fn api_quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.api_rate_burst).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(Duration::from_secs(self.api_rate_period_secs.max(1)))
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}
