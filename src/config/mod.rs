//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Rate limiter tuning
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Messages allowed inside one observation window
    pub max_requests: u32,
    /// How long a limited connection stays limited (ms)
    pub penalty_ms: i64,
    /// Maximum observation window before a free reset (ms)
    pub max_window_ms: i64,
    /// Per-connection window tick interval (ms)
    pub tick_ms: u64,
    /// Global expiry sweep interval (ms)
    pub sweep_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 2000,
            penalty_ms: 2000,
            max_window_ms: 1000,
            tick_ms: 1000,
            sweep_ms: 250,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,

    /// Directory holding Tiled JSON maps
    pub map_dir: PathBuf,
    /// Map new players spawn on, without the `.json` suffix
    pub start_map: String,

    /// Largest inbound text frame accepted, in bytes
    pub max_message_bytes: usize,
    /// TIME_SYNC latency at or above this closes the connection
    pub latency_limit_ms: i64,
    /// Delay the client waits before echoing TIME_SYNC
    pub heartbeat_interval_ms: i64,
    /// Drop connections with no traffic for this long
    pub idle_timeout: Duration,
    /// Periodic location save interval
    pub save_interval: Duration,

    pub rate_limit: RateLimitConfig,

    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: Option<String>,
    /// Translation endpoint (LibreTranslate-compatible)
    pub translation_url: Option<String>,
    /// Allowed client origins for CORS
    pub client_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            map_dir: PathBuf::from("assets/maps"),
            start_map: "main".to_string(),
            max_message_bytes: 1024,
            latency_limit_ms: 3000,
            heartbeat_interval_ms: 5000,
            idle_timeout: Duration::from_secs(30),
            save_interval: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
            supabase_url: None,
            supabase_service_role_key: None,
            translation_url: None,
            client_origin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            None => match lookup("SERVER_ADDR") {
                Some(addr) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
                None => defaults.server_addr,
            },
        };

        let rate_defaults = defaults.rate_limit;
        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "RATE_LIMIT_MAX_REQUESTS", rate_defaults.max_requests)?,
            penalty_ms: parse_or(&lookup, "RATE_LIMIT_PENALTY_MS", rate_defaults.penalty_ms)?,
            max_window_ms: parse_or(&lookup, "RATE_LIMIT_MAX_WINDOW_MS", rate_defaults.max_window_ms)?,
            tick_ms: parse_or(&lookup, "RATE_LIMIT_TICK_MS", rate_defaults.tick_ms)?,
            sweep_ms: parse_or(&lookup, "RATE_LIMIT_SWEEP_MS", rate_defaults.sweep_ms)?,
        };
        if rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid("RATE_LIMIT_MAX_REQUESTS"));
        }
        if rate_limit.tick_ms == 0 {
            return Err(ConfigError::Invalid("RATE_LIMIT_TICK_MS"));
        }
        if rate_limit.sweep_ms == 0 {
            return Err(ConfigError::Invalid("RATE_LIMIT_SWEEP_MS"));
        }

        let idle_timeout = Duration::from_secs(parse_or(
            &lookup,
            "IDLE_TIMEOUT_SECS",
            defaults.idle_timeout.as_secs(),
        )?);
        if idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("IDLE_TIMEOUT_SECS"));
        }

        let log_json = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => false,
            Some("json") => true,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        let start_map = lookup("START_MAP").unwrap_or(defaults.start_map);
        let start_map = start_map
            .strip_suffix(".json")
            .map(str::to_string)
            .unwrap_or(start_map);

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json,
            map_dir: lookup("MAP_DIR").map(PathBuf::from).unwrap_or(defaults.map_dir),
            start_map,
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", defaults.max_message_bytes)?,
            latency_limit_ms: parse_or(&lookup, "LATENCY_LIMIT_MS", defaults.latency_limit_ms)?,
            heartbeat_interval_ms: parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval_ms,
            )?,
            idle_timeout,
            save_interval: Duration::from_secs(parse_or(
                &lookup,
                "SAVE_INTERVAL_SECS",
                defaults.save_interval.as_secs(),
            )?),
            rate_limit,
            supabase_url: lookup("SUPABASE_URL"),
            supabase_service_role_key: lookup("SUPABASE_SERVICE_ROLE_KEY"),
            translation_url: lookup("TRANSLATION_URL"),
            client_origin: lookup("CLIENT_ORIGIN"),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.max_message_bytes, 1024);
        assert_eq!(config.start_map, "main");
        assert_eq!(config.rate_limit.max_requests, 2000);
        assert!(config.supabase_url.is_none());
    }

    #[test]
    fn port_overrides_server_addr() {
        let config =
            Config::from_lookup(lookup_from(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]))
                .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn start_map_suffix_is_stripped() {
        let config = Config::from_lookup(lookup_from(&[("START_MAP", "town.json")])).unwrap();
        assert_eq!(config.start_map, "town");
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = Config::from_lookup(lookup_from(&[("RATE_LIMIT_PENALTY_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("RATE_LIMIT_PENALTY_MS")));
    }

    #[test]
    fn rejects_zero_threshold() {
        let err =
            Config::from_lookup(lookup_from(&[("RATE_LIMIT_MAX_REQUESTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let err = Config::from_lookup(lookup_from(&[("IDLE_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("IDLE_TIMEOUT_SECS")));

        let config = Config::from_lookup(lookup_from(&[("IDLE_TIMEOUT_SECS", "30")])).unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn json_log_format() {
        let config = Config::from_lookup(lookup_from(&[("LOG_FORMAT", "json")])).unwrap();
        assert!(config.log_json);
    }
}
