//! Media orchestrator configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL may
//! embed credentials and is redacted in Debug output.

use common::secret::SecretString;
use common::types::ServerId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Default number of workers spawned at startup.
pub const DEFAULT_NUM_WORKERS: usize = 3;

/// Default recommended worker count used by health checks.
pub const DEFAULT_RECOMMENDED_WORKERS: usize = 3;

/// Default average routers-per-worker above which health is degraded.
pub const DEFAULT_MAX_AVG_ROUTERS_PER_WORKER: f64 = 10.0;

/// Default RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default broadcast topic for load samples.
pub const DEFAULT_LOAD_TOPIC: &str = "media-server-load";

/// Default load publish interval in milliseconds.
pub const DEFAULT_LOAD_BROADCAST_INTERVAL_MS: u64 = 5000;

/// Default hanging-transport check interval in seconds (1 hour).
pub const DEFAULT_HANGING_CHECK_INTERVAL_SECONDS: u64 = 3600;

/// Default age after which a transport is considered hanging (2 hours).
pub const DEFAULT_HANGING_TRANSPORT_THRESHOLD_SECONDS: u64 = 7200;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default server id prefix.
pub const DEFAULT_SERVER_ID_PREFIX: &str = "mo";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Returns the environment name as used in config and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Parse an environment name (case-insensitive).
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidValue(format!(
                "MO_ENVIRONMENT must be development, staging or production, got '{other}'"
            ))),
        }
    }
}

/// Media orchestrator configuration.
#[derive(Clone)]
pub struct Config {
    /// Identifier of this server instance in load samples.
    pub server_id: ServerId,

    /// Deployment environment.
    pub environment: Environment,

    /// Redis connection URL. `None` runs with in-memory storage and a
    /// local-only broadcast channel.
    pub redis_url: Option<SecretString>,

    /// Workers spawned at startup.
    pub num_workers: usize,

    /// Worker count health checks expect.
    pub recommended_workers: usize,

    /// Average routers per worker above which health is degraded.
    pub max_avg_routers_per_worker: f64,

    /// IP address transports listen on.
    pub listen_ip: IpAddr,

    /// Address announced in ICE candidates (public IP or hostname).
    pub announced_address: Option<String>,

    /// RTC port range lower bound (inclusive).
    pub rtc_min_port: u16,

    /// RTC port range upper bound (inclusive).
    pub rtc_max_port: u16,

    /// Broadcast topic for load samples.
    pub load_topic: String,

    /// Period between load publications.
    pub load_broadcast_interval: Duration,

    /// Period of the hanging-transport job.
    pub hanging_check_interval: Duration,

    /// Age after which a transport is closed by the hanging-transport job.
    pub hanging_transport_threshold: Duration,

    /// Whether new consumers start paused.
    pub consumers_start_paused: bool,

    /// Health/diagnostics/metrics HTTP bind address.
    pub health_bind_address: String,
}

/// Custom Debug implementation that redacts the Redis URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_id", &self.server_id)
            .field("environment", &self.environment)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("num_workers", &self.num_workers)
            .field("recommended_workers", &self.recommended_workers)
            .field("max_avg_routers_per_worker", &self.max_avg_routers_per_worker)
            .field("listen_ip", &self.listen_ip)
            .field("announced_address", &self.announced_address)
            .field("rtc_min_port", &self.rtc_min_port)
            .field("rtc_max_port", &self.rtc_max_port)
            .field("load_topic", &self.load_topic)
            .field("load_broadcast_interval", &self.load_broadcast_interval)
            .field("hanging_check_interval", &self.hanging_check_interval)
            .field("hanging_transport_threshold", &self.hanging_transport_threshold)
            .field("consumers_start_paused", &self.consumers_start_paused)
            .field("health_bind_address", &self.health_bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional variable, failing on malformed values instead of
/// silently falling back to the default.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let environment = match vars.get("MO_ENVIRONMENT") {
            Some(value) => Environment::parse(value)?,
            None => Environment::Development,
        };

        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let num_workers = parse_var(vars, "MO_NUM_WORKERS", DEFAULT_NUM_WORKERS)?;
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "MO_NUM_WORKERS must be at least 1".to_string(),
            ));
        }

        let recommended_workers =
            parse_var(vars, "MO_RECOMMENDED_WORKERS", DEFAULT_RECOMMENDED_WORKERS)?;

        let max_avg_routers_per_worker = parse_var(
            vars,
            "MO_MAX_AVG_ROUTERS_PER_WORKER",
            DEFAULT_MAX_AVG_ROUTERS_PER_WORKER,
        )?;

        let listen_ip = parse_var(
            vars,
            "MO_LISTEN_IP",
            IpAddr::from([0u8, 0, 0, 0]),
        )?;

        let announced_address = vars
            .get("MO_ANNOUNCED_ADDRESS")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let rtc_min_port = parse_var(vars, "MO_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "MO_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "MO_RTC_MIN_PORT ({rtc_min_port}) must not exceed MO_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let load_topic = vars
            .get("MO_LOAD_TOPIC")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOAD_TOPIC.to_string());

        let load_broadcast_interval_ms = parse_var(
            vars,
            "MO_LOAD_BROADCAST_INTERVAL_MS",
            DEFAULT_LOAD_BROADCAST_INTERVAL_MS,
        )?;
        if load_broadcast_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MO_LOAD_BROADCAST_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let hanging_check_interval_seconds = parse_var(
            vars,
            "MO_HANGING_CHECK_INTERVAL_SECONDS",
            DEFAULT_HANGING_CHECK_INTERVAL_SECONDS,
        )?;
        if hanging_check_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "MO_HANGING_CHECK_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let hanging_transport_threshold_seconds = parse_var(
            vars,
            "MO_HANGING_TRANSPORT_THRESHOLD_SECONDS",
            DEFAULT_HANGING_TRANSPORT_THRESHOLD_SECONDS,
        )?;

        let consumers_start_paused = parse_var(vars, "MO_CONSUMERS_START_PAUSED", false)?;

        let health_bind_address = vars
            .get("MO_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        // Generate server instance ID
        let server_id = vars.get("MO_SERVER_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            server_id: ServerId(server_id),
            environment,
            redis_url,
            num_workers,
            recommended_workers,
            max_avg_routers_per_worker,
            listen_ip,
            announced_address,
            rtc_min_port,
            rtc_max_port,
            load_topic,
            load_broadcast_interval: Duration::from_millis(load_broadcast_interval_ms),
            hanging_check_interval: Duration::from_secs(hanging_check_interval_seconds),
            hanging_transport_threshold: Duration::from_secs(hanging_transport_threshold_seconds),
            consumers_start_paused,
            health_bind_address,
        })
    }
}
