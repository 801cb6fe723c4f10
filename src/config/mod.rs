//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// What happens when the deployment countdown runs out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Keep waiting for every participant
    Wait,
    /// Start the battle with whatever was submitted
    ForceStart,
    /// Close the room and release the participants
    Close,
}

impl FromStr for TimeoutPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(TimeoutPolicy::Wait),
            "force_start" => Ok(TimeoutPolicy::ForceStart),
            "close" => Ok(TimeoutPolicy::Close),
            _ => Err(ConfigError::Invalid(
                "DEPLOYMENT_TIMEOUT_POLICY",
                format!("unknown policy '{s}'"),
            )),
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
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
    /// Allowed client origins for CORS (`*` = any)
    pub client_origin: String,

    /// Scheduler ticks per second
    pub update_rate: u32,

    pub stage_width: i32,
    pub stage_height: i32,
    /// Columns per deployment zone
    pub deployment_depth: i32,
    /// Units per participant
    pub deployment_max: usize,
    pub deployment_timeout_secs: f32,
    pub deployment_timeout_policy: TimeoutPolicy,

    pub turn_interval_base: f32,
    pub turn_interval_per_entity: f32,
    pub turn_interval_floor: f32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:3010".to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: match lookup("LOG_FORMAT") {
                Some(format) => match format.trim().to_ascii_lowercase().as_str() {
                    "json" => true,
                    "text" => false,
                    _ => {
                        return Err(ConfigError::Invalid(
                            "LOG_FORMAT",
                            format!("unknown format '{format}'"),
                        ))
                    }
                },
                None => false,
            },
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            update_rate: parse_or(&lookup, "UPDATE_RATE", 60)?,

            stage_width: parse_or(&lookup, "STAGE_WIDTH", 7)?,
            stage_height: parse_or(&lookup, "STAGE_HEIGHT", 7)?,
            deployment_depth: parse_or(&lookup, "DEPLOYMENT_DEPTH", 2)?,
            deployment_max: parse_or(&lookup, "DEPLOYMENT_MAX", 4)?,
            deployment_timeout_secs: parse_or(&lookup, "DEPLOYMENT_TIMEOUT_SECS", 60.0)?,
            deployment_timeout_policy: match lookup("DEPLOYMENT_TIMEOUT_POLICY") {
                Some(raw) => raw.parse()?,
                None => TimeoutPolicy::Close,
            },

            turn_interval_base: parse_or(&lookup, "TURN_INTERVAL_BASE", 1.4)?,
            turn_interval_per_entity: parse_or(&lookup, "TURN_INTERVAL_PER_ENTITY", 0.2)?,
            turn_interval_floor: parse_or(&lookup, "TURN_INTERVAL_FLOOR", 0.5)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.update_rate == 0 {
            return Err(ConfigError::Invalid("UPDATE_RATE", "must be positive".into()));
        }
        if self.stage_width <= 0 || self.stage_height <= 0 {
            return Err(ConfigError::Invalid(
                "STAGE_WIDTH",
                "stage dimensions must be positive".into(),
            ));
        }
        if self.deployment_depth <= 0 || 2 * self.deployment_depth > self.stage_width {
            return Err(ConfigError::Invalid(
                "DEPLOYMENT_DEPTH",
                format!(
                    "two zones of depth {} do not fit a stage {} wide",
                    self.deployment_depth, self.stage_width
                ),
            ));
        }
        if self.deployment_max == 0 {
            return Err(ConfigError::Invalid("DEPLOYMENT_MAX", "must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, format!("cannot parse '{raw}'"))),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
