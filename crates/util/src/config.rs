use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/";
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_DELAY_SECS: f64 = 60.0;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Which transport inbound webhooks are relayed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Fan out to websocket subscribers connected to this process.
    Direct,
    /// Publish to a Pub/Sub topic.
    Durable,
}

impl RelayMode {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "direct" | "websocket" => Ok(Self::Direct),
            "durable" | "pubsub" => Ok(Self::Durable),
            other => Err(ConfigError::InvalidRelayMode(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Durable => "durable",
        }
    }
}

/// Pub/Sub destination used by the durable relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic_id: String,
    pub endpoint: String,
    pub access_token: Option<String>,
}

impl PubSubConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let project_id = required_var("GCP_PROJECT")?;
        let topic_id = required_var("TOPIC_ID")?;
        let endpoint = optional_var("PUBSUB_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_PUBSUB_ENDPOINT.to_string());
        let access_token = optional_var("PUBSUB_ACCESS_TOKEN");

        Ok(Self {
            project_id,
            topic_id,
            endpoint,
            access_token,
        })
    }

    /// Fully qualified topic name, `projects/{project}/topics/{topic}`.
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic_id)
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub relay_mode: RelayMode,
    /// Present only when `relay_mode` is [`RelayMode::Durable`].
    pub pubsub: Option<PubSubConfig>,
    pub publish_timeout: Duration,
    pub max_delay_secs: f64,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let mode_value = env::var("RELAY_MODE").unwrap_or_else(|_| "direct".to_string());
        let relay_mode = RelayMode::from_str(&mode_value)?;
        let pubsub = match relay_mode {
            RelayMode::Durable => Some(PubSubConfig::from_env()?),
            RelayMode::Direct => None,
        };

        let publish_timeout = match optional_var("RELAY_PUBLISH_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidNumber {
                    name: "RELAY_PUBLISH_TIMEOUT_SECS",
                    value: raw,
                })?,
            None => Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
        };

        let max_delay_secs = match optional_var("RELAY_MAX_DELAY_SECS") {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "RELAY_MAX_DELAY_SECS",
                    value: raw,
                })?,
            None => DEFAULT_MAX_DELAY_SECS,
        };

        Ok(Self {
            bind_addr,
            environment,
            relay_mode,
            pubsub,
            publish_timeout,
            max_delay_secs,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name).ok_or(ConfigError::MissingVariable(name))
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    InvalidRelayMode(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::InvalidRelayMode(value) => write!(
                f,
                "RELAY_MODE must be one of 'direct' or 'durable' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(name) => {
                write!(f, "{name} must be set for the durable relay")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative number (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
