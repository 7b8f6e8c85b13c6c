//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::StatusPolicy;
use thiserror::Error;

/// Which side of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceRole {
    /// Trip and rating endpoints, the outbox relay and the consumer.
    #[default]
    All,
    /// Trip endpoints and the outbox relay.
    Trip,
    /// Rating endpoints and the consumer.
    Rating,
}

impl ServiceRole {
    pub fn serves_trips(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Trip)
    }

    pub fn serves_ratings(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Rating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::All => "all",
            ServiceRole::Trip => "trip",
            ServiceRole::Rating => "rating",
        }
    }
}

impl FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ServiceRole::All),
            "trip" => Ok(ServiceRole::Trip),
            "rating" => Ok(ServiceRole::Rating),
            _ => Err(ConfigError::Invalid {
                key: "SERVICE_ROLE",
                value: s.to_string(),
            }),
        }
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::Invalid {
                key: "LOG_FORMAT",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{set} is set but {missing} is not")]
    Incomplete {
        set: &'static str,
        missing: &'static str,
    },

    #[error("SERVICE_ROLE={0} needs KAFKA_BROKERS; the in-memory channel cannot cross processes")]
    RoleNeedsBroker(&'static str),
}

/// Server configuration with sensible defaults.
///
/// Unset `DATABASE_URL`, driver/passenger URLs and `KAFKA_BROKERS` select
/// the in-memory store, directory and channel respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub role: ServiceRole,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub driver_service_url: Option<String>,
    pub passenger_service_url: Option<String>,
    pub verifier_timeout: Duration,
    pub verifier_max_attempts: u32,
    pub verifier_backoff: Duration,
    /// Ids the in-memory directory knows when no lookup URLs are set.
    pub local_driver_ids: Vec<i64>,
    pub local_passenger_ids: Vec<i64>,
    pub kafka_brokers: Option<String>,
    pub rating_topic: String,
    pub rating_group: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    /// How long an outbox entry stays with the request or relay that claimed it.
    pub outbox_claim_lease: Duration,
    pub status_policy: StatusPolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&get, "LOG_FORMAT", defaults.log_format)?,
            role: parse(&get, "SERVICE_ROLE", defaults.role)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            driver_service_url: get("DRIVER_SERVICE_URL"),
            passenger_service_url: get("PASSENGER_SERVICE_URL"),
            verifier_timeout: millis(&get, "VERIFIER_TIMEOUT_MS", defaults.verifier_timeout)?,
            verifier_max_attempts: parse(
                &get,
                "VERIFIER_MAX_ATTEMPTS",
                defaults.verifier_max_attempts,
            )?,
            verifier_backoff: millis(&get, "VERIFIER_BACKOFF_MS", defaults.verifier_backoff)?,
            local_driver_ids: id_list(&get, "LOCAL_DRIVER_IDS", defaults.local_driver_ids)?,
            local_passenger_ids: id_list(
                &get,
                "LOCAL_PASSENGER_IDS",
                defaults.local_passenger_ids,
            )?,
            kafka_brokers: get("KAFKA_BROKERS"),
            rating_topic: get("RATING_TOPIC").unwrap_or(defaults.rating_topic),
            rating_group: get("RATING_GROUP").unwrap_or(defaults.rating_group),
            outbox_poll_interval: millis(
                &get,
                "OUTBOX_POLL_INTERVAL_MS",
                defaults.outbox_poll_interval,
            )?,
            outbox_batch_size: parse(&get, "OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,
            outbox_claim_lease: millis(
                &get,
                "OUTBOX_CLAIM_LEASE_MS",
                defaults.outbox_claim_lease,
            )?,
            status_policy: match get("STATUS_POLICY") {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    key: "STATUS_POLICY",
                    value,
                })?,
                None => defaults.status_policy,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.driver_service_url, &self.passenger_service_url) {
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    set: "DRIVER_SERVICE_URL",
                    missing: "PASSENGER_SERVICE_URL",
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    set: "PASSENGER_SERVICE_URL",
                    missing: "DRIVER_SERVICE_URL",
                });
            }
            _ => {}
        }
        if self.role != ServiceRole::All && self.kafka_brokers.is_none() {
            return Err(ConfigError::RoleNeedsBroker(self.role.as_str()));
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            role: ServiceRole::All,
            database_url: None,
            database_max_connections: 5,
            driver_service_url: None,
            passenger_service_url: None,
            verifier_timeout: Duration::from_millis(2000),
            verifier_max_attempts: 3,
            verifier_backoff: Duration::from_millis(100),
            local_driver_ids: (1..=10).collect(),
            local_passenger_ids: (1..=10).collect(),
            kafka_brokers: None,
            rating_topic: pipeline::RATING_TOPIC.to_string(),
            rating_group: pipeline::RATING_GROUP.to_string(),
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_batch_size: 50,
            outbox_claim_lease: pipeline::DEFAULT_CLAIM_LEASE,
            status_policy: StatusPolicy::Unrestricted,
        }
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn id_list(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Vec<i64>,
) -> Result<Vec<i64>, ConfigError> {
    let Some(value) = get(key) else {
        return Ok(default);
    };
    value
        .split(',')
        .map(|id| id.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.rating_topic, "rating-topic");
        assert_eq!(config.rating_group, "rating-group");
        assert_eq!(config.verifier_timeout, Duration::from_secs(2));
        assert_eq!(config.status_policy, StatusPolicy::Unrestricted);
    }

    #[test]
    fn test_addr_formatting() {
        let config = load(&[("HOST", "127.0.0.1"), ("PORT", "8080")]).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("LOG_FORMAT", "JSON"),
            ("STATUS_POLICY", "strict"),
            ("OUTBOX_POLL_INTERVAL_MS", "250"),
            ("OUTBOX_CLAIM_LEASE_MS", "5000"),
            ("LOCAL_DRIVER_IDS", "4, 5"),
            ("DRIVER_SERVICE_URL", "http://drivers/api/v1/drivers"),
            ("PASSENGER_SERVICE_URL", "http://passengers/api/v1/passengers"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.status_policy, StatusPolicy::Strict);
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(250));
        assert_eq!(config.outbox_claim_lease, Duration::from_secs(5));
        assert_eq!(config.local_driver_ids, vec![4, 5]);
    }

    #[test]
    fn test_invalid_port() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn test_half_configured_verifier() {
        let err = load(&[("DRIVER_SERVICE_URL", "http://drivers")]).unwrap_err();
        assert!(matches!(err, ConfigError::Incomplete { .. }));
    }

    #[test]
    fn test_split_roles_need_broker() {
        assert_eq!(
            load(&[("SERVICE_ROLE", "trip")]).unwrap_err(),
            ConfigError::RoleNeedsBroker("trip")
        );
        let config = load(&[("SERVICE_ROLE", "rating"), ("KAFKA_BROKERS", "kafka:9092")]).unwrap();
        assert!(config.role.serves_ratings());
        assert!(!config.role.serves_trips());
    }
}
