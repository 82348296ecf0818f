//! # relay-config
//!
//! Layered configuration for the relay tooling.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! - Built-in defaults
//! - An optional TOML file
//! - `RELAY_` prefixed environment variables, `__` separating sections
//!   (`RELAY_LISTENER__MAX_CONCURRENCY=4`)
//! - The well-known `PUBSUB_EMULATOR_HOST` and `PUBSUB_PROJECT_ID` variables

pub mod error;
pub mod listener;
pub mod loader;
pub mod pubsub;
pub mod subscription;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

pub use error::{ConfigError, Result};
pub use listener::{ListenerConfig, MAX_LISTENER_CONCURRENCY};
pub use loader::{ConfigLoader, EMULATOR_HOST_VAR, PROJECT_ID_VAR};
pub use pubsub::PubSubConfig;
pub use subscription::SubscriptionConfig;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct Config {
    /// Broker connection
    pub pubsub: PubSubConfig,
    /// Subscription defaults
    pub subscription: SubscriptionConfig,
    /// Pull loop tuning
    pub listener: ListenerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Check if logs should be emitted as JSON
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Config {
    /// Load configuration from default sources
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &str) -> Result<Self> {
        ConfigLoader::new().with_file(path).load()
    }

    /// Parse a TOML document, filling gaps with defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.pubsub.validate()?;
        self.subscription.validate()?;
        self.listener.validate()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_logging(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        // Full EnvFilter directives such as "relay_pubsub=debug" are passed through.
        if !self.logging.level.contains('=')
            && !valid_levels.contains(&self.logging.level.as_str())
        {
            return Err(ConfigError::validation(
                "logging",
                format!(
                    "invalid level: {}. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::validation(
                "logging",
                format!(
                    "invalid format: {}. Must be one of: {}",
                    self.logging.format,
                    valid_formats.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_default() {
        let actual = Config::default();
        assert_eq!(actual.pubsub.project_id, "test-project");
        assert_eq!(actual.subscription.max_delivery_attempts, 15);
        assert_eq!(actual.listener.batch_size, 10);
        assert_eq!(actual.logging.level, "info");
    }

    #[test]
    fn test_logging_config_default() {
        let actual = LoggingConfig::default();
        let expected = LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        };
        assert_eq!(actual, expected);
        assert!(!actual.is_json());
    }

    #[test]
    fn test_config_setters() {
        let actual = Config::default()
            .logging(LoggingConfig::default().level("debug"))
            .pubsub(PubSubConfig::default().emulator_host("localhost:8085"));

        assert_eq!(actual.logging.level, "debug");
        assert_eq!(actual.pubsub.emulator_host.as_deref(), Some("localhost:8085"));
    }

    #[test]
    fn test_config_validation_success() {
        let fixture = Config::default();
        let actual = fixture.validate();
        assert!(actual.is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let fixture = Config::default().logging(LoggingConfig::default().level("invalid"));

        let actual = fixture.validate();
        assert!(actual.is_err());
    }

    #[test]
    fn test_config_validation_accepts_filter_directive() {
        let fixture =
            Config::default().logging(LoggingConfig::default().level("relay_pubsub=debug"));

        let actual = fixture.validate();
        assert!(actual.is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let fixture = Config::default().logging(LoggingConfig::default().format("xml"));

        let actual = fixture.validate();
        assert!(actual.is_err());
    }

    #[test]
    fn test_config_validation_propagates_section_errors() {
        let fixture = Config::default()
            .subscription(SubscriptionConfig::default().ack_deadline_seconds(5u32));

        let actual = fixture.validate();
        assert!(matches!(actual, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let fixture = r#"
[pubsub]
project_id = "vknc-253703"

[subscription]
filter = 'attributes.test="event.message.string"'
"#;

        let actual = Config::from_toml_str(fixture).unwrap();
        assert_eq!(actual.pubsub.project_id, "vknc-253703");
        assert_eq!(
            actual.subscription.filter.as_deref(),
            Some(r#"attributes.test="event.message.string""#)
        );
        assert_eq!(actual.listener, ListenerConfig::default());
    }

    #[test]
    fn test_config_toml_round_trip() {
        let fixture =
            Config::default().pubsub(PubSubConfig::default().emulator_host("localhost:8085"));
        let rendered = fixture.to_toml_string().unwrap();
        let actual = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(actual, fixture);
    }
}
