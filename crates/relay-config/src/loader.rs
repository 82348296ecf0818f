use crate::{Config, ConfigError, Result};
use config::{ConfigBuilder, Environment, File};
use std::env;
use std::path::Path;

/// Variable read by every Pub/Sub client library to locate the emulator
pub const EMULATOR_HOST_VAR: &str = "PUBSUB_EMULATOR_HOST";

/// Variable naming the project when no configuration sets one
pub const PROJECT_ID_VAR: &str = "PUBSUB_PROJECT_ID";

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    builder: ConfigBuilder<config::builder::DefaultState>,
    env_prefix: String,
    files: Vec<String>,
    emulator_host_var: Option<String>,
    project_id_var: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
            env_prefix: "RELAY".to_string(),
            files: Vec::new(),
            emulator_host_var: Some(EMULATOR_HOST_VAR.to_string()),
            project_id_var: Some(PROJECT_ID_VAR.to_string()),
        }
    }

    /// Add a configuration file
    pub fn with_file(mut self, path: &str) -> Self {
        self.files.push(path.to_string());
        self
    }

    /// Set environment variable prefix
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    /// Read the emulator host from `name` instead of `PUBSUB_EMULATOR_HOST`
    pub fn with_emulator_host_var(mut self, name: &str) -> Self {
        self.emulator_host_var = Some(name.to_string());
        self
    }

    /// Read the project ID from `name` instead of `PUBSUB_PROJECT_ID`
    pub fn with_project_id_var(mut self, name: &str) -> Self {
        self.project_id_var = Some(name.to_string());
        self
    }

    /// Ignore the well-known Pub/Sub variables
    pub fn without_well_known_env(mut self) -> Self {
        self.emulator_host_var = None;
        self.project_id_var = None;
        self
    }

    fn read_var(name: Option<&str>) -> Result<Option<String>> {
        let Some(name) = name else {
            return Ok(None);
        };

        match env::var(name) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => {
                Err(ConfigError::environment(name, "not valid unicode"))
            }
        }
    }

    /// Load configuration from all sources
    pub fn load(mut self) -> Result<Config> {
        // Add default configuration
        self.builder = self.builder.set_default("pubsub.project_id", "test-project")?;
        self.builder = self
            .builder
            .set_default("subscription.max_delivery_attempts", 15)?;
        self.builder = self
            .builder
            .set_default("subscription.ack_deadline_seconds", 10)?;
        self.builder = self
            .builder
            .set_default("subscription.enable_message_ordering", false)?;
        self.builder = self.builder.set_default("listener.batch_size", 10)?;
        self.builder = self.builder.set_default("listener.poll_interval_ms", 100)?;
        self.builder = self.builder.set_default("listener.error_backoff_ms", 1000)?;
        self.builder = self.builder.set_default("listener.max_concurrency", 1)?;
        self.builder = self.builder.set_default("logging.level", "info")?;
        self.builder = self.builder.set_default("logging.format", "pretty")?;

        // Add configuration files
        for file_path in &self.files {
            if Path::new(file_path).exists() {
                self.builder = self.builder.add_source(File::with_name(file_path));
            } else {
                return Err(ConfigError::file_not_found(file_path));
            }
        }

        // Add environment variables
        self.builder = self.builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Well-known variables win over everything else
        let emulator_host = Self::read_var(self.emulator_host_var.as_deref())?;
        let project_id = Self::read_var(self.project_id_var.as_deref())?;
        self.builder = self
            .builder
            .set_override_option("pubsub.emulator_host", emulator_host)?;
        self.builder = self
            .builder
            .set_override_option("pubsub.project_id", project_id)?;

        // Build and deserialize configuration
        let config = self.builder.build()?;
        let app_config: Config = config.try_deserialize()?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_config_loader_new() {
        let actual = ConfigLoader::new();
        assert_eq!(actual.env_prefix, "RELAY");
        assert!(actual.files.is_empty());
        assert_eq!(actual.emulator_host_var.as_deref(), Some("PUBSUB_EMULATOR_HOST"));
    }

    #[test]
    fn test_config_loader_with_file() {
        let fixture = ConfigLoader::new().with_file("relay.toml");
        assert_eq!(fixture.files, vec!["relay.toml"]);
    }

    #[test]
    fn test_config_loader_with_env_prefix() {
        let fixture = ConfigLoader::new().with_env_prefix("TEST");
        assert_eq!(fixture.env_prefix, "TEST");
    }

    #[test]
    fn test_config_loader_load_defaults() {
        let actual = ConfigLoader::new()
            .with_env_prefix("RELAY_TEST_DEFAULTS")
            .without_well_known_env()
            .load();
        assert!(actual.is_ok());

        let config = actual.unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_loader_load_with_env() {
        unsafe {
            env::set_var("RELAY_TEST_ENV_PUBSUB__PROJECT_ID", "env-project");
            env::set_var("RELAY_TEST_ENV_LISTENER__MAX_CONCURRENCY", "4");
        }

        let actual = ConfigLoader::new()
            .with_env_prefix("RELAY_TEST_ENV")
            .without_well_known_env()
            .load();

        // Clean up
        unsafe {
            env::remove_var("RELAY_TEST_ENV_PUBSUB__PROJECT_ID");
            env::remove_var("RELAY_TEST_ENV_LISTENER__MAX_CONCURRENCY");
        }

        let config = actual.unwrap();
        assert_eq!(config.pubsub.project_id, "env-project");
        assert_eq!(config.listener.max_concurrency, 4);
    }

    #[test]
    fn test_config_loader_well_known_vars_override() {
        unsafe {
            env::set_var("RELAY_TEST_WK_PUBSUB__PROJECT_ID", "prefixed-project");
            env::set_var("RELAY_TEST_WK_EMULATOR_HOST", "localhost:8085");
            env::set_var("RELAY_TEST_WK_PROJECT_ID", "well-known-project");
        }

        let actual = ConfigLoader::new()
            .with_env_prefix("RELAY_TEST_WK")
            .with_emulator_host_var("RELAY_TEST_WK_EMULATOR_HOST")
            .with_project_id_var("RELAY_TEST_WK_PROJECT_ID")
            .load();

        unsafe {
            env::remove_var("RELAY_TEST_WK_PUBSUB__PROJECT_ID");
            env::remove_var("RELAY_TEST_WK_EMULATOR_HOST");
            env::remove_var("RELAY_TEST_WK_PROJECT_ID");
        }

        let config = actual.unwrap();
        assert_eq!(config.pubsub.project_id, "well-known-project");
        assert_eq!(config.pubsub.emulator_host.as_deref(), Some("localhost:8085"));
    }

    #[test]
    fn test_config_loader_load_with_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
[pubsub]
project_id = "file-project"
emulator_host = "localhost:8085"

[subscription]
filter = 'attributes.kind="invoice"'
enable_message_ordering = true

[logging]
format = "json"
        "#
        )
        .unwrap();

        let actual = ConfigLoader::new()
            .with_env_prefix("RELAY_TEST_FILE")
            .without_well_known_env()
            .with_file(temp_file.path().to_str().unwrap())
            .load();
        assert!(actual.is_ok());

        let config = actual.unwrap();
        assert_eq!(config.pubsub.project_id, "file-project");
        assert!(config.pubsub.uses_emulator());
        assert_eq!(
            config.subscription.filter.as_deref(),
            Some(r#"attributes.kind="invoice""#)
        );
        assert!(config.subscription.enable_message_ordering);
        assert!(config.logging.is_json());
        assert_eq!(config.listener.batch_size, 10);
    }

    #[test]
    fn test_config_loader_rejects_invalid_values() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(temp_file, "[subscription]\nmax_delivery_attempts = 1").unwrap();

        let actual = ConfigLoader::new()
            .with_env_prefix("RELAY_TEST_INVALID")
            .without_well_known_env()
            .with_file(temp_file.path().to_str().unwrap())
            .load();
        assert!(matches!(actual, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_config_loader_load_file_not_found() {
        let actual = ConfigLoader::new().with_file("nonexistent.toml").load();
        assert!(matches!(actual, Err(ConfigError::FileNotFound { .. })));
    }
}
