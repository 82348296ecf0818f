use crate::{ConfigError, Result};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Broker connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct PubSubConfig {
    /// Project every topic and subscription lives in
    pub project_id: String,
    /// Emulator `host:port`; unset means the in-process broker
    pub emulator_host: Option<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: "test-project".to_string(),
            emulator_host: None,
        }
    }
}

impl PubSubConfig {
    /// Check if an emulator host is configured
    pub fn uses_emulator(&self) -> bool {
        self.emulator_host
            .as_deref()
            .is_some_and(|host| !host.trim().is_empty())
    }

    /// Validate the broker configuration
    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(ConfigError::validation("pubsub", "project_id cannot be empty"));
        }

        let valid_project = self
            .project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':');
        if !valid_project {
            return Err(ConfigError::validation(
                "pubsub",
                format!("invalid project_id: {}", self.project_id),
            ));
        }

        if let Some(host) = self.emulator_host.as_deref().filter(|_| self.uses_emulator()) {
            let with_scheme = if host.contains("://") {
                host.to_string()
            } else {
                format!("http://{host}")
            };
            let parsed = url::Url::parse(&with_scheme)
                .map_err(|e| {
                    ConfigError::validation("pubsub", format!("invalid emulator_host: {e}"))
                })?;
            if parsed.host_str().is_none() {
                return Err(ConfigError::validation(
                    "pubsub",
                    format!("emulator_host has no hostname: {host}"),
                ));
            }
        }

        Ok(())
    }
}
