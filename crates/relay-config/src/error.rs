use std::path::PathBuf;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A loaded value is out of range or malformed; `section` names the TOML table
    #[error("Invalid [{section}] configuration: {message}")]
    Validation {
        section: &'static str,
        message: String,
    },

    #[error("Environment variable {variable}: {message}")]
    Environment { variable: String, message: String },

    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Parse error: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("Render error: {source}")]
    Render {
        #[from]
        source: toml::ser::Error,
    },

    #[error("Failed to merge configuration sources: {source}")]
    Sources {
        #[from]
        source: config::ConfigError,
    },
}

impl ConfigError {
    /// Create a validation error for one configuration section
    pub fn validation(section: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            section,
            message: message.into(),
        }
    }

    /// Create an error for an unusable environment variable
    pub fn environment(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Environment {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Create an error for a missing configuration file
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
