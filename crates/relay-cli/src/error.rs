use thiserror::Error;

/// Errors that can occur in the relay command line
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] relay_config::ConfigError),

    #[error("Pub/Sub error: {0}")]
    PubSub(#[from] relay_pubsub::PubSubError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
