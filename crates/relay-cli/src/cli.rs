use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default topic used by the demo flow
pub const DEMO_TOPIC: &str = "topic-name";

/// Default subscription used by the demo flow
pub const DEMO_SUBSCRIPTION: &str = "subscription-name";

/// Default filter used by the demo flow
pub const DEMO_FILTER: &str = r#"attributes.test="event.message.string""#;

/// Relay - provision, publish and listen on a Pub/Sub broker
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Idempotent Pub/Sub provisioning and message exchange")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Project ID, overrides the configuration
    #[arg(long)]
    pub project_id: Option<String>,

    /// Emulator host:port, overrides the configuration
    #[arg(long)]
    pub emulator_host: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Ensure a topic and optionally a subscription exist
    Provision {
        /// Topic name
        #[arg(long)]
        topic: String,

        /// Subscription name
        #[arg(long)]
        subscription: Option<String>,

        /// Attribute filter for the subscription
        #[arg(long, requires = "subscription")]
        filter: Option<String>,
    },
    /// Publish one JSON payload
    Publish {
        /// Topic name
        #[arg(long)]
        topic: String,

        /// JSON payload
        payload: String,

        /// Attribute as key=value, repeatable
        #[arg(short, long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Ordering key
        #[arg(long)]
        ordering_key: Option<String>,
    },
    /// Log every message delivered on a subscription until interrupted
    Listen {
        /// Subscription name
        #[arg(long)]
        subscription: String,

        /// Stop after this many messages
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_messages: Option<u64>,
    },
    /// Provision, publish a matching and a non-matching message, then listen
    Demo {
        /// Topic name
        #[arg(long, default_value = DEMO_TOPIC)]
        topic: String,

        /// Subscription name
        #[arg(long, default_value = DEMO_SUBSCRIPTION)]
        subscription: String,

        /// Attribute filter for the subscription
        #[arg(long, default_value = DEMO_FILTER)]
        filter: String,

        /// Seconds to wait for the filtered message
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(long)]
        show: bool,
    },
    /// Generate default configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "relay.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse a `key=value` attribute
pub fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

impl Args {
    /// Get the effective configuration file path
    pub fn config_file(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    /// Get the command to execute, the demo when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_else(|| Commands::Demo {
            topic: DEMO_TOPIC.to_string(),
            subscription: DEMO_SUBSCRIPTION.to_string(),
            filter: DEMO_FILTER.to_string(),
            timeout_secs: 10,
        })
    }
}
