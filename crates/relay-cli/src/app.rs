use crate::cli::Args;
use crate::error::{CliError, Result};
use relay_config::{
    Config, ConfigLoader, ListenerConfig, LoggingConfig, PubSubConfig, SubscriptionConfig,
};
use relay_pubsub::{
    BrokerClient, DiagnosticHandler, EmulatorClient, InMemoryBroker, ListenOptions,
    ListenerStats, Provisioner, PublishOptions, PublishReceipt, Publisher, Subscriber,
    Subscription, SubscriptionOptions, Topic,
};
use serde_json::{Value, json};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Attribute the demo subscription filters on
pub const DEMO_ATTRIBUTE_KEY: &str = "test";

/// Value of [`DEMO_ATTRIBUTE_KEY`] carried by the matching demo message
pub const DEMO_ATTRIBUTE_VALUE: &str = "event.message.string";

/// Load configuration from file and environment, then apply command line overrides
pub fn load_config(args: &Args) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = args.config_file() {
        loader = loader.with_file(&path.to_string_lossy());
    }

    let mut config = loader.load()?;
    apply_overrides(&mut config, args);
    config.validate()?;

    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(project_id) = &args.project_id {
        config.pubsub.project_id = project_id.clone();
    }
    if let Some(host) = &args.emulator_host {
        config.pubsub.emulator_host = Some(host.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

/// Initialize the global subscriber from the logging configuration.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}

/// Pick the broker client: the emulator when a host is configured, the in-process broker otherwise
pub fn build_client(config: &PubSubConfig) -> Arc<dyn BrokerClient> {
    match config.emulator_host.as_deref() {
        Some(host) if config.uses_emulator() => {
            info!(
                "Using Pub/Sub emulator at {} for project '{}'",
                host, config.project_id
            );
            Arc::new(EmulatorClient::new(host, config.project_id.clone()))
        }
        _ => {
            info!(
                "No emulator host configured, using the in-process broker for project '{}'",
                config.project_id
            );
            Arc::new(InMemoryBroker::new(config.project_id.clone()))
        }
    }
}

/// Convert configured subscription defaults into creation options
pub fn subscription_options(config: &SubscriptionConfig) -> SubscriptionOptions {
    SubscriptionOptions {
        filter: config.filter.clone(),
        max_delivery_attempts: config.max_delivery_attempts,
        ack_deadline_seconds: config.ack_deadline_seconds,
        enable_message_ordering: config.enable_message_ordering,
        dead_letter_topic: config.dead_letter_topic.clone(),
    }
}

/// Convert the listener section into pull loop options
pub fn listen_options(config: &ListenerConfig) -> ListenOptions {
    ListenOptions::new()
        .batch_size(config.batch_size)
        .poll_interval(config.poll_interval())
        .error_backoff(config.error_backoff())
        .max_concurrency(config.max_concurrency)
}

/// Write the default configuration to `output`
pub fn init_config(output: &Path, force: bool) -> Result<()> {
    info!("Initializing configuration file: {:?}", output);

    if output.exists() && !force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists, use --force to overwrite",
            output.display()
        )));
    }

    std::fs::write(output, Config::default().to_toml_string()?)?;

    info!("Configuration file created: {:?}", output);
    Ok(())
}

/// Command runner bound to one configuration and broker client
pub struct App {
    config: Config,
    client: Arc<dyn BrokerClient>,
}

impl App {
    /// Create an app with the client selected by the configuration
    pub fn new(config: Config) -> Self {
        let client = build_client(&config.pubsub);
        Self::with_client(config, client)
    }

    /// Create an app around an existing client
    pub fn with_client(config: Config, client: Arc<dyn BrokerClient>) -> Self {
        Self { config, client }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.client.clone())
            .with_defaults(subscription_options(&self.config.subscription))
    }

    /// Ensure `topic` and, when given, `subscription` exist.
    ///
    /// Without an explicit filter the configured default filter applies.
    pub async fn provision(
        &self,
        topic: &str,
        subscription: Option<&str>,
        filter: Option<&str>,
    ) -> Result<(Topic, Option<Subscription>)> {
        let provisioner = self.provisioner();
        let topic = provisioner.ensure_topic(topic).await?;

        let subscription = match subscription {
            Some(name) => Some(provisioner.ensure_subscription(&topic, name, filter).await?),
            None => None,
        };

        Ok((topic, subscription))
    }

    /// Ensure `topic` exists and publish a JSON payload to it
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        attributes: Vec<(String, String)>,
        ordering_key: Option<String>,
    ) -> Result<PublishReceipt<Value>> {
        let payload: Value = serde_json::from_str(payload).map_err(|e| {
            CliError::InvalidArgument(format!("payload is not valid JSON: {e}"))
        })?;

        let topic = self.provisioner().ensure_topic(topic).await?;

        let mut options = PublishOptions::new();
        for (key, value) in attributes {
            options = options.attribute(key, value);
        }
        if let Some(key) = ordering_key {
            options = options.ordering_key(key);
        }

        Ok(Publisher::new(self.client.clone())
            .publish(&topic, payload, options)
            .await?)
    }

    /// Log and acknowledge every delivery on `subscription` until `stop`
    /// resolves or `max_messages` have been received.
    pub async fn listen_until<F>(
        &self,
        subscription: &str,
        max_messages: Option<u64>,
        stop: F,
    ) -> Result<ListenerStats>
    where
        F: Future,
    {
        let subscription = self.client.subscription(subscription);
        let received = Arc::new(AtomicU64::new(0));
        let limit_reached = Arc::new(Notify::new());

        let handler = {
            let received = received.clone();
            let limit_reached = limit_reached.clone();
            DiagnosticHandler::new().with_processor(move |_record| {
                let count = received.fetch_add(1, Ordering::SeqCst) + 1;
                if max_messages.is_some_and(|max| count >= max) {
                    limit_reached.notify_one();
                }
                Ok(())
            })
        };

        let mut listener = Subscriber::new(self.client.clone())
            .with_options(listen_options(&self.config.listener))
            .listen(subscription, Arc::new(handler));

        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Stop requested, shutting down listener");
                    break;
                }
                _ = limit_reached.notified() => {
                    info!(
                        "Received {} message(s), shutting down listener",
                        received.load(Ordering::SeqCst)
                    );
                    break;
                }
                Some(error) = listener.next_error() => {
                    warn!("{}", error);
                }
            }
        }

        let stats = listener.shutdown().await?;
        info!(
            "Listener stopped: {} received, {} handled, {} handler failures, {} delivery errors",
            stats.messages_received,
            stats.messages_handled,
            stats.handler_failures,
            stats.delivery_errors
        );
        Ok(stats)
    }

    /// Provision a filtered subscription, publish one matching and one
    /// non-matching message, then wait for the matching one.
    pub async fn demo(
        &self,
        topic: &str,
        subscription: &str,
        filter: &str,
        timeout: Duration,
    ) -> Result<ListenerStats> {
        let (topic, _) = self
            .provision(topic, Some(subscription), Some(filter))
            .await?;

        let publisher = Publisher::new(self.client.clone());
        let matching = publisher
            .publish(
                &topic,
                json!({"message": "test with filter"}),
                PublishOptions::new().attribute(DEMO_ATTRIBUTE_KEY, DEMO_ATTRIBUTE_VALUE),
            )
            .await?;
        info!(
            "Published message {} with attributes {:?}",
            matching.message_id, matching.attributes
        );

        let unmatched = publisher
            .publish(
                &topic,
                json!({"message": "test without filter"}),
                PublishOptions::new(),
            )
            .await?;
        info!("Published message {} without attributes", unmatched.message_id);

        let stats = self
            .listen_until(subscription, Some(1), tokio::time::sleep(timeout))
            .await?;

        if stats.messages_handled == 0 {
            return Err(CliError::Timeout(format!(
                "no message delivered on '{subscription}' within {timeout:?}"
            )));
        }

        Ok(stats)
    }
}
