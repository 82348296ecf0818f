use crate::{
    BrokerClient, BrokerError, BrokerResult, PubSubError, Result, Subscription,
    SubscriptionDescription, SubscriptionOptions, Topic, topic::short_topic_name,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Classified result of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The resource did not exist and was created
    Created,
    /// The broker reported the name as taken; treated as success
    AlreadyExists,
    /// Any other failure
    Failed(BrokerError),
}

impl CreateOutcome {
    /// Classify the result of a create call
    pub fn classify(result: BrokerResult<()>) -> Self {
        match result {
            Ok(()) => Self::Created,
            Err(e) if e.is_already_exists() => Self::AlreadyExists,
            Err(e) => Self::Failed(e),
        }
    }
}

/// A field on which an existing subscription differs from the requested one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDrift {
    /// Name of the differing field
    pub field: &'static str,
    /// Value requested by this process
    pub requested: String,
    /// Value held by the broker
    pub existing: String,
}

impl std::fmt::Display for ConfigDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: requested {}, existing {}",
            self.field, self.requested, self.existing
        )
    }
}

fn display_option(value: Option<&str>) -> String {
    value.map_or_else(|| "<none>".to_string(), |v| format!("{v:?}"))
}

/// Compare a requested subscription against the broker's description of it
pub fn detect_drift(
    topic: &Topic,
    options: &SubscriptionOptions,
    existing: &SubscriptionDescription,
) -> Vec<ConfigDrift> {
    let mut drift = Vec::new();

    let existing_topic = short_topic_name(&existing.topic);
    if existing_topic != topic.name() {
        drift.push(ConfigDrift {
            field: "topic",
            requested: topic.name().to_string(),
            existing: existing_topic.to_string(),
        });
    }

    if options.filter != existing.options.filter {
        drift.push(ConfigDrift {
            field: "filter",
            requested: display_option(options.filter.as_deref()),
            existing: display_option(existing.options.filter.as_deref()),
        });
    }

    if options.enable_message_ordering != existing.options.enable_message_ordering {
        drift.push(ConfigDrift {
            field: "enable_message_ordering",
            requested: options.enable_message_ordering.to_string(),
            existing: existing.options.enable_message_ordering.to_string(),
        });
    }

    let requested_dead_letter = options.dead_letter_topic.as_deref().map(short_topic_name);
    let existing_dead_letter = existing
        .options
        .dead_letter_topic
        .as_deref()
        .map(short_topic_name);
    if requested_dead_letter != existing_dead_letter {
        drift.push(ConfigDrift {
            field: "dead_letter_topic",
            requested: display_option(requested_dead_letter),
            existing: display_option(existing_dead_letter),
        });
    }

    drift
}

/// Idempotent topic and subscription provisioning.
///
/// Every ensure call makes exactly one create attempt; there is no existence
/// pre-check. An already-exists answer counts as success, anything else is
/// returned as [`PubSubError::Provisioning`].
#[derive(Clone)]
pub struct Provisioner {
    client: Arc<dyn BrokerClient>,
    defaults: SubscriptionOptions,
}

impl Provisioner {
    /// Create a provisioner with default subscription options
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            client,
            defaults: SubscriptionOptions::default(),
        }
    }

    /// Use `defaults` for subscriptions created by [`Self::ensure_subscription`]
    pub fn with_defaults(mut self, defaults: SubscriptionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Get the default subscription options
    pub fn defaults(&self) -> &SubscriptionOptions {
        &self.defaults
    }

    /// Ensure a topic exists and return its handle
    pub async fn ensure_topic(&self, name: &str) -> Result<Topic> {
        let outcome = CreateOutcome::classify(self.client.create_topic(name).await);
        match outcome {
            CreateOutcome::Created => info!("Topic '{}' created", name),
            CreateOutcome::AlreadyExists => debug!("Topic '{}' already exists", name),
            CreateOutcome::Failed(e) => return Err(PubSubError::provisioning(name, e)),
        }

        Ok(self.client.topic(name))
    }

    /// Ensure a subscription on `topic` exists, optionally filtered by attributes.
    ///
    /// `None` keeps the default filter; a blank filter means no filter.
    pub async fn ensure_subscription(
        &self,
        topic: &Topic,
        name: &str,
        filter: Option<&str>,
    ) -> Result<Subscription> {
        let mut options = self.defaults.clone();
        if let Some(filter) = filter {
            options.filter = Some(filter)
                .filter(|f| !f.trim().is_empty())
                .map(str::to_string);
        }
        self.ensure_subscription_with(topic, name, options).await
    }

    /// Ensure a subscription exists with explicit options
    pub async fn ensure_subscription_with(
        &self,
        topic: &Topic,
        name: &str,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        let outcome = CreateOutcome::classify(
            self.client
                .create_subscription(topic, name, &options)
                .await,
        );
        let subscription = self.client.subscription(name);

        match outcome {
            CreateOutcome::Created => {
                info!(
                    "Subscription '{}' created on topic '{}' with filter {:?}",
                    name, topic, options.filter
                );
            }
            CreateOutcome::AlreadyExists => {
                debug!("Subscription '{}' already exists", name);
                self.report_drift(topic, &subscription, &options).await;
            }
            CreateOutcome::Failed(e) => return Err(PubSubError::provisioning(name, e)),
        }

        Ok(subscription)
    }

    /// Log differences between the requested and existing subscription
    async fn report_drift(
        &self,
        topic: &Topic,
        subscription: &Subscription,
        options: &SubscriptionOptions,
    ) {
        let existing = match self.client.describe_subscription(subscription).await {
            Ok(existing) => existing,
            Err(e) => {
                debug!(
                    "Could not describe existing subscription '{}': {}",
                    subscription, e
                );
                return;
            }
        };

        for drift in detect_drift(topic, options, &existing) {
            warn!(
                "Subscription '{}' exists with different configuration ({}); leaving it unchanged",
                subscription, drift
            );
        }
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("project_id", &self.client.project_id())
            .field("defaults", &self.defaults)
            .finish()
    }
}
