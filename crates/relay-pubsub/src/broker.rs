use crate::{
    Attributes, BrokerClient, BrokerError, BrokerResult, MessageId, OutboundMessage,
    ReceivedMessage, Subscription, SubscriptionDescription, SubscriptionOptions, Topic,
    filter::Filter, topic::short_topic_name,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Attribute added to messages forwarded to a dead-letter topic
pub const DEAD_LETTER_SOURCE_ATTRIBUTE: &str = "CloudPubSubDeadLetterSourceSubscription";

/// Broker statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerStats {
    /// Number of topics
    pub topic_count: usize,
    /// Number of subscriptions
    pub subscription_count: usize,
    /// Total messages accepted by publish
    pub messages_published: u64,
    /// Total deliveries handed out by pull, redeliveries included
    pub messages_delivered: u64,
    /// Deliveries with an attempt number above 1
    pub messages_redelivered: u64,
    /// Total acknowledged deliveries
    pub messages_acknowledged: u64,
    /// Messages that exhausted their delivery attempts
    pub messages_dead_lettered: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: u64,
    message_id: MessageId,
    data: Vec<u8>,
    attributes: Attributes,
    ordering_key: Option<String>,
    publish_time: DateTime<Utc>,
    /// Deliveries so far
    delivery_attempt: u32,
}

#[derive(Debug)]
struct Lease {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug)]
struct SubscriptionState {
    topic: String,
    options: SubscriptionOptions,
    filter: Option<Filter>,
    backlog: VecDeque<StoredMessage>,
    leases: HashMap<String, Lease>,
    dead_letters: Vec<StoredMessage>,
}

impl SubscriptionState {
    /// Move expired leases back to the backlog, returning those past their last attempt
    fn expire_leases(&mut self, now: Instant) -> Vec<StoredMessage> {
        let expired: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        let mut requeue = Vec::new();
        let mut exhausted = Vec::new();
        for ack_id in expired {
            if let Some(lease) = self.leases.remove(&ack_id) {
                if lease.message.delivery_attempt >= self.options.max_delivery_attempts {
                    exhausted.push(lease.message);
                } else {
                    requeue.push(lease.message);
                }
            }
        }

        requeue.sort_by_key(|message| message.sequence);
        for message in requeue.into_iter().rev() {
            self.backlog.push_front(message);
        }

        exhausted.sort_by_key(|message| message.sequence);
        exhausted
    }

    fn leased_ordering_keys(&self) -> HashSet<String> {
        self.leases
            .values()
            .filter_map(|lease| lease.message.ordering_key.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, DateTime<Utc>>,
    subscriptions: BTreeMap<String, SubscriptionState>,
    stats: BrokerStats,
    next_sequence: u64,
    next_ack_id: u64,
}

impl BrokerState {
    /// Copy a message into the backlog of every matching subscription on `topic`
    fn fan_out(&mut self, topic: &str, message: &StoredMessage) -> usize {
        let mut delivered = 0;
        for subscription in self
            .subscriptions
            .values_mut()
            .filter(|subscription| subscription.topic == topic)
        {
            let accepted = subscription
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&message.attributes));
            if accepted {
                subscription.backlog.push_back(message.clone());
                delivered += 1;
            }
        }
        delivered
    }

    fn store(
        &mut self,
        data: Vec<u8>,
        attributes: Attributes,
        ordering_key: Option<String>,
    ) -> StoredMessage {
        self.next_sequence += 1;
        StoredMessage {
            sequence: self.next_sequence,
            message_id: MessageId::generate(),
            data,
            attributes,
            ordering_key,
            publish_time: Utc::now(),
            delivery_attempt: 0,
        }
    }
}

/// In-process broker with Pub/Sub semantics.
///
/// Cloning shares the underlying state, so one instance can be handed to
/// provisioning, publishing and listening code at once.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    project_id: String,
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    /// Create a new in-memory broker for a project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Arc::new(RwLock::new(BrokerState::default())),
        }
    }

    /// Get broker statistics
    pub async fn get_stats(&self) -> BrokerStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.topic_count = state.topics.len();
        stats.subscription_count = state.subscriptions.len();
        stats
    }

    /// Check if a topic exists
    pub async fn topic_exists(&self, name: &str) -> bool {
        self.state.read().await.topics.contains_key(name)
    }

    /// Check if a subscription exists
    pub async fn subscription_exists(&self, name: &str) -> bool {
        self.state.read().await.subscriptions.contains_key(name)
    }

    /// Delete a topic. Subscriptions stay behind, detached, as on the real broker.
    pub async fn delete_topic(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        match state.topics.remove(name) {
            Some(_) => {
                info!("Deleted topic: {}", name);
                Ok(())
            }
            None => Err(BrokerError::not_found(format!("Topic not found: {name}"))),
        }
    }

    /// Messages waiting to be pulled
    pub async fn backlog_len(&self, subscription: &str) -> usize {
        let state = self.state.read().await;
        state
            .subscriptions
            .get(subscription)
            .map(|subscription| subscription.backlog.len())
            .unwrap_or(0)
    }

    /// Messages pulled but not yet acknowledged
    pub async fn outstanding_len(&self, subscription: &str) -> usize {
        let state = self.state.read().await;
        state
            .subscriptions
            .get(subscription)
            .map(|subscription| subscription.leases.len())
            .unwrap_or(0)
    }

    /// IDs of messages dead-lettered from a subscription, oldest first
    pub async fn dead_lettered(&self, subscription: &str) -> Vec<MessageId> {
        let state = self.state.read().await;
        state
            .subscriptions
            .get(subscription)
            .map(|subscription| {
                subscription
                    .dead_letters
                    .iter()
                    .map(|message| message.message_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_project(&self, project_id: &str, resource: &str) -> BrokerResult<()> {
        if project_id != self.project_id {
            return Err(BrokerError::not_found(format!(
                "{resource} belongs to project '{project_id}', broker serves '{}'",
                self.project_id
            )));
        }
        Ok(())
    }
}

/// Resource names: 3 to 255 chars, leading letter, no `goog` prefix
fn validate_resource_name(kind: &str, name: &str) -> BrokerResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.~+%".contains(c));
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());

    if !(3..=255).contains(&name.len())
        || !valid_chars
        || !starts_with_letter
        || name.starts_with("goog")
    {
        return Err(BrokerError::invalid_argument(format!(
            "Invalid {kind} name: '{name}'"
        )));
    }
    Ok(())
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn create_topic(&self, name: &str) -> BrokerResult<()> {
        validate_resource_name("topic", name)?;

        let mut state = self.state.write().await;
        if state.topics.contains_key(name) {
            return Err(BrokerError::already_exists(format!(
                "Topic already exists: {name}"
            )));
        }

        state.topics.insert(name.to_string(), Utc::now());
        info!("Created topic: {}", name);
        Ok(())
    }

    async fn create_subscription(
        &self,
        topic: &Topic,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<()> {
        validate_resource_name("subscription", name)?;
        self.check_project(topic.project_id(), "Topic")?;
        options.validate().map_err(BrokerError::invalid_argument)?;
        let filter = options
            .filter
            .as_deref()
            .map(Filter::parse)
            .transpose()
            .map_err(|e| BrokerError::invalid_argument(e.to_string()))?;

        let mut state = self.state.write().await;
        if state.subscriptions.contains_key(name) {
            return Err(BrokerError::already_exists(format!(
                "Subscription already exists: {name}"
            )));
        }
        if !state.topics.contains_key(topic.name()) {
            return Err(BrokerError::not_found(format!(
                "Topic not found: {}",
                topic.fully_qualified_name()
            )));
        }
        if let Some(dead_letter_topic) = &options.dead_letter_topic {
            if !state.topics.contains_key(short_topic_name(dead_letter_topic)) {
                return Err(BrokerError::not_found(format!(
                    "Dead letter topic not found: {dead_letter_topic}"
                )));
            }
        }

        state.subscriptions.insert(
            name.to_string(),
            SubscriptionState {
                topic: topic.name().to_string(),
                options: options.clone(),
                filter,
                backlog: VecDeque::new(),
                leases: HashMap::new(),
                dead_letters: Vec::new(),
            },
        );
        info!(
            "Created subscription '{}' on topic '{}' (filter: {:?})",
            name, topic, options.filter
        );
        Ok(())
    }

    async fn describe_subscription(
        &self,
        subscription: &Subscription,
    ) -> BrokerResult<SubscriptionDescription> {
        self.check_project(subscription.project_id(), "Subscription")?;
        let state = self.state.read().await;
        let subscription_state = state.subscriptions.get(subscription.name()).ok_or_else(|| {
            BrokerError::not_found(format!(
                "Subscription not found: {}",
                subscription.fully_qualified_name()
            ))
        })?;

        Ok(SubscriptionDescription {
            name: subscription.name().to_string(),
            topic: subscription_state.topic.clone(),
            options: subscription_state.options.clone(),
        })
    }

    async fn publish(&self, topic: &Topic, message: OutboundMessage) -> BrokerResult<MessageId> {
        self.check_project(topic.project_id(), "Topic")?;

        let mut state = self.state.write().await;
        if !state.topics.contains_key(topic.name()) {
            return Err(BrokerError::not_found(format!(
                "Topic not found: {}",
                topic.fully_qualified_name()
            )));
        }

        let stored = state.store(message.data, message.attributes, message.ordering_key);
        let fanned_out = state.fan_out(topic.name(), &stored);
        state.stats.messages_published += 1;

        debug!(
            "Published message {} to topic '{}', queued for {} subscriptions",
            stored.message_id, topic, fanned_out
        );
        Ok(stored.message_id)
    }

    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> BrokerResult<Vec<ReceivedMessage>> {
        self.check_project(subscription.project_id(), "Subscription")?;
        if max_messages == 0 {
            return Err(BrokerError::invalid_argument("max_messages must be > 0"));
        }

        let now = Instant::now();
        let mut state = self.state.write().await;
        let not_found = || {
            BrokerError::not_found(format!(
                "Subscription not found: {}",
                subscription.fully_qualified_name()
            ))
        };

        let (exhausted, dead_letter_topic) = {
            let subscription_state = state
                .subscriptions
                .get_mut(subscription.name())
                .ok_or_else(not_found)?;
            let exhausted = subscription_state.expire_leases(now);
            subscription_state
                .dead_letters
                .extend(exhausted.iter().cloned());
            (
                exhausted,
                subscription_state.options.dead_letter_topic.clone(),
            )
        };

        if !exhausted.is_empty() {
            state.stats.messages_dead_lettered += exhausted.len() as u64;
            for message in &exhausted {
                warn!(
                    "Message {} exceeded its delivery attempts on subscription '{}'",
                    message.message_id, subscription
                );
            }

            if let Some(dead_letter_topic) = dead_letter_topic {
                let dead_letter_topic = short_topic_name(&dead_letter_topic).to_string();
                if state.topics.contains_key(dead_letter_topic.as_str()) {
                    for message in exhausted {
                        let mut attributes = message.attributes;
                        attributes.insert(
                            DEAD_LETTER_SOURCE_ATTRIBUTE.to_string(),
                            subscription.fully_qualified_name(),
                        );
                        let forwarded = state.store(message.data, attributes, message.ordering_key);
                        state.fan_out(&dead_letter_topic, &forwarded);
                        state.stats.messages_published += 1;
                    }
                } else {
                    warn!(
                        "Dead letter topic '{}' no longer exists, dropping messages",
                        dead_letter_topic
                    );
                }
            }
        }

        let BrokerState {
            subscriptions,
            stats,
            next_ack_id,
            ..
        } = &mut *state;
        let subscription_state = subscriptions
            .get_mut(subscription.name())
            .ok_or_else(not_found)?;

        let ordered = subscription_state.options.enable_message_ordering;
        let ack_deadline = subscription_state.options.ack_deadline_seconds;
        let deadline = now + Duration::from_secs(ack_deadline.into());
        let mut held_keys = if ordered {
            subscription_state.leased_ordering_keys()
        } else {
            HashSet::new()
        };

        let mut batch = Vec::new();
        let mut remaining = VecDeque::with_capacity(subscription_state.backlog.len());
        while let Some(mut message) = subscription_state.backlog.pop_front() {
            if batch.len() >= max_messages {
                remaining.push_back(message);
                continue;
            }
            if let Some(key) = message.ordering_key.as_ref().filter(|_| ordered) {
                if !held_keys.insert(key.clone()) {
                    remaining.push_back(message);
                    continue;
                }
            }

            message.delivery_attempt += 1;
            *next_ack_id += 1;
            let ack_id = format!("{}:{}", subscription.name(), next_ack_id);

            stats.messages_delivered += 1;
            if message.delivery_attempt > 1 {
                stats.messages_redelivered += 1;
            }

            batch.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: message.message_id.clone(),
                data: message.data.clone(),
                attributes: message.attributes.clone(),
                ordering_key: message.ordering_key.clone(),
                publish_time: message.publish_time,
                delivery_attempt: message.delivery_attempt,
            });
            subscription_state
                .leases
                .insert(ack_id, Lease { message, deadline });
        }
        subscription_state.backlog = remaining;

        if !batch.is_empty() {
            debug!(
                "Pulled {} messages from subscription '{}'",
                batch.len(),
                subscription
            );
        }
        Ok(batch)
    }

    async fn acknowledge(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
    ) -> BrokerResult<()> {
        self.check_project(subscription.project_id(), "Subscription")?;

        let now = Instant::now();
        let mut state = self.state.write().await;
        let BrokerState {
            subscriptions,
            stats,
            ..
        } = &mut *state;
        let subscription_state = subscriptions.get_mut(subscription.name()).ok_or_else(|| {
            BrokerError::not_found(format!(
                "Subscription not found: {}",
                subscription.fully_qualified_name()
            ))
        })?;

        for ack_id in ack_ids {
            // Expired leases are left for the next pull to redeliver.
            let live = subscription_state
                .leases
                .get(ack_id)
                .is_some_and(|lease| lease.deadline > now);
            if live {
                subscription_state.leases.remove(ack_id);
                stats.messages_acknowledged += 1;
            } else {
                debug!(
                    "Ignoring unknown or expired ack ID '{}' on subscription '{}'",
                    ack_id, subscription
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;
    use pretty_assertions::assert_eq;

    async fn broker_with_subscription(
        options: SubscriptionOptions,
    ) -> (InMemoryBroker, Topic, Subscription) {
        let broker = InMemoryBroker::new("test-project");
        broker.create_topic("orders").await.unwrap();
        let topic = broker.topic("orders");
        broker
            .create_subscription(&topic, "billing", &options)
            .await
            .unwrap();
        let subscription = broker.subscription("billing");
        (broker, topic, subscription)
    }

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage::new(body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_create_topic_twice_reports_already_exists() {
        let broker = InMemoryBroker::new("test-project");
        broker.create_topic("orders").await.unwrap();

        let actual = broker.create_topic("orders").await.unwrap_err();
        assert_eq!(actual.code, StatusCode::AlreadyExists);
        assert_eq!(broker.get_stats().await.topic_count, 1);
    }

    #[tokio::test]
    async fn test_create_topic_rejects_invalid_names() {
        let broker = InMemoryBroker::new("test-project");
        for name in ["ab", "1orders", "goog-orders", "orders/x", ""] {
            let actual = broker.create_topic(name).await.unwrap_err();
            assert_eq!(actual.code, StatusCode::InvalidArgument, "name: {name}");
        }
    }

    #[tokio::test]
    async fn test_create_subscription_requires_topic() {
        let broker = InMemoryBroker::new("test-project");
        let topic = broker.topic("missing");

        let actual = broker
            .create_subscription(&topic, "billing", &SubscriptionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(actual.code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn test_create_subscription_rejects_invalid_filter() {
        let broker = InMemoryBroker::new("test-project");
        broker.create_topic("orders").await.unwrap();
        let topic = broker.topic("orders");

        let actual = broker
            .create_subscription(
                &topic,
                "billing",
                &SubscriptionOptions::new().filter("attributes.kind ="),
            )
            .await
            .unwrap_err();
        assert_eq!(actual.code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_create_subscription_twice_reports_already_exists() {
        let (broker, topic, _) = broker_with_subscription(SubscriptionOptions::default()).await;

        let actual = broker
            .create_subscription(&topic, "billing", &SubscriptionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(actual.code, StatusCode::AlreadyExists);
    }

    #[tokio::test]
    async fn test_describe_subscription() {
        let options = SubscriptionOptions::new().filter(r#"attributes.kind="invoice""#);
        let (broker, _, subscription) = broker_with_subscription(options.clone()).await;

        let actual = broker.describe_subscription(&subscription).await.unwrap();
        let expected = SubscriptionDescription {
            name: "billing".to_string(),
            topic: "orders".to_string(),
            options,
        };
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_publish_to_missing_topic_fails() {
        let broker = InMemoryBroker::new("test-project");
        let topic = broker.topic("orders");

        let actual = broker.publish(&topic, message("{}")).await.unwrap_err();
        assert_eq!(actual.code, StatusCode::NotFound);
        assert_eq!(broker.get_stats().await.messages_published, 0);
    }

    #[tokio::test]
    async fn test_publish_to_other_project_fails() {
        let broker = InMemoryBroker::new("test-project");
        broker.create_topic("orders").await.unwrap();
        let topic = Topic::new("other-project", "orders");

        let actual = broker.publish(&topic, message("{}")).await.unwrap_err();
        assert_eq!(actual.code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn test_publish_and_pull() {
        let (broker, topic, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;

        let message_id = broker
            .publish(&topic, message(r#"{"id":1}"#).with_attribute("kind", "invoice"))
            .await
            .unwrap();

        let actual = broker.pull(&subscription, 10).await.unwrap();
        assert_eq!(actual.len(), 1);
        assert_eq!(actual[0].message_id, message_id);
        assert_eq!(actual[0].data, br#"{"id":1}"#.to_vec());
        assert_eq!(actual[0].delivery_attempt, 1);
        assert_eq!(broker.outstanding_len("billing").await, 1);
    }

    #[tokio::test]
    async fn test_pull_respects_max_messages_and_order() {
        let (broker, topic, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;
        for i in 0..5 {
            broker.publish(&topic, message(&i.to_string())).await.unwrap();
        }

        let first = broker.pull(&subscription, 2).await.unwrap();
        let second = broker.pull(&subscription, 10).await.unwrap();

        let actual: Vec<Vec<u8>> = first
            .iter()
            .chain(second.iter())
            .map(|message| message.data.clone())
            .collect();
        let expected: Vec<Vec<u8>> = (0..5).map(|i: i32| i.to_string().into_bytes()).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_filter_drops_non_matching_messages() {
        let options = SubscriptionOptions::new().filter(r#"attributes.kind="invoice""#);
        let (broker, topic, subscription) = broker_with_subscription(options).await;

        broker
            .publish(&topic, message("1").with_attribute("kind", "invoice"))
            .await
            .unwrap();
        broker
            .publish(&topic, message("2").with_attribute("kind", "shipment"))
            .await
            .unwrap();

        let actual = broker.pull(&subscription, 10).await.unwrap();
        assert_eq!(actual.len(), 1);
        assert_eq!(actual[0].data, b"1".to_vec());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscription() {
        let (broker, topic, _) = broker_with_subscription(SubscriptionOptions::default()).await;
        broker
            .create_subscription(&topic, "audit", &SubscriptionOptions::default())
            .await
            .unwrap();

        broker.publish(&topic, message("{}")).await.unwrap();

        assert_eq!(broker.backlog_len("billing").await, 1);
        assert_eq!(broker.backlog_len("audit").await, 1);
    }

    #[tokio::test]
    async fn test_ack_removes_lease() {
        let (broker, topic, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;
        broker.publish(&topic, message("{}")).await.unwrap();

        let pulled = broker.pull(&subscription, 1).await.unwrap();
        broker
            .acknowledge(&subscription, &[pulled[0].ack_id.clone()])
            .await
            .unwrap();

        let stats = broker.get_stats().await;
        assert_eq!(stats.messages_acknowledged, 1);
        assert_eq!(broker.outstanding_len("billing").await, 0);
        assert!(broker.pull(&subscription, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ack_id_is_ignored() {
        let (broker, _, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;

        let actual = broker
            .acknowledge(&subscription, &["billing:999".to_string()])
            .await;
        assert!(actual.is_ok());
        assert_eq!(broker.get_stats().await.messages_acknowledged, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered_after_deadline() {
        let (broker, topic, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;
        broker.publish(&topic, message("{}")).await.unwrap();

        let first = broker.pull(&subscription, 1).await.unwrap();
        assert!(broker.pull(&subscription, 1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = broker.pull(&subscription, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].delivery_attempt, 2);
        assert_ne!(second[0].ack_id, first[0].ack_id);

        let stats = broker.get_stats().await;
        assert_eq!(stats.messages_delivered, 2);
        assert_eq!(stats.messages_redelivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_ack_is_ignored() {
        let (broker, topic, subscription) =
            broker_with_subscription(SubscriptionOptions::default()).await;
        broker.publish(&topic, message("{}")).await.unwrap();

        let pulled = broker.pull(&subscription, 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        broker
            .acknowledge(&subscription, &[pulled[0].ack_id.clone()])
            .await
            .unwrap();

        assert_eq!(broker.get_stats().await.messages_acknowledged, 0);
        assert_eq!(broker.pull(&subscription, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_is_dead_lettered_after_max_attempts() {
        let broker = InMemoryBroker::new("test-project");
        broker.create_topic("orders").await.unwrap();
        broker.create_topic("orders-dead").await.unwrap();
        let topic = broker.topic("orders");
        let dead_topic = broker.topic("orders-dead");
        broker
            .create_subscription(
                &topic,
                "billing",
                &SubscriptionOptions::new()
                    .max_delivery_attempts(5u32)
                    .dead_letter_topic("orders-dead"),
            )
            .await
            .unwrap();
        broker
            .create_subscription(&dead_topic, "billing-dead", &SubscriptionOptions::default())
            .await
            .unwrap();
        let subscription = broker.subscription("billing");

        let message_id = broker.publish(&topic, message("{}")).await.unwrap();

        for attempt in 1..=5 {
            let pulled = broker.pull(&subscription, 1).await.unwrap();
            assert_eq!(pulled[0].delivery_attempt, attempt);
            tokio::time::advance(Duration::from_secs(11)).await;
        }

        assert!(broker.pull(&subscription, 1).await.unwrap().is_empty());
        assert_eq!(broker.dead_lettered("billing").await, vec![message_id]);

        let forwarded = broker
            .pull(&broker.subscription("billing-dead"), 1)
            .await
            .unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(
            forwarded[0]
                .attributes
                .get(DEAD_LETTER_SOURCE_ATTRIBUTE)
                .map(String::as_str),
            Some("projects/test-project/subscriptions/billing")
        );
        assert_eq!(broker.get_stats().await.messages_dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_ordering_key_holds_back_later_messages() {
        let options = SubscriptionOptions::new().enable_message_ordering(true);
        let (broker, topic, subscription) = broker_with_subscription(options).await;

        broker
            .publish(&topic, message("m1").with_ordering_key("key1"))
            .await
            .unwrap();
        broker
            .publish(&topic, message("m2").with_ordering_key("key1"))
            .await
            .unwrap();
        broker
            .publish(&topic, message("other").with_ordering_key("key2"))
            .await
            .unwrap();

        let first = broker.pull(&subscription, 10).await.unwrap();
        let actual: Vec<&[u8]> = first.iter().map(|m| m.data.as_slice()).collect();
        assert_eq!(actual, vec![b"m1".as_slice(), b"other".as_slice()]);

        broker
            .acknowledge(&subscription, &[first[0].ack_id.clone()])
            .await
            .unwrap();

        let second = broker.pull(&subscription, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].data, b"m2".to_vec());
    }

    #[tokio::test]
    async fn test_delete_topic_then_publish_fails() {
        let (broker, topic, _) = broker_with_subscription(SubscriptionOptions::default()).await;
        broker.delete_topic("orders").await.unwrap();

        let actual = broker.publish(&topic, message("{}")).await.unwrap_err();
        assert_eq!(actual.code, StatusCode::NotFound);
        assert!(broker.subscription_exists("billing").await);
    }

    #[tokio::test]
    async fn test_pull_unknown_subscription_fails() {
        let broker = InMemoryBroker::new("test-project");
        let actual = broker
            .pull(&broker.subscription("missing"), 1)
            .await
            .unwrap_err();
        assert_eq!(actual.code, StatusCode::NotFound);
    }
}
