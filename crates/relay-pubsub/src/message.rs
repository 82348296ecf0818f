use crate::{Attributes, BrokerClient, JsonCodec, MessageId, PubSubError, Result, Subscription};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A message ready to be submitted to a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Encoded payload
    pub data: Vec<u8>,
    /// Message attributes
    pub attributes: Attributes,
    /// Ordering key, `None` when unordered
    pub ordering_key: Option<String>,
}

impl OutboundMessage {
    /// Create a new message from encoded bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            attributes: Attributes::new(),
            ordering_key: None,
        }
    }

    /// Attach attributes
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Add a single attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach an ordering key; an empty key means unordered
    pub fn with_ordering_key(mut self, ordering_key: impl Into<String>) -> Self {
        let ordering_key = ordering_key.into();
        self.ordering_key = (!ordering_key.is_empty()).then_some(ordering_key);
        self
    }

    /// Size of the encoded payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A leased message as returned by a broker pull
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Lease token used to acknowledge this delivery
    pub ack_id: String,
    /// Broker-assigned message ID
    pub message_id: MessageId,
    /// Encoded payload
    pub data: Vec<u8>,
    /// Message attributes
    pub attributes: Attributes,
    /// Ordering key, if the message was published with one
    pub ordering_key: Option<String>,
    /// Time the broker accepted the message
    pub publish_time: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_attempt: u32,
}

/// Receipt returned for a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt<T> {
    /// Broker-assigned message ID
    pub message_id: MessageId,
    /// The payload as given to the publisher
    pub payload: T,
    /// Attributes as given to the publisher, absent when none were given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

/// Diagnostic view of a delivered message: `{id, data, attributes}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub id: MessageId,
    pub data: serde_json::Value,
    pub attributes: Attributes,
}

/// A message delivered to a handler, carrying its acknowledgment token
pub struct InboundMessage {
    received: ReceivedMessage,
    subscription: Subscription,
    client: Arc<dyn BrokerClient>,
    acked: AtomicBool,
}

impl InboundMessage {
    /// Wrap a leased message so it can be acknowledged through `client`
    pub fn new(
        received: ReceivedMessage,
        subscription: Subscription,
        client: Arc<dyn BrokerClient>,
    ) -> Self {
        Self {
            received,
            subscription,
            client,
            acked: AtomicBool::new(false),
        }
    }

    /// Get the message ID
    pub fn id(&self) -> &MessageId {
        &self.received.message_id
    }

    /// Get the encoded payload
    pub fn data(&self) -> &[u8] {
        &self.received.data
    }

    /// Get the attributes
    pub fn attributes(&self) -> &Attributes {
        &self.received.attributes
    }

    /// Get an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.received.attributes.get(key).map(String::as_str)
    }

    /// Get the ordering key
    pub fn ordering_key(&self) -> Option<&str> {
        self.received.ordering_key.as_deref()
    }

    /// Get the publish timestamp
    pub fn publish_time(&self) -> DateTime<Utc> {
        self.received.publish_time
    }

    /// Get the delivery attempt, starting at 1
    pub fn delivery_attempt(&self) -> u32 {
        self.received.delivery_attempt
    }

    /// Get the lease token
    pub fn ack_id(&self) -> &str {
        &self.received.ack_id
    }

    /// Get the subscription this message was delivered on
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(&self.received.data)
    }

    /// Decode the payload into a `{id, data, attributes}` record
    pub fn diagnostic_record(&self) -> Result<DiagnosticRecord> {
        Ok(DiagnosticRecord {
            id: self.received.message_id.clone(),
            data: self.decode()?,
            attributes: self.received.attributes.clone(),
        })
    }

    /// Acknowledge the message. Repeated calls after a success are no-ops.
    pub async fn ack(&self) -> Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ack_ids = [self.received.ack_id.clone()];
        if let Err(e) = self.client.acknowledge(&self.subscription, &ack_ids).await {
            self.acked.store(false, Ordering::SeqCst);
            return Err(PubSubError::delivery(self.subscription.name(), e));
        }

        debug!(
            "Acknowledged message {} on subscription '{}'",
            self.received.message_id, self.subscription
        );
        Ok(())
    }

    /// Check if the message was acknowledged
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("id", &self.received.message_id)
            .field("subscription", &self.subscription.name)
            .field("attributes", &self.received.attributes)
            .field("ordering_key", &self.received.ordering_key)
            .field("delivery_attempt", &self.received.delivery_attempt)
            .field("acked", &self.is_acked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBroker, SubscriptionOptions};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn delivered(payload: serde_json::Value) -> (Arc<InMemoryBroker>, InboundMessage) {
        let broker = Arc::new(InMemoryBroker::new("test-project"));
        broker.create_topic("orders").await.unwrap();
        let topic = broker.topic("orders");
        broker
            .create_subscription(&topic, "billing", &SubscriptionOptions::default())
            .await
            .unwrap();

        let message = OutboundMessage::new(JsonCodec::encode(&payload).unwrap())
            .with_attribute("kind", "invoice");
        broker.publish(&topic, message).await.unwrap();

        let subscription = broker.subscription("billing");
        let received = broker.pull(&subscription, 1).await.unwrap().remove(0);
        let client: Arc<dyn BrokerClient> = broker.clone();
        (broker, InboundMessage::new(received, subscription, client))
    }

    #[test]
    fn test_outbound_message_builders() {
        let actual = OutboundMessage::new(b"{}".to_vec())
            .with_attribute("origin", "sample")
            .with_ordering_key("key1");

        assert_eq!(actual.attributes.get("origin").map(String::as_str), Some("sample"));
        assert_eq!(actual.ordering_key.as_deref(), Some("key1"));
        assert_eq!(actual.size(), 2);
    }

    #[test]
    fn test_empty_ordering_key_is_unordered() {
        let actual = OutboundMessage::new(Vec::new()).with_ordering_key("");
        assert_eq!(actual.ordering_key, None);
    }

    #[test]
    fn test_receipt_without_attributes_omits_field() {
        let fixture = PublishReceipt {
            message_id: MessageId::new("1"),
            payload: json!({"id": 1}),
            attributes: None,
        };
        let actual = serde_json::to_value(&fixture).unwrap();
        let expected = json!({"message_id": "1", "payload": {"id": 1}});
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_inbound_message_accessors() {
        let (_broker, fixture) = delivered(json!({"id": 1})).await;

        assert_eq!(fixture.attribute("kind"), Some("invoice"));
        assert_eq!(fixture.delivery_attempt(), 1);
        assert_eq!(fixture.ordering_key(), None);
        assert_eq!(fixture.subscription().name(), "billing");
        assert!(!fixture.is_acked());
    }

    #[tokio::test]
    async fn test_diagnostic_record() {
        let (_broker, fixture) = delivered(json!({"message": "test with filter"})).await;

        let actual = fixture.diagnostic_record().unwrap();
        assert_eq!(&actual.id, fixture.id());
        assert_eq!(actual.data, json!({"message": "test with filter"}));
        assert_eq!(actual.attributes.get("kind").map(String::as_str), Some("invoice"));
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let (broker, fixture) = delivered(json!({"id": 1})).await;

        fixture.ack().await.unwrap();
        fixture.ack().await.unwrap();

        assert!(fixture.is_acked());
        assert_eq!(broker.get_stats().await.messages_acknowledged, 1);
    }
}
