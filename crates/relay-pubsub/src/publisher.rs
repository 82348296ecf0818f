use crate::{
    Attributes, BrokerClient, JsonCodec, OutboundMessage, PubSubError, PublishReceipt, Result,
    Topic,
};
use derive_setters::Setters;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-publish options
#[derive(Debug, Clone, Default, PartialEq, Eq, Setters)]
#[setters(strip_option, into)]
pub struct PublishOptions {
    /// Attributes attached to the message and echoed in the receipt
    pub attributes: Option<Attributes>,
    /// Ordering key; empty is treated as absent
    pub ordering_key: Option<String>,
}

impl PublishOptions {
    /// Create empty publish options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Encodes payloads and submits them to a topic, one attempt each
#[derive(Clone)]
pub struct Publisher {
    client: Arc<dyn BrokerClient>,
}

impl Publisher {
    /// Create a new publisher
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self { client }
    }

    /// Encode `payload` and publish it to `topic`.
    ///
    /// Encoding happens first, so an unencodable payload never reaches the
    /// broker. There is no local retry.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &Topic,
        payload: T,
        options: PublishOptions,
    ) -> Result<PublishReceipt<T>> {
        let data = JsonCodec::encode(&payload)?;

        let mut message = OutboundMessage::new(data);
        if let Some(attributes) = &options.attributes {
            message = message.with_attributes(attributes.clone());
        }
        if let Some(ordering_key) = options.ordering_key {
            message = message.with_ordering_key(ordering_key);
        }

        let size = message.size();
        let message_id = self
            .client
            .publish(topic, message)
            .await
            .map_err(|e| PubSubError::publish(topic.name(), e))?;

        info!(
            "Published message {} to topic '{}' ({} bytes)",
            message_id, topic, size
        );
        Ok(PublishReceipt {
            message_id,
            payload,
            attributes: options.attributes,
        })
    }

    /// Publish payloads in order, stopping at the first failure
    pub async fn publish_batch<T: Serialize>(
        &self,
        topic: &Topic,
        payloads: Vec<T>,
        options: PublishOptions,
    ) -> Result<Vec<PublishReceipt<T>>> {
        let mut receipts = Vec::with_capacity(payloads.len());
        for payload in payloads {
            receipts.push(self.publish(topic, payload, options.clone()).await?);
        }

        debug!(
            "Published batch of {} messages to topic '{}'",
            receipts.len(),
            topic
        );
        Ok(receipts)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("project_id", &self.client.project_id())
            .finish()
    }
}
