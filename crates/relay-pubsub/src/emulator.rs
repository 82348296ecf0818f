//! Broker client for the Pub/Sub emulator's REST surface.
//!
//! The emulator speaks the same JSON API as the hosted service but without
//! authentication, so a plain `reqwest::Client` is enough.

use crate::{
    Attributes, BrokerClient, BrokerError, BrokerResult, MessageId, OutboundMessage,
    ReceivedMessage, StatusCode, Subscription, SubscriptionDescription, SubscriptionOptions,
    Topic, topic::short_topic_name,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable naming the emulator's `host:port`
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterPolicy {
    dead_letter_topic: String,
    max_delivery_attempts: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterPolicyResource {
    #[serde(default)]
    dead_letter_topic: Option<String>,
    #[serde(default)]
    max_delivery_attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest {
    topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    ack_deadline_seconds: u32,
    enable_message_ordering: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    dead_letter_policy: Option<DeadLetterPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResource {
    name: String,
    topic: String,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    ack_deadline_seconds: Option<u32>,
    #[serde(default)]
    enable_message_ordering: bool,
    #[serde(default)]
    dead_letter_policy: Option<DeadLetterPolicyResource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOutboundMessage {
    data: String,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    ordering_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<WireOutboundMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
    return_immediately: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInboundMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: Attributes,
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    ordering_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireInboundMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Map a failed HTTP response to a broker error.
///
/// The status name in the JSON body wins; the HTTP status is the fallback.
fn error_from_response(http_status: u16, body: &str) -> BrokerError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope
                .error
                .status
                .as_deref()
                .map(StatusCode::from_name)
                .filter(|code| *code != StatusCode::Unknown)
                .unwrap_or_else(|| StatusCode::from_http_status(http_status));
            let message = envelope
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {http_status}"));
            BrokerError::new(code, message)
        }
        Err(_) => BrokerError::new(
            StatusCode::from_http_status(http_status),
            format!("HTTP {http_status}: {}", body.trim()),
        ),
    }
}

fn received_from_wire(wire: WireReceivedMessage) -> BrokerResult<ReceivedMessage> {
    let data = STANDARD.decode(wire.message.data.as_bytes()).map_err(|e| {
        BrokerError::internal(format!(
            "Message {} carries invalid base64 data: {e}",
            wire.message.message_id
        ))
    })?;

    Ok(ReceivedMessage {
        ack_id: wire.ack_id,
        message_id: MessageId::new(wire.message.message_id),
        data,
        attributes: wire.message.attributes,
        ordering_key: (!wire.message.ordering_key.is_empty()).then_some(wire.message.ordering_key),
        publish_time: wire.message.publish_time.unwrap_or_else(Utc::now),
        delivery_attempt: wire.delivery_attempt.unwrap_or(1),
    })
}

fn description_from_resource(resource: SubscriptionResource) -> SubscriptionDescription {
    let name = resource
        .name
        .rsplit('/')
        .next()
        .unwrap_or(resource.name.as_str())
        .to_string();

    let mut options = SubscriptionOptions::new();
    options.filter = resource.filter.filter(|filter| !filter.is_empty());
    options.enable_message_ordering = resource.enable_message_ordering;
    if let Some(ack_deadline_seconds) = resource.ack_deadline_seconds {
        options.ack_deadline_seconds = ack_deadline_seconds;
    }
    if let Some(policy) = resource.dead_letter_policy {
        options.dead_letter_topic = policy
            .dead_letter_topic
            .map(|topic| short_topic_name(&topic).to_string());
        if let Some(max_delivery_attempts) = policy.max_delivery_attempts {
            options.max_delivery_attempts = max_delivery_attempts;
        }
    }

    SubscriptionDescription {
        name,
        topic: short_topic_name(&resource.topic).to_string(),
        options,
    }
}

/// [`BrokerClient`] backed by a running Pub/Sub emulator
#[derive(Debug, Clone)]
pub struct EmulatorClient {
    project_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl EmulatorClient {
    /// Create a client for the emulator at `host` (`host:port` or a full URL)
    pub fn new(host: &str, project_id: impl Into<String>) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/v1")
        } else {
            format!("http://{host}/v1")
        };

        Self {
            project_id: project_id.into(),
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Create a client from `PUBSUB_EMULATOR_HOST`, if set
    pub fn from_env(project_id: impl Into<String>) -> Option<Self> {
        std::env::var(EMULATOR_HOST_ENV)
            .ok()
            .filter(|host| !host.trim().is_empty())
            .map(|host| Self::new(&host, project_id))
    }

    /// Get the REST base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn topic_url(&self, name: &str) -> String {
        format!("{}/projects/{}/topics/{}", self.base_url, self.project_id, name)
    }

    fn subscription_url(&self, name: &str) -> String {
        format!(
            "{}/projects/{}/subscriptions/{}",
            self.base_url, self.project_id, name
        )
    }

    fn fully_qualified_topic(&self, name: &str) -> String {
        Topic::new(self.project_id.as_str(), short_topic_name(name)).fully_qualified_name()
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> BrokerResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::unavailable(format!("Emulator request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> BrokerResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::internal(format!("Malformed emulator response: {e}")))
    }
}

#[async_trait]
impl BrokerClient for EmulatorClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn create_topic(&self, name: &str) -> BrokerResult<()> {
        let url = self.topic_url(name);
        debug!("PUT {}", url);
        self.send(self.http.put(url).json(&serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        topic: &Topic,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<()> {
        let body = CreateSubscriptionRequest {
            topic: topic.fully_qualified_name(),
            filter: options.filter.clone(),
            ack_deadline_seconds: options.ack_deadline_seconds,
            enable_message_ordering: options.enable_message_ordering,
            dead_letter_policy: options.dead_letter_topic.as_deref().map(|dead_letter_topic| {
                DeadLetterPolicy {
                    dead_letter_topic: self.fully_qualified_topic(dead_letter_topic),
                    max_delivery_attempts: options.max_delivery_attempts,
                }
            }),
        };

        let url = self.subscription_url(name);
        debug!("PUT {}", url);
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn describe_subscription(
        &self,
        subscription: &Subscription,
    ) -> BrokerResult<SubscriptionDescription> {
        let url = self.subscription_url(subscription.name());
        let response = self.send(self.http.get(url)).await?;
        let resource: SubscriptionResource = Self::read_json(response).await?;
        Ok(description_from_resource(resource))
    }

    async fn publish(&self, topic: &Topic, message: OutboundMessage) -> BrokerResult<MessageId> {
        let body = PublishRequest {
            messages: vec![WireOutboundMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
                ordering_key: message.ordering_key,
            }],
        };

        let url = format!("{}:publish", self.topic_url(topic.name()));
        let response = self.send(self.http.post(url).json(&body)).await?;
        let published: PublishResponse = Self::read_json(response).await?;

        published
            .message_ids
            .into_iter()
            .next()
            .map(MessageId::new)
            .ok_or_else(|| BrokerError::internal("Publish response carried no message ID"))
    }

    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> BrokerResult<Vec<ReceivedMessage>> {
        let body = PullRequest {
            max_messages,
            return_immediately: true,
        };

        let url = format!("{}:pull", self.subscription_url(subscription.name()));
        let response = self.send(self.http.post(url).json(&body)).await?;
        let pulled: PullResponse = Self::read_json(response).await?;

        pulled
            .received_messages
            .into_iter()
            .map(received_from_wire)
            .collect()
    }

    async fn acknowledge(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
    ) -> BrokerResult<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }

        let url = format!("{}:acknowledge", self.subscription_url(subscription.name()));
        self.send(self.http.post(url).json(&AcknowledgeRequest { ack_ids }))
            .await?;
        Ok(())
    }
}
