use crate::{
    BrokerResult, InboundMessage, MessageId, OutboundMessage, ReceivedMessage, Result,
    Subscription, SubscriptionDescription, SubscriptionOptions, Topic,
};
use async_trait::async_trait;
use std::future::Future;

/// Narrow interface to the managed broker.
///
/// Constructed once by the application and shared as `Arc<dyn BrokerClient>`.
/// Handle accessors are lazy: they never talk to the broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Project every handle is scoped to
    fn project_id(&self) -> &str;

    /// Create a topic; `ALREADY_EXISTS` when the name is taken
    async fn create_topic(&self, name: &str) -> BrokerResult<()>;

    /// Lazy handle to a topic by name
    fn topic(&self, name: &str) -> Topic {
        Topic::new(self.project_id(), name)
    }

    /// Create a subscription bound to `topic`; `ALREADY_EXISTS` when the name is taken
    async fn create_subscription(
        &self,
        topic: &Topic,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<()>;

    /// Lazy handle to a subscription by name
    fn subscription(&self, name: &str) -> Subscription {
        Subscription::new(self.project_id(), name)
    }

    /// Fetch the broker-side configuration of a subscription
    async fn describe_subscription(
        &self,
        subscription: &Subscription,
    ) -> BrokerResult<SubscriptionDescription>;

    /// Submit one message, returning the broker-assigned ID
    async fn publish(&self, topic: &Topic, message: OutboundMessage) -> BrokerResult<MessageId>;

    /// Lease up to `max_messages` messages; an empty batch means nothing is ready
    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> BrokerResult<Vec<ReceivedMessage>>;

    /// Acknowledge leased messages by ack ID
    async fn acknowledge(&self, subscription: &Subscription, ack_ids: &[String])
    -> BrokerResult<()>;
}

/// Message handler invoked once per delivered message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a received message.
    ///
    /// Returning without calling [`InboundMessage::ack`] leaves the message
    /// leased until its ack deadline, after which the broker redelivers it.
    async fn handle_message(&self, message: InboundMessage) -> Result<()>;

    /// Get the handler name for identification
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F> {
    name: String,
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    /// Create a named closure handler
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle_message(&self, message: InboundMessage) -> Result<()> {
        (self.handler)(message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
