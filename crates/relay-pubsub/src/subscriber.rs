use crate::{
    BrokerClient, DeliveryError, DiagnosticRecord, InboundMessage, MessageHandler, PubSubError,
    Result, Subscription,
};
use async_trait::async_trait;
use derive_setters::Setters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on handler invocations a listener runs at once
pub const MAX_CONCURRENCY: usize = 10_000;

/// Receiver for broker-level stream failures
pub type DeliveryErrorReceiver = mpsc::UnboundedReceiver<DeliveryError>;

/// Synchronous step run by [`DiagnosticHandler`] before acknowledging
pub type RecordProcessor = Arc<dyn Fn(&DiagnosticRecord) -> Result<()> + Send + Sync>;

/// Tuning for a listener's pull loop
#[derive(Debug, Clone, PartialEq, Eq, Setters)]
#[setters(into)]
pub struct ListenOptions {
    /// Maximum messages requested per pull
    pub batch_size: usize,
    /// Pause after an empty pull
    pub poll_interval: Duration,
    /// Pause after a failed pull
    pub error_backoff: Duration,
    /// Handler invocations allowed to run at once
    pub max_concurrency: usize,
}

impl ListenOptions {
    /// Create default listen options
    pub fn new() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            max_concurrency: 1,
        }
    }

    /// `max_concurrency` clamped to `1..=MAX_CONCURRENCY`
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters kept by a running listener
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Messages handed to the handler
    pub messages_received: u64,
    /// Handler invocations that returned `Ok`
    pub messages_handled: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
    /// Pull failures reported on the error channel
    pub delivery_errors: u64,
}

/// Handle to a background delivery task.
///
/// Dropping the listener aborts the task; [`Listener::shutdown`] stops it
/// after in-flight handlers finish.
pub struct Listener {
    subscription: Subscription,
    shutdown_sender: broadcast::Sender<()>,
    errors: Option<DeliveryErrorReceiver>,
    task: Option<JoinHandle<()>>,
    stats: Arc<RwLock<ListenerStats>>,
}

impl Listener {
    /// Get the subscription being listened on
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Check if the delivery task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait for the next delivery error.
    ///
    /// Returns `None` once the task has stopped or the receiver was taken.
    pub async fn next_error(&mut self) -> Option<DeliveryError> {
        match self.errors.as_mut() {
            Some(errors) => errors.recv().await,
            None => None,
        }
    }

    /// Take ownership of the delivery error channel
    pub fn take_errors(&mut self) -> Option<DeliveryErrorReceiver> {
        self.errors.take()
    }

    /// Get a snapshot of the listener counters
    pub async fn stats(&self) -> ListenerStats {
        self.stats.read().await.clone()
    }

    /// Stop pulling, wait for in-flight handlers and return the final counters
    pub async fn shutdown(mut self) -> Result<ListenerStats> {
        // The task may already have exited and dropped its receiver.
        let _ = self.shutdown_sender.send(());

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| PubSubError::from(anyhow::Error::new(e)))?;
        }

        info!("Listener on subscription '{}' shut down", self.subscription);
        Ok(self.stats.read().await.clone())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("subscription", &self.subscription)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Registers handlers against subscriptions
#[derive(Clone)]
pub struct Subscriber {
    client: Arc<dyn BrokerClient>,
    options: ListenOptions,
}

impl Subscriber {
    /// Create a subscriber with default listen options
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            client,
            options: ListenOptions::default(),
        }
    }

    /// Set the listen options used by [`Self::listen`]
    pub fn with_options(mut self, options: ListenOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the listen options
    pub fn options(&self) -> &ListenOptions {
        &self.options
    }

    /// Start delivering messages from `subscription` to `handler`.
    ///
    /// Returns as soon as the delivery task is spawned. Pull failures do not
    /// stop the task; they are reported through [`Listener::next_error`].
    pub fn listen(
        &self,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> Listener {
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        let (error_sender, error_receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(ListenerStats::default()));

        let delivery = DeliveryLoop {
            client: self.client.clone(),
            subscription: subscription.clone(),
            handler,
            options: self.options.clone(),
            stats: stats.clone(),
            errors: error_sender,
        };
        let task = tokio::spawn(delivery.run(shutdown_receiver));

        info!(
            "Listening on subscription '{}' (batch size {}, max concurrency {})",
            subscription,
            self.options.batch_size,
            self.options.effective_concurrency()
        );
        Listener {
            subscription,
            shutdown_sender,
            errors: Some(error_receiver),
            task: Some(task),
            stats,
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("project_id", &self.client.project_id())
            .field("options", &self.options)
            .finish()
    }
}

struct DeliveryLoop {
    client: Arc<dyn BrokerClient>,
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    options: ListenOptions,
    stats: Arc<RwLock<ListenerStats>>,
    errors: mpsc::UnboundedSender<DeliveryError>,
}

impl DeliveryLoop {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let max_concurrency = self.options.effective_concurrency();
        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let batch_size = self.options.batch_size.max(1);

        'listen: loop {
            let pulled = tokio::select! {
                _ = shutdown.recv() => break 'listen,
                pulled = self.client.pull(&self.subscription, batch_size) => pulled,
            };

            let messages = match pulled {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(
                        "Pull from subscription '{}' failed: {}",
                        self.subscription, e
                    );
                    self.stats.write().await.delivery_errors += 1;
                    // Nobody listening for errors is not a reason to stop delivering.
                    let _ = self
                        .errors
                        .send(DeliveryError::new(self.subscription.name(), e));

                    tokio::select! {
                        _ = shutdown.recv() => break 'listen,
                        _ = tokio::time::sleep(self.options.error_backoff) => continue 'listen,
                    }
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = shutdown.recv() => break 'listen,
                    _ = tokio::time::sleep(self.options.poll_interval) => continue 'listen,
                }
            }

            self.stats.write().await.messages_received += messages.len() as u64;
            for received in messages {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break 'listen;
                };

                let message =
                    InboundMessage::new(received, self.subscription.clone(), self.client.clone());
                let handler = self.handler.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let message_id = message.id().clone();
                    match handler.handle_message(message).await {
                        Ok(()) => stats.write().await.messages_handled += 1,
                        Err(e) => {
                            warn!(
                                "Handler '{}' failed on message {}: {}; leaving it unacknowledged",
                                handler.name(),
                                message_id,
                                e
                            );
                            stats.write().await.handler_failures += 1;
                        }
                    }
                });
            }
        }

        debug!(
            "Waiting for in-flight handlers on subscription '{}'",
            self.subscription
        );
        let permits = u32::try_from(max_concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(permits).await;
        info!("Stopped listening on subscription '{}'", self.subscription);
    }
}

/// Reference handler: decode, log a `{id, data, attributes}` record,
/// run the optional processor, then acknowledge.
#[derive(Clone, Default)]
pub struct DiagnosticHandler {
    processor: Option<RecordProcessor>,
}

impl DiagnosticHandler {
    /// Create a handler that only logs and acknowledges
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `processor` on every record before acknowledging.
    ///
    /// A processor error leaves the message unacknowledged.
    pub fn with_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(&DiagnosticRecord) -> Result<()> + Send + Sync + 'static,
    {
        self.processor = Some(Arc::new(processor));
        self
    }
}

#[async_trait]
impl MessageHandler for DiagnosticHandler {
    async fn handle_message(&self, message: InboundMessage) -> Result<()> {
        let record = message.diagnostic_record()?;
        info!(
            "Received message {} on subscription '{}' (attempt {}): data={} attributes={:?}",
            record.id,
            message.subscription(),
            message.delivery_attempt(),
            record.data,
            record.attributes
        );

        if let Some(processor) = &self.processor {
            processor(&record)?;
        }

        message.ack().await
    }

    fn name(&self) -> &str {
        "diagnostic"
    }
}

impl std::fmt::Debug for DiagnosticHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticHandler")
            .field("has_processor", &self.processor.is_some())
            .finish()
    }
}
