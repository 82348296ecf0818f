//! # relay-pubsub
//!
//! Resilient provisioning and message exchange over a managed publish-subscribe
//! broker with Cloud Pub/Sub semantics.
//!
//! Topics and subscriptions are created idempotently at startup: an
//! already-exists answer from the broker counts as success, every other failure
//! is surfaced. Payloads are JSON-encoded, published with optional attributes
//! and ordering keys, and consumed by a background listener that hands each
//! delivery to a caller-supplied handler.
//!
//! ## Key Components
//!
//! - **BrokerClient**: narrow async interface to the broker, injected as `Arc<dyn BrokerClient>`
//! - **Provisioner**: `ensure_topic` / `ensure_subscription` with already-exists suppression
//! - **Publisher**: encode then publish, returning a [`PublishReceipt`]
//! - **Subscriber**: `listen` spawns a delivery task and returns a [`Listener`]
//! - **InMemoryBroker**: process-local broker with leases, redelivery and dead-lettering
//! - **EmulatorClient**: REST client for the Pub/Sub emulator
//!
//! ## Delivery
//!
//! Delivery is at-least-once. A handler that returns without acknowledging
//! leaves the message leased; the broker redelivers it once the ack deadline
//! passes. Messages sharing an ordering key arrive in publish order when the
//! subscription has ordering enabled.
//!
//! ## Usage
//!
//! ```rust
//! use relay_pubsub::{InMemoryBroker, Provisioner, PublishOptions, Publisher};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> relay_pubsub::Result<()> {
//! let client = Arc::new(InMemoryBroker::new("my-project"));
//! let provisioner = Provisioner::new(client.clone());
//!
//! let topic = provisioner.ensure_topic("orders").await?;
//! provisioner
//!     .ensure_subscription(&topic, "billing", Some(r#"attributes.kind="invoice""#))
//!     .await?;
//!
//! let receipt = Publisher::new(client)
//!     .publish(&topic, json!({"id": 1}), PublishOptions::new().attribute("kind", "invoice"))
//!     .await?;
//! println!("published {}", receipt.message_id);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod codec;
pub mod emulator;
pub mod error;
pub mod filter;
pub mod message;
pub mod provisioning;
pub mod publisher;
pub mod subscriber;
pub mod topic;
pub mod traits;
pub mod types;

// Re-export public API
pub use broker::{BrokerStats, DEAD_LETTER_SOURCE_ATTRIBUTE, InMemoryBroker};
pub use codec::JsonCodec;
pub use emulator::{EMULATOR_HOST_ENV, EmulatorClient};
pub use error::{BrokerError, BrokerResult, DeliveryError, PubSubError, Result, StatusCode};
pub use filter::{Filter, FilterError};
pub use message::{
    DiagnosticRecord, InboundMessage, OutboundMessage, PublishReceipt, ReceivedMessage,
};
pub use provisioning::{ConfigDrift, CreateOutcome, Provisioner, detect_drift};
pub use publisher::{PublishOptions, Publisher};
pub use subscriber::{
    DeliveryErrorReceiver, DiagnosticHandler, ListenOptions, Listener, ListenerStats,
    MAX_CONCURRENCY, RecordProcessor, Subscriber,
};
pub use topic::{Subscription, Topic};
pub use traits::{BrokerClient, FnHandler, MessageHandler};
pub use types::{
    Attributes, DEFAULT_ACK_DEADLINE_SECONDS, DEFAULT_MAX_DELIVERY_ATTEMPTS, MessageId,
    SubscriptionDescription, SubscriptionOptions,
};
