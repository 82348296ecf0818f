use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// String-keyed message attributes
pub type Attributes = HashMap<String, String>;

/// Default number of deliveries before a message is dead-lettered
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 15;

/// Accepted range for `max_delivery_attempts`
pub const MIN_MAX_DELIVERY_ATTEMPTS: u32 = 5;
pub const MAX_MAX_DELIVERY_ATTEMPTS: u32 = 100;

/// Default ack deadline in seconds
pub const DEFAULT_ACK_DEADLINE_SECONDS: u32 = 10;

/// Accepted range for `ack_deadline_seconds`
pub const MIN_ACK_DEADLINE_SECONDS: u32 = 10;
pub const MAX_ACK_DEADLINE_SECONDS: u32 = 600;

/// Broker-assigned message identifier, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message ID from a broker-issued string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Options applied when a subscription is created.
///
/// The broker keeps these for the lifetime of the subscription; recreating
/// with different options requires a new subscription name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct SubscriptionOptions {
    /// Attribute filter expression
    pub filter: Option<String>,
    /// Deliveries before a message is dead-lettered
    pub max_delivery_attempts: u32,
    /// Seconds a pulled message stays leased before redelivery
    pub ack_deadline_seconds: u32,
    /// Deliver messages sharing an ordering key in publish order
    pub enable_message_ordering: bool,
    /// Topic receiving dead-lettered messages
    pub dead_letter_topic: Option<String>,
}

impl SubscriptionOptions {
    /// Create default subscription options
    pub fn new() -> Self {
        Self {
            filter: None,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            ack_deadline_seconds: DEFAULT_ACK_DEADLINE_SECONDS,
            enable_message_ordering: false,
            dead_letter_topic: None,
        }
    }

    /// Check value ranges, returning a description of the first violation
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_MAX_DELIVERY_ATTEMPTS..=MAX_MAX_DELIVERY_ATTEMPTS)
            .contains(&self.max_delivery_attempts)
        {
            return Err(format!(
                "max_delivery_attempts must be between {} and {}, got {}",
                MIN_MAX_DELIVERY_ATTEMPTS, MAX_MAX_DELIVERY_ATTEMPTS, self.max_delivery_attempts
            ));
        }

        if !(MIN_ACK_DEADLINE_SECONDS..=MAX_ACK_DEADLINE_SECONDS)
            .contains(&self.ack_deadline_seconds)
        {
            return Err(format!(
                "ack_deadline_seconds must be between {} and {}, got {}",
                MIN_ACK_DEADLINE_SECONDS, MAX_ACK_DEADLINE_SECONDS, self.ack_deadline_seconds
            ));
        }

        if matches!(&self.filter, Some(filter) if filter.trim().is_empty()) {
            return Err("filter must not be blank".to_string());
        }

        Ok(())
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker-side view of an existing subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescription {
    /// Subscription name
    pub name: String,
    /// Name of the topic the subscription is bound to
    pub topic: String,
    /// Options the subscription was created with
    pub options: SubscriptionOptions,
}
