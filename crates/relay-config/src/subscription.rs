use crate::{ConfigError, Result};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Defaults applied to subscriptions created at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Attribute filter used when the caller supplies none
    pub filter: Option<String>,
    /// Deliveries before a message is dead-lettered (5..=100)
    pub max_delivery_attempts: u32,
    /// Lease duration in seconds (10..=600)
    pub ack_deadline_seconds: u32,
    /// Deliver same-key messages in publish order
    pub enable_message_ordering: bool,
    /// Topic receiving dead-lettered messages
    pub dead_letter_topic: Option<String>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            filter: None,
            max_delivery_attempts: 15,
            ack_deadline_seconds: 10,
            enable_message_ordering: false,
            dead_letter_topic: None,
        }
    }
}

impl SubscriptionConfig {
    /// Validate the subscription defaults
    pub fn validate(&self) -> Result<()> {
        if !(5..=100).contains(&self.max_delivery_attempts) {
            return Err(ConfigError::validation(
                "subscription",
                format!(
                    "max_delivery_attempts must be between 5 and 100, got {}",
                    self.max_delivery_attempts
                ),
            ));
        }

        if !(10..=600).contains(&self.ack_deadline_seconds) {
            return Err(ConfigError::validation(
                "subscription",
                format!(
                    "ack_deadline_seconds must be between 10 and 600, got {}",
                    self.ack_deadline_seconds
                ),
            ));
        }

        if let Some(filter) = &self.filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::validation("subscription", "filter cannot be blank"));
            }
        }

        if let Some(topic) = &self.dead_letter_topic {
            if topic.trim().is_empty() {
                return Err(ConfigError::validation(
                    "subscription",
                    "dead_letter_topic cannot be blank",
                ));
            }
        }

        Ok(())
    }
}
