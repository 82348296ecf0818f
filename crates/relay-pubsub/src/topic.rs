use serde::{Deserialize, Serialize};

/// Lazy handle to a topic.
///
/// Holding a handle says nothing about existence; the topic is established by
/// provisioning and may be deleted out of band at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    /// Project the topic lives in
    pub project_id: String,
    /// Topic name
    pub name: String,
}

impl Topic {
    /// Create a new topic handle
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
        }
    }

    /// Get the topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the project ID
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `projects/{project}/topics/{name}`
    pub fn fully_qualified_name(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.name)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Lazy handle to a subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Project the subscription lives in
    pub project_id: String,
    /// Subscription name
    pub name: String,
}

impl Subscription {
    /// Create a new subscription handle
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
        }
    }

    /// Get the subscription name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the project ID
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `projects/{project}/subscriptions/{name}`
    pub fn fully_qualified_name(&self) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, self.name)
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Strip a `projects/{project}/topics/` prefix, leaving bare names untouched
pub fn short_topic_name(name: &str) -> &str {
    match name.rfind("/topics/") {
        Some(index) => &name[index + "/topics/".len()..],
        None => name,
    }
}
