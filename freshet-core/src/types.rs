//! Strongly-typed identifiers and resource paths.
//!
//! The streaming service assigns decimal-string shard identifiers
//! (`"0"`, `"1"`, ...), so `ShardId` wraps a `String` rather than an
//! integer. The wrapper still prevents mixing shard ids up with other
//! string-shaped values such as cursors or consumer ids.

use std::fmt;

/// Unique identifier for a shard within a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(String);

impl ShardId {
    /// Creates a shard id from a raw string value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ShardId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Fully-qualified path of a topic: project plus topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    /// Project owning the topic.
    pub project: String,
    /// Topic name within the project.
    pub topic: String,
}

impl TopicPath {
    /// Creates a topic path.
    #[must_use]
    pub fn new(project: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.topic)
    }
}

/// A consumer-group subscription on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// The topic the subscription consumes.
    pub topic: TopicPath,
    /// Service-assigned subscription id.
    pub sub_id: String,
}

impl Subscription {
    /// Creates a subscription reference.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        topic: impl Into<String>,
        sub_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: TopicPath::new(project, topic),
            sub_id: sub_id.into(),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.sub_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_roundtrip() {
        let id = ShardId::new("7");
        assert_eq!(id.as_str(), "7");
        assert_eq!(format!("{id}"), "7");
        assert_eq!(ShardId::from("7"), id);
    }

    #[test]
    fn test_shard_id_ordering() {
        // String ordering, not numeric: fine for stable iteration.
        let a = ShardId::new("0");
        let b = ShardId::new("1");
        assert!(a < b);
    }

    #[test]
    fn test_subscription_display() {
        let sub = Subscription::new("proj", "topic", "sub-1");
        assert_eq!(format!("{sub}"), "proj/topic/sub-1");
    }
}
