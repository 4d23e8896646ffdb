//! Topics and the subscription registry.
//!
//! The registry has set semantics (no duplicates, no reference counts) and
//! keeps insertion order, which is the order topics are replayed after a
//! reconnect.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque subscription channel name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap a topic name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Insertion-ordered set of desired subscriptions.
///
/// Membership is independent of the channel lifecycle: topics added while
/// disconnected stay here until they are explicitly removed.
#[derive(Clone, Debug, Default)]
pub struct TopicRegistry {
    topics: Vec<Topic>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic. Returns `true` if it was not already present.
    pub fn insert(&mut self, topic: Topic) -> bool {
        if self.contains(topic.as_str()) {
            return false;
        }
        self.topics.push(topic);
        true
    }

    /// Remove a topic. Returns `true` if it was present.
    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.topics.len();
        self.topics.retain(|t| t.as_str() != topic);
        self.topics.len() != before
    }

    /// Whether the topic is registered.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t.as_str() == topic)
    }

    /// Registered topics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether no topics are registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
