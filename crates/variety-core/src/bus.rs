//! Topic-addressed publish/subscribe
//!
//! The real bus is an external collaborator; [`MessageBus`] is the contract
//! the variety subsystem needs from it and [`LocalBus`] is an in-process
//! implementation built on tokio broadcast channels.
//!
//! Delivery is best effort: publishing to a topic nobody listens on is not
//! an error, and a subscriber that falls behind loses the oldest messages.

use std::fmt::{self, Display};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::envelope::Envelope;
use crate::level::Level;

/// Default per-topic channel capacity
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// A bus topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Topic a hierarchy level publishes to and receives on: `level.<n>`
    pub fn level(level: Level) -> Self {
        Self(format!("level.{}", level.number()))
    }

    /// Aggregate metrics updates
    pub fn metrics() -> Self {
        Self::new("variety.metrics")
    }

    /// Balance status updates
    pub fn balance() -> Self {
        Self::new("variety.balance")
    }

    pub fn operations() -> Self {
        Self::new("operations")
    }

    pub fn coordination() -> Self {
        Self::new("coordination")
    }

    pub fn resources() -> Self {
        Self::new("resources")
    }

    pub fn intelligence() -> Self {
        Self::new("intelligence")
    }

    /// Cross-cutting topic carrying a level's traffic alongside `level.<n>`
    pub fn cross_cutting(level: Level) -> Option<Self> {
        match level {
            Level::S1 => Some(Self::operations()),
            Level::S2 => Some(Self::coordination()),
            Level::S3 => Some(Self::resources()),
            Level::S4 => Some(Self::intelligence()),
            Level::S5 => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asynchronous topic-addressed publish/subscribe channel
pub trait MessageBus: Send + Sync {
    /// Publish to every current subscriber of a topic
    ///
    /// Returns the number of subscribers the envelope reached.
    fn publish(&self, topic: &Topic, envelope: Envelope) -> usize;

    /// Subscribe to a topic; only envelopes published afterwards are seen
    fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Envelope>;
}

/// In-process bus backed by one broadcast channel per topic
pub struct LocalBus {
    topics: DashMap<Topic, broadcast::Sender<Envelope>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &Topic) -> broadcast::Sender<Envelope> {
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of topics that have been touched
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Current subscriber count for a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, topic: &Topic, envelope: Envelope) -> usize {
        let tx = self.sender(topic);
        let kind = envelope.kind;
        let reached = tx.send(envelope).unwrap_or(0);
        trace!(topic = %topic, kind = %kind, reached, "Published");
        reached
    }

    fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Envelope> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::envelope::EnvelopeKind;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::level(Level::S3).as_str(), "level.3");
        assert_eq!(Topic::metrics().as_str(), "variety.metrics");
        assert_eq!(Topic::balance().as_str(), "variety.balance");
        assert_eq!(Topic::cross_cutting(Level::S1), Some(Topic::operations()));
        assert_eq!(Topic::cross_cutting(Level::S5), None);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = LocalBus::new();
        let reached = bus.publish(
            &Topic::level(Level::S1),
            Envelope::new(EnvelopeKind::RawEvent, Map::new()),
        );
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let topic = Topic::level(Level::S2);
        let mut rx1 = bus.subscribe(&topic);
        let mut rx2 = bus.subscribe(&topic);
        assert_eq!(bus.subscriber_count(&topic), 2);

        let envelope = Envelope::new(EnvelopeKind::Pattern, Map::new());
        assert_eq!(bus.publish(&topic, envelope.clone()), 2);

        assert_eq!(rx1.recv().await.unwrap(), envelope);
        assert_eq!(rx2.recv().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe(&Topic::level(Level::S1));
        bus.publish(
            &Topic::level(Level::S2),
            Envelope::new(EnvelopeKind::Pattern, Map::new()),
        );
        assert!(rx.try_recv().is_err());
    }
}
