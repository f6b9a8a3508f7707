//! Event channel abstraction connecting the pipeline's services.
//!
//! The channel is a durable, partitioned, ordered-per-key log with
//! **at-least-once delivery**. Messages with the same key reach a given
//! consumer group in publish order; nothing is guaranteed across keys or
//! partitions.
//!
//! # Key Principles
//!
//! - **Acked publish**: [`EventChannel::publish`] resolves only once the
//!   broker has acknowledged persistence.
//! - **Commit after handling**: [`EventChannel::consume`] invokes the handler
//!   for each message and commits the offset only after the handler returns
//!   `Ok`. A crash mid-handler redelivers the message.
//! - **Idempotent handlers**: redelivery is normal operation, so every
//!   handler must tolerate seeing the same message twice.
//!
//! # Implementations
//!
//! - `KafkaEventChannel` (`fundflow-kafka`) — production, Kafka-compatible
//! - `InMemoryEventChannel` (`fundflow-testing`) — deterministic tests
//!
//! # Dyn Compatibility
//!
//! Trait methods return explicit `Pin<Box<dyn Future>>` instead of `async fn`
//! so services can hold an `Arc<dyn EventChannel>` injected at construction
//! time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event channel operations.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to create or verify a topic.
    #[error("Topic admin failed for '{topic}': {reason}")]
    AdminFailed {
        /// The topic being created or verified.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to publish an event to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A received message could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// A handler reported an unrecoverable problem with a message.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Desired shape of a topic, used for idempotent creation at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: i32,
}

impl TopicSpec {
    /// Build a spec for `name` with `partitions` partitions.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }
}

/// An outgoing event: key, type tag, and serialized payload.
///
/// The key is the domain id whose relative order must be preserved; the
/// channel maps it to a partition. The `event_type` travels as a message
/// header alongside the producing service's `source` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Partition key (e.g. the donation id).
    pub key: String,
    /// `event-type` header value (e.g. `donation.created`).
    pub event_type: String,
    /// Serialized JSON payload.
    pub payload: Vec<u8>,
}

/// Broker acknowledgment for a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Partition the event landed on.
    pub partition: i32,
    /// Offset within that partition.
    pub offset: i64,
}

/// A delivered message, as seen by a consumer handler.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Topic the message arrived on.
    pub topic: String,
    /// Partition the message arrived on.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key, if the producer set one.
    pub key: Option<String>,
    /// `event-type` header, if present.
    pub event_type: Option<String>,
    /// `source` header, if present.
    pub source: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Handler invoked by [`EventChannel::consume`] for each delivered message.
///
/// Returning `Ok(())` commits the offset; the message will not be seen again
/// by this group. Returning `Err` leaves the offset uncommitted, so the
/// message is redelivered after restart or rebalance. Handlers that have
/// their own retry and dead-letter policy should therefore only return `Err`
/// for failures they want replayed.
pub trait EventHandler: Send + Sync {
    /// Process one delivered message.
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

/// Trait for event channel implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one channel instance is shared by
/// all concurrent request and event handlers of a service.
pub trait EventChannel: Send + Sync {
    /// Create the given topics if they do not exist.
    ///
    /// Idempotent and safe to race: concurrent service instances may call
    /// this with the same specs at startup and all succeed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AdminFailed`] if a topic can neither be
    /// created nor confirmed to exist.
    fn ensure_topics(
        &self,
        topics: &[TopicSpec],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;

    /// Publish an event and wait for broker acknowledgment.
    ///
    /// Resolving `Ok` means the broker has durably accepted the event; any
    /// subscriber group polling from a committed offset will eventually see
    /// it at least once.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] if the broker does not
    /// acknowledge within the configured timeout.
    fn publish(
        &self,
        topic: &str,
        record: &EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Published, ChannelError>> + Send + '_>>;

    /// Consume topics as part of `group`, dispatching each message to
    /// `handler` and committing its offset only after the handler returns
    /// `Ok`.
    ///
    /// The returned future runs until the subscription fails; binaries spawn
    /// it and abort on shutdown. Message order is preserved per partition
    /// because dispatch is sequential within the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SubscriptionFailed`] if the group cannot be
    /// joined, or [`ChannelError::TransportError`] if the stream dies.
    fn consume(
        &self,
        topics: &[&str],
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_spec_construction() {
        let spec = TopicSpec::new("donation", 3);
        assert_eq!(spec.name, "donation");
        assert_eq!(spec.partitions, 3);
    }

    #[test]
    fn channel_error_display_includes_topic() {
        let err = ChannelError::PublishFailed {
            topic: "donation".to_string(),
            reason: "broker down".to_string(),
        };
        assert!(err.to_string().contains("donation"));
        assert!(err.to_string().contains("broker down"));
    }
}
