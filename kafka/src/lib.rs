//! Kafka event channel implementation for FundFlow.
//!
//! This crate provides the production implementation of the
//! [`EventChannel`] trait from `fundflow-core`, backed by rdkafka. It works
//! against any Kafka-compatible broker (Apache Kafka, Redpanda, AWS MSK).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//!
//! - Publishes wait for broker acknowledgment (`acks=all` by default), so a
//!   resolved publish is durable.
//! - Consumer offsets are committed only AFTER the handler completes without
//!   error. A crash mid-handler redelivers the message.
//! - Handlers MUST be idempotent; the pipeline's settlement records and
//!   idempotency keys exist precisely because redelivery is normal.
//! - Ordering is guaranteed within a partition; producers key messages by
//!   the domain id whose relative order matters.
//!
//! # Example
//!
//! ```no_run
//! use fundflow_kafka::KafkaEventChannel;
//! use fundflow_core::{EventChannel, EventRecord, TopicSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = KafkaEventChannel::builder()
//!     .brokers("localhost:9092")
//!     .source("donation-service")
//!     .build()?;
//!
//! channel.ensure_topics(&[TopicSpec::new("donation", 3)]).await?;
//!
//! let record = EventRecord {
//!     key: "DON-123".to_string(),
//!     event_type: "donation.created".to_string(),
//!     payload: b"{}".to_vec(),
//! };
//! channel.publish("donation", &record).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admin;
mod consumer;

use fundflow_core::{ChannelError, EventChannel, EventHandler, EventRecord, Published, TopicSpec};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the event type tag (e.g. `donation.created`).
pub const HEADER_EVENT_TYPE: &str = "event-type";
/// Header identifying the producing service.
pub const HEADER_SOURCE: &str = "source";

/// Kafka-backed event channel.
///
/// One instance is constructed per service and shared (via `Arc`) by all of
/// its handlers. The producer is created eagerly; consumers are created per
/// [`EventChannel::consume`] call so each consumer group owns its own
/// connection.
pub struct KafkaEventChannel {
    /// Kafka producer for publishing events.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers and admin clients).
    brokers: String,
    /// Value of the `source` header stamped on published events.
    source: String,
    /// Producer ack timeout.
    timeout: Duration,
    /// Auto offset reset policy for new consumer groups.
    auto_offset_reset: String,
}

impl KafkaEventChannel {
    /// Create a new builder for configuring the channel.
    #[must_use]
    pub fn builder() -> KafkaEventChannelBuilder {
        KafkaEventChannelBuilder::default()
    }

    /// Broker addresses this channel talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`KafkaEventChannel`].
///
/// # Example
///
/// ```no_run
/// use fundflow_kafka::KafkaEventChannel;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = KafkaEventChannel::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .source("payment-service")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct KafkaEventChannelBuilder {
    brokers: Option<String>,
    source: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl KafkaEventChannelBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the service name stamped on the `source` header of published
    /// events; also used as the Kafka `client.id`.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "all" — a resolved publish means the event is durable.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the publish ack timeout.
    ///
    /// Default: 5 seconds. A publish that cannot be acked within this window
    /// fails fast with [`ChannelError::PublishFailed`] so the caller can
    /// surface a retryable error.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where new consumer groups start reading: "earliest" or "latest".
    ///
    /// Default: "earliest" — a freshly deployed consumer must not skip
    /// events published before its group existed.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaEventChannel`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<KafkaEventChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let source = self.source.unwrap_or_else(|| "fundflow".to_string());
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("client.id", &source)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .set("compression.type", &compression);

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| ChannelError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            source = %source,
            acks = %acks,
            compression = %compression,
            auto_offset_reset = %auto_offset_reset,
            "KafkaEventChannel created"
        );

        Ok(KafkaEventChannel {
            producer,
            brokers,
            source,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset,
        })
    }
}

impl EventChannel for KafkaEventChannel {
    fn ensure_topics(
        &self,
        topics: &[TopicSpec],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let topics = topics.to_vec();
        Box::pin(async move { admin::ensure_topics(&self.brokers, &topics).await })
    }

    fn publish(
        &self,
        topic: &str,
        record: &EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Published, ChannelError>> + Send + '_>> {
        let topic = topic.to_string();
        let record = record.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: HEADER_EVENT_TYPE,
                    value: Some(record.event_type.as_str()),
                })
                .insert(Header {
                    key: HEADER_SOURCE,
                    value: Some(self.source.as_str()),
                });

            let kafka_record = FutureRecord::to(&topic)
                .payload(&record.payload)
                .key(record.key.as_str())
                .headers(headers);

            let send_result = self
                .producer
                .send(kafka_record, Timeout::After(timeout))
                .await;

            match send_result {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        key = %record.key,
                        event_type = %record.event_type,
                        "Event published"
                    );
                    Ok(Published { partition, offset })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %record.key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(ChannelError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn consume(
        &self,
        topics: &[&str],
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group = group.to_string();
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            consumer::run(&brokers, &topics, &group, &auto_offset_reset, handler).await
        })
    }
}
