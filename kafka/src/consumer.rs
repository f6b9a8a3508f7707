//! Handler-driven consume loop with manual offset commits.
//!
//! The loop owns dispatch so the commit point is exactly where the delivery
//! contract requires it: AFTER the handler returns `Ok`. Dispatch is
//! sequential within the consumer, preserving per-partition order.

use fundflow_core::{ChannelError, Envelope, EventHandler};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use std::sync::Arc;

/// Run the consume loop until the stream dies or a handler error forces a
/// stop without commit.
///
/// Offsets are committed per message, after the handler resolves `Ok`. A
/// handler `Err` stops the loop with the offset uncommitted; on restart the
/// message is redelivered. Handlers with their own retry and dead-letter
/// policy (the settlement service) only return `Err` for failures they want
/// replayed.
pub(crate) async fn run(
    brokers: &str,
    topics: &[String],
    group: &str,
    auto_offset_reset: &str,
    handler: Arc<dyn EventHandler>,
) -> Result<(), ChannelError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group)
        .set("enable.auto.commit", "false") // Manual commit for at-least-once
        .set("auto.offset.reset", auto_offset_reset)
        .set("session.timeout.ms", "6000")
        .set("enable.partition.eof", "false")
        .create()
        .map_err(|e| ChannelError::SubscriptionFailed {
            topics: topics.to_vec(),
            reason: format!("Failed to create consumer: {e}"),
        })?;

    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer
        .subscribe(&topic_refs)
        .map_err(|e| ChannelError::SubscriptionFailed {
            topics: topics.to_vec(),
            reason: format!("Failed to subscribe: {e}"),
        })?;

    tracing::info!(
        topics = ?topics,
        consumer_group = %group,
        auto_offset_reset = %auto_offset_reset,
        manual_commit = true,
        "Subscribed to topics"
    );

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(message) => {
                let Some(payload) = message.payload() else {
                    // Tombstones and empty messages carry nothing to handle;
                    // commit so the group does not reprocess them forever.
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Message has no payload, skipping"
                    );
                    commit(&consumer, &message);
                    continue;
                };

                let envelope = to_envelope(&message, payload);
                tracing::trace!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    key = envelope.key.as_deref().unwrap_or(""),
                    event_type = envelope.event_type.as_deref().unwrap_or(""),
                    "Received event"
                );

                match handler.handle(envelope).await {
                    Ok(()) => commit(&consumer, &message),
                    Err(e) => {
                        // Offset stays uncommitted: the message is redelivered
                        // after restart or rebalance.
                        tracing::error!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            error = %e,
                            "Handler failed, stopping without commit"
                        );
                        return Err(e);
                    },
                }
            },
            Err(e) => {
                return Err(ChannelError::TransportError(format!(
                    "Failed to receive message: {e}"
                )));
            },
        }
    }

    tracing::debug!("Consumer stream ended");
    Ok(())
}

/// Commit one message's offset, logging (not failing) on commit errors.
/// A lost commit only widens the redelivery window; handlers are idempotent.
fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

/// Map a Kafka message to the channel-neutral [`Envelope`].
fn to_envelope(message: &BorrowedMessage<'_>, payload: &[u8]) -> Envelope {
    let mut event_type = None;
    let mut source = None;
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match (header.key, header.value) {
                (crate::HEADER_EVENT_TYPE, Some(value)) => {
                    event_type = String::from_utf8(value.to_vec()).ok();
                },
                (crate::HEADER_SOURCE, Some(value)) => {
                    source = String::from_utf8(value.to_vec()).ok();
                },
                _ => {},
            }
        }
    }

    Envelope {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .and_then(|k| String::from_utf8(k.to_vec()).ok()),
        event_type,
        source,
        payload: payload.to_vec(),
    }
}
