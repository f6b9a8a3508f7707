//! In-memory test doubles for FundFlow.
//!
//! Provides a fast, deterministic [`InMemoryEventChannel`] implementing the
//! `EventChannel` trait from `fundflow-core`, so gateway and settlement tests
//! can exercise the full publish/consume pipeline without a broker.
//!
//! The double keeps the contract honest:
//!
//! - messages are partitioned by key hash, ordered within a partition
//! - consumer groups track committed offsets; a handler error stops the
//!   consume loop with the offset uncommitted, exactly like the Kafka
//!   implementation
//! - publishes can be forced to fail, for testing the gateway's
//!   `UpstreamUnavailable` path

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Test infrastructure uses unwrap for simplicity; lock poisoning aborts the test
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use fundflow_core::{ChannelError, Envelope, EventChannel, EventHandler, EventRecord, Published, TopicSpec};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    /// Topic name -> partition count, from `ensure_topics`.
    topics: HashMap<String, i32>,
    /// Topic name -> append-only message log.
    logs: HashMap<String, Vec<Envelope>>,
    /// (group, topic) -> index of the next uncommitted message.
    committed: HashMap<(String, String), usize>,
}

/// In-memory event channel for deterministic tests.
///
/// Cloning shares the underlying log, so a test can publish through one
/// clone and inspect what a service consumed through another.
///
/// # Example
///
/// ```
/// use fundflow_testing::InMemoryEventChannel;
/// use fundflow_core::{EventChannel, EventRecord};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = InMemoryEventChannel::new();
/// let record = EventRecord {
///     key: "DON-1".to_string(),
///     event_type: "donation.created".to_string(),
///     payload: b"{}".to_vec(),
/// };
/// channel.publish("donation", &record).await?;
/// assert_eq!(channel.published("donation").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventChannel {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryEventChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent publish to fail with
    /// [`ChannelError::PublishFailed`] until called again with `false`.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Everything published to `topic` so far, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Partition assignment: stable hash of the key, like a real broker.
    fn partition_for(key: &str, partitions: i32) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let partition = (hasher.finish() % partitions.max(1) as u64) as i32;
        partition
    }
}

impl EventChannel for InMemoryEventChannel {
    fn ensure_topics(
        &self,
        topics: &[TopicSpec],
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let topics = topics.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            for spec in topics {
                inner.topics.entry(spec.name.clone()).or_insert(spec.partitions);
            }
            Ok(())
        })
    }

    fn publish(
        &self,
        topic: &str,
        record: &EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Published, ChannelError>> + Send + '_>> {
        let topic = topic.to_string();
        let record = record.clone();
        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(ChannelError::PublishFailed {
                    topic,
                    reason: "forced failure".to_string(),
                });
            }

            let published = {
                let mut inner = self.inner.lock().unwrap();
                let partitions = inner.topics.get(&topic).copied().unwrap_or(1);
                let log = inner.logs.entry(topic.clone()).or_default();
                #[allow(clippy::cast_possible_wrap)]
                let offset = log.len() as i64;
                let envelope = Envelope {
                    topic: topic.clone(),
                    partition: Self::partition_for(&record.key, partitions),
                    offset,
                    key: Some(record.key.clone()),
                    event_type: Some(record.event_type.clone()),
                    source: Some("in-memory".to_string()),
                    payload: record.payload.clone(),
                };
                let partition = envelope.partition;
                log.push(envelope);
                Published { partition, offset }
            };

            self.notify.notify_waiters();
            Ok(published)
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
        Box::pin(async move {
            loop {
                let notified = self.notify.notified();

                // Drain everything currently pending, one message at a time,
                // committing only after the handler succeeds.
                loop {
                    let next = {
                        let inner = self.inner.lock().unwrap();
                        topics.iter().find_map(|topic| {
                            let cursor = inner
                                .committed
                                .get(&(group.clone(), topic.clone()))
                                .copied()
                                .unwrap_or(0);
                            inner
                                .logs
                                .get(topic)
                                .and_then(|log| log.get(cursor))
                                .map(|envelope| (topic.clone(), cursor, envelope.clone()))
                        })
                    };

                    let Some((topic, cursor, envelope)) = next else {
                        break;
                    };

                    handler.handle(envelope).await?;

                    self.inner
                        .lock()
                        .unwrap()
                        .committed
                        .insert((group.clone(), topic), cursor + 1);
                }

                notified.await;
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        seen: AtomicUsize,
    }

    impl EventHandler for Counting {
        fn handle(
            &self,
            _envelope: Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn record(key: &str) -> EventRecord {
        EventRecord {
            key: key.to_string(),
            event_type: "test.event".to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn publish_is_inspectable() {
        let channel = InMemoryEventChannel::new();
        channel.publish("donation", &record("a")).await.unwrap();
        channel.publish("donation", &record("b")).await.unwrap();
        assert_eq!(channel.published("donation").len(), 2);
        assert!(channel.published("payment").is_empty());
    }

    #[tokio::test]
    async fn forced_publish_failure() {
        let channel = InMemoryEventChannel::new();
        channel.set_fail_publishes(true);
        let result = channel.publish("donation", &record("a")).await;
        assert!(matches!(result, Err(ChannelError::PublishFailed { .. })));
        assert!(channel.published("donation").is_empty());
    }

    #[tokio::test]
    async fn consumer_sees_backlog_and_new_messages() {
        let channel = InMemoryEventChannel::new();
        channel.publish("donation", &record("before")).await.unwrap();

        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let consume = {
            let channel = channel.clone();
            let handler = Arc::clone(&handler) as Arc<dyn EventHandler>;
            tokio::spawn(async move { channel.consume(&["donation"], "g1", handler).await })
        };

        channel.publish("donation", &record("after")).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while handler.seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        consume.abort();
    }

    #[tokio::test]
    async fn same_key_maps_to_same_partition() {
        let channel = InMemoryEventChannel::new();
        channel
            .ensure_topics(&[TopicSpec::new("donation", 3)])
            .await
            .unwrap();
        channel.publish("donation", &record("DON-1")).await.unwrap();
        channel.publish("donation", &record("DON-1")).await.unwrap();

        let published = channel.published("donation");
        assert_eq!(published[0].partition, published[1].partition);
    }
}
