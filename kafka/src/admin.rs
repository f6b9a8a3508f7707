//! Idempotent topic administration.
//!
//! Every service ensures its topics exist at startup. Creation must be safe
//! to race: multiple instances boot concurrently and all call this with the
//! same specs.

use fundflow_core::{ChannelError, TopicSpec};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::RDKafkaErrorCode;

/// Create the given topics if they do not already exist.
///
/// Topics are created with replication factor 1; partition counts come from
/// the specs. A `TopicAlreadyExists` response from the broker is treated as
/// success, which makes concurrent startup races harmless.
///
/// # Errors
///
/// Returns [`ChannelError::AdminFailed`] if the admin client cannot be
/// created or a topic can neither be created nor confirmed to exist.
pub(crate) async fn ensure_topics(brokers: &str, topics: &[TopicSpec]) -> Result<(), ChannelError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .map_err(|e| ChannelError::ConnectionFailed(format!("Failed to create admin client: {e}")))?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|spec| NewTopic::new(&spec.name, spec.partitions, TopicReplication::Fixed(1)))
        .collect();

    let results = admin
        .create_topics(new_topics.iter(), &AdminOptions::new())
        .await
        .map_err(|e| ChannelError::AdminFailed {
            topic: topics.first().map(|t| t.name.clone()).unwrap_or_default(),
            reason: format!("create_topics request failed: {e}"),
        })?;

    for result in results {
        match result {
            Ok(topic) => {
                tracing::info!(topic = %topic, "Topic created");
            },
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(topic = %topic, "Topic already exists");
            },
            Err((topic, code)) => {
                return Err(ChannelError::AdminFailed {
                    topic,
                    reason: code.to_string(),
                });
            },
        }
    }

    Ok(())
}
