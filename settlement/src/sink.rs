//! Dead-letter sink abstraction.
//!
//! The processors talk to a sink trait rather than the concrete queue so
//! tests can capture escalations in memory. Production wires the ledger's
//! PostgreSQL-backed [`DeadLetterQueue`].

use fundflow_core::Envelope;
use fundflow_ledger::{DeadLetterQueue, LedgerError};
use std::future::Future;
use std::pin::Pin;

/// Destination for events that exhausted their retry budget.
pub trait DeadLetterSink: Send + Sync {
    /// Persist a failed event with its failure metadata.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the sink itself is down; the
    /// caller must NOT commit the offset in that case — dead-lettering is
    /// the last stop before data loss.
    fn record_failure(
        &self,
        envelope: &Envelope,
        error_message: &str,
        error_details: Option<&str>,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;
}

impl DeadLetterSink for DeadLetterQueue {
    fn record_failure(
        &self,
        envelope: &Envelope,
        error_message: &str,
        error_details: Option<&str>,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let envelope = envelope.clone();
        let error_message = error_message.to_string();
        let error_details = error_details.map(ToString::to_string);
        Box::pin(async move {
            // Preserve the payload verbatim; malformed JSON is wrapped as a
            // string so the operator still sees the raw bytes.
            let payload = serde_json::from_slice::<serde_json::Value>(&envelope.payload)
                .unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&envelope.payload).into_owned())
                });

            self.add_entry(
                &envelope.topic,
                envelope.key.as_deref(),
                envelope.event_type.as_deref(),
                &payload,
                &error_message,
                error_details.as_deref(),
                attempts,
            )
            .await?;
            Ok(())
        })
    }
}
