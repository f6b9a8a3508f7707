//! The payment processor: donation events in, ledger debits and payment
//! events out.
//!
//! Per donation the processor moves through `received → debiting →
//! settled(success | failed)`. The ledger's settlement record makes the
//! debit idempotent per donation id, so redelivery of an already-settled
//! donation re-emits the recorded outcome without touching the balance.

use crate::retry::RetryPolicy;
use crate::sink::DeadLetterSink;
use fundflow_core::events::TOPIC_PAYMENT;
use fundflow_core::{
    ChannelError, DonationEvent, Envelope, EventChannel, EventHandler, PaymentEvent, PaymentStatus,
};
use fundflow_ledger::{LedgerError, LedgerStore, Settlement, SettlementRequest, SettleOutcome};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Consumes `donation` events and settles them against the ledger.
pub struct PaymentProcessor<L> {
    ledger: L,
    channel: Arc<dyn EventChannel>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl<L: LedgerStore> PaymentProcessor<L> {
    /// Assemble a processor from its dependencies.
    #[must_use]
    pub fn new(ledger: L, channel: Arc<dyn EventChannel>, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            ledger,
            channel,
            dead_letters,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests use [`RetryPolicy::immediate`]).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Settle with backoff on transient ledger failures.
    ///
    /// Returns the final error once the budget is exhausted or the failure
    /// is not transient.
    async fn settle_with_retry(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettleOutcome, (LedgerError, usize)> {
        let mut attempt = 0;
        loop {
            match self.ledger.settle(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        donation_id = %request.donation_id,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient ledger failure, retrying settlement"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err((err, attempt + 1)),
            }
        }
    }

    /// Publish the payment event, retrying with backoff.
    ///
    /// Exhaustion returns `Err`: the offset stays uncommitted and the whole
    /// donation is redelivered, which is safe because the settlement record
    /// short-circuits the debit on replay.
    async fn publish_with_retry(&self, payment: &PaymentEvent) -> Result<(), ChannelError> {
        let record = payment
            .to_record()
            .map_err(|e| ChannelError::HandlerFailed(format!("serialize payment event: {e}")))?;

        let mut attempt = 0;
        loop {
            match self.channel.publish(TOPIC_PAYMENT, &record).await {
                Ok(_) => return Ok(()),
                Err(err) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        donation_id = %payment.donation_id,
                        attempt = attempt + 1,
                        error = %err,
                        "Payment publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Park an event in the dead-letter queue and allow the offset commit.
    ///
    /// If the sink itself fails, the error propagates so the offset is NOT
    /// committed — an event may be processed twice, but never lost.
    async fn dead_letter(
        &self,
        envelope: &Envelope,
        message: &str,
        details: Option<&str>,
        attempts: i32,
    ) -> Result<(), ChannelError> {
        self.dead_letters
            .record_failure(envelope, message, details, attempts)
            .await
            .map_err(|e| ChannelError::HandlerFailed(format!("dead-letter sink failed: {e}")))?;
        metrics::counter!("settlement.dead_lettered").increment(1);
        Ok(())
    }
}

/// Rebuild the payment event for a recorded settlement.
///
/// Uses the settlement's own timestamp so a redelivered donation re-emits a
/// byte-identical event.
fn payment_event_for(settlement: &Settlement) -> PaymentEvent {
    PaymentEvent {
        donation_id: settlement.donation_id.clone(),
        user_id: settlement.user_id,
        amount: settlement.amount,
        status: settlement.status,
        reason: settlement.reason.clone(),
        new_balance: settlement.new_balance,
        timestamp: settlement.settled_at,
    }
}

impl<L: LedgerStore> EventHandler for PaymentProcessor<L> {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        Box::pin(async move {
            let event = match DonationEvent::from_payload(&envelope.payload) {
                Ok(event) => event,
                Err(err) => {
                    // Retrying cannot fix a malformed payload; park it.
                    tracing::error!(
                        topic = %envelope.topic,
                        offset = envelope.offset,
                        error = %err,
                        "Malformed donation event"
                    );
                    self.dead_letter(&envelope, "malformed donation event", Some(&err.to_string()), 0)
                        .await?;
                    return Ok(());
                },
            };

            tracing::debug!(
                donation_id = %event.donation_id,
                user_id = %event.user_id,
                amount = %event.amount,
                "Donation received, debiting"
            );

            let request = SettlementRequest {
                donation_id: event.donation_id.clone(),
                user_id: event.user_id,
                amount: event.amount,
            };

            let outcome = match self.settle_with_retry(&request).await {
                Ok(outcome) => outcome,
                Err((err, attempts)) => {
                    // Retry budget exhausted: log + persist + skip, so one
                    // bad stretch cannot block the partition indefinitely.
                    tracing::error!(
                        donation_id = %event.donation_id,
                        attempts,
                        error = %err,
                        "Settlement failed after retries, dead-lettering"
                    );
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    self.dead_letter(
                        &envelope,
                        "settlement failed after retries",
                        Some(&err.to_string()),
                        attempts as i32,
                    )
                    .await?;
                    return Ok(());
                },
            };

            if outcome.is_replay() {
                tracing::info!(
                    donation_id = %event.donation_id,
                    "Donation already settled, re-emitting recorded outcome"
                );
                metrics::counter!("settlement.payments.replayed").increment(1);
            } else {
                let settlement = outcome.settlement();
                match settlement.status {
                    PaymentStatus::Success => {
                        metrics::counter!("settlement.payments.success").increment(1);
                    },
                    PaymentStatus::Failed => {
                        tracing::info!(
                            donation_id = %settlement.donation_id,
                            reason = settlement.reason.as_deref().unwrap_or("unknown"),
                            "Donation settled as failed"
                        );
                        metrics::counter!("settlement.payments.failed").increment(1);
                    },
                }
            }

            let payment = payment_event_for(outcome.settlement());
            self.publish_with_retry(&payment).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use fundflow_core::{CampaignId, DonationId, UserId};
    use fundflow_ledger::InMemoryLedgerStore;
    use fundflow_testing::InMemoryEventChannel;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sink that records escalations in memory.
    #[derive(Clone, Default)]
    struct RecordingSink {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl DeadLetterSink for RecordingSink {
        fn record_failure(
            &self,
            _envelope: &Envelope,
            error_message: &str,
            _error_details: Option<&str>,
            _attempts: i32,
        ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
            self.entries.lock().unwrap().push(error_message.to_string());
            Box::pin(async { Ok(()) })
        }
    }

    /// Sink that is down.
    struct FailingSink;

    impl DeadLetterSink for FailingSink {
        fn record_failure(
            &self,
            _envelope: &Envelope,
            _error_message: &str,
            _error_details: Option<&str>,
            _attempts: i32,
        ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
            Box::pin(async { Err(LedgerError::Database("sink down".to_string())) })
        }
    }

    /// Ledger that fails transiently N times before delegating.
    #[derive(Clone)]
    struct FlakyLedger {
        inner: InMemoryLedgerStore,
        remaining_failures: Arc<AtomicUsize>,
    }

    impl FlakyLedger {
        fn failing(inner: InMemoryLedgerStore, failures: usize) -> Self {
            Self {
                inner,
                remaining_failures: Arc::new(AtomicUsize::new(failures)),
            }
        }

        fn take_failure(&self) -> bool {
            self.remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl LedgerStore for FlakyLedger {
        async fn provision_account(
            &self,
            user_id: UserId,
            username: &str,
        ) -> Result<fundflow_ledger::ProvisionOutcome, LedgerError> {
            self.inner.provision_account(user_id, username).await
        }

        async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome, LedgerError> {
            if self.take_failure() {
                return Err(LedgerError::Database("connection reset".to_string()));
            }
            self.inner.settle(request).await
        }

        async fn get_account(
            &self,
            user_id: UserId,
        ) -> Result<Option<fundflow_ledger::LedgerAccount>, LedgerError> {
            self.inner.get_account(user_id).await
        }
    }

    fn donation(id: &str, user: i64, amount: i64) -> DonationEvent {
        DonationEvent::new(
            DonationId::from(id.to_string()),
            format!("key-{id}"),
            CampaignId(1),
            UserId(user),
            "donor@example.com".to_string(),
            Decimal::new(amount, 0),
        )
    }

    fn envelope_for(event: &DonationEvent) -> Envelope {
        let record = event.to_record().unwrap();
        Envelope {
            topic: "donation".to_string(),
            partition: 0,
            offset: 0,
            key: Some(record.key),
            event_type: Some(record.event_type),
            source: Some("test".to_string()),
            payload: record.payload,
        }
    }

    fn raw_envelope(payload: &[u8]) -> Envelope {
        Envelope {
            topic: "donation".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            event_type: None,
            source: None,
            payload: payload.to_vec(),
        }
    }

    async fn seeded_ledger(user: i64, balance: i64) -> InMemoryLedgerStore {
        let ledger = InMemoryLedgerStore::new();
        ledger.seed_account(UserId(user), Decimal::new(balance, 0)).await;
        ledger
    }

    #[tokio::test]
    async fn successful_settlement_debits_and_publishes_success() {
        let ledger = seeded_ledger(1, 1000).await;
        let channel = InMemoryEventChannel::new();
        let processor = PaymentProcessor::new(
            ledger.clone(),
            Arc::new(channel.clone()),
            Arc::new(RecordingSink::default()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        let event = donation("DON-1", 1, 400);
        processor.handle(envelope_for(&event)).await.unwrap();

        let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(600, 0));

        let published = channel.published(TOPIC_PAYMENT);
        assert_eq!(published.len(), 1);
        let payment = PaymentEvent::from_payload(&published[0].payload).unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.new_balance, Some(Decimal::new(600, 0)));
        assert_eq!(published[0].key.as_deref(), Some("DON-1"));
        assert_eq!(published[0].event_type.as_deref(), Some("payment.success"));
    }

    #[tokio::test]
    async fn insufficient_balance_fails_without_debiting() {
        let ledger = seeded_ledger(1, 1000).await;
        let channel = InMemoryEventChannel::new();
        let processor = PaymentProcessor::new(
            ledger.clone(),
            Arc::new(channel.clone()),
            Arc::new(RecordingSink::default()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        let event = donation("DON-1", 1, 1500);
        processor.handle(envelope_for(&event)).await.unwrap();

        let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(1000, 0));

        let published = channel.published(TOPIC_PAYMENT);
        assert_eq!(published.len(), 1);
        let payment = PaymentEvent::from_payload(&published[0].payload).unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.reason.as_deref(), Some("InsufficientBalance"));
        assert_eq!(published[0].event_type.as_deref(), Some("payment.failed"));
    }

    #[tokio::test]
    async fn unprovisioned_account_fails_without_creating_one() {
        let ledger = InMemoryLedgerStore::new();
        let channel = InMemoryEventChannel::new();
        let processor = PaymentProcessor::new(
            ledger.clone(),
            Arc::new(channel.clone()),
            Arc::new(RecordingSink::default()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        let event = donation("DON-1", 77, 400);
        processor.handle(envelope_for(&event)).await.unwrap();

        assert!(ledger.get_account(UserId(77)).await.unwrap().is_none());
        let published = channel.published(TOPIC_PAYMENT);
        let payment = PaymentEvent::from_payload(&published[0].payload).unwrap();
        assert_eq!(payment.reason.as_deref(), Some("AccountNotProvisioned"));
    }

    #[tokio::test]
    async fn redelivery_debits_once_and_reemits_an_identical_event() {
        let ledger = seeded_ledger(1, 1000).await;
        let channel = InMemoryEventChannel::new();
        let processor = PaymentProcessor::new(
            ledger.clone(),
            Arc::new(channel.clone()),
            Arc::new(RecordingSink::default()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        let event = donation("DON-1", 1, 400);
        processor.handle(envelope_for(&event)).await.unwrap();
        processor.handle(envelope_for(&event)).await.unwrap();

        // One debit, one settlement record.
        let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(600, 0));
        assert_eq!(ledger.settlement_count().await, 1);

        // Two payment events, byte-identical.
        let published = channel.published(TOPIC_PAYMENT);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload, published[1].payload);
    }

    #[tokio::test]
    async fn transient_ledger_failures_are_retried_to_success() {
        let ledger = seeded_ledger(1, 1000).await;
        let flaky = FlakyLedger::failing(ledger.clone(), 2);
        let channel = InMemoryEventChannel::new();
        let sink = RecordingSink::default();
        let processor = PaymentProcessor::new(
            flaky,
            Arc::new(channel.clone()),
            Arc::new(sink.clone()),
        )
        .with_retry_policy(RetryPolicy::immediate(3));

        processor.handle(envelope_for(&donation("DON-1", 1, 400))).await.unwrap();

        assert!(sink.messages().is_empty());
        assert_eq!(channel.published(TOPIC_PAYMENT).len(), 1);
        let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(600, 0));
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_and_move_on() {
        let ledger = seeded_ledger(1, 1000).await;
        // More failures than the retry budget allows.
        let flaky = FlakyLedger::failing(ledger.clone(), 10);
        let channel = InMemoryEventChannel::new();
        let sink = RecordingSink::default();
        let processor = PaymentProcessor::new(
            flaky,
            Arc::new(channel.clone()),
            Arc::new(sink.clone()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        // Ok: the offset gets committed, the partition is not blocked.
        processor.handle(envelope_for(&donation("DON-1", 1, 400))).await.unwrap();

        assert_eq!(sink.messages(), vec!["settlement failed after retries".to_string()]);
        assert!(channel.published(TOPIC_PAYMENT).is_empty());
        // Nothing was debited.
        let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered_not_retried() {
        let ledger = seeded_ledger(1, 1000).await;
        let channel = InMemoryEventChannel::new();
        let sink = RecordingSink::default();
        let processor = PaymentProcessor::new(
            ledger,
            Arc::new(channel.clone()),
            Arc::new(sink.clone()),
        )
        .with_retry_policy(RetryPolicy::immediate(2));

        processor.handle(raw_envelope(b"not json")).await.unwrap();

        assert_eq!(sink.messages(), vec!["malformed donation event".to_string()]);
        assert!(channel.published(TOPIC_PAYMENT).is_empty());
    }

    #[tokio::test]
    async fn dead_letter_sink_failure_blocks_the_commit() {
        let ledger = InMemoryLedgerStore::new();
        let flaky = FlakyLedger::failing(ledger, 10);
        let channel = InMemoryEventChannel::new();
        let processor = PaymentProcessor::new(
            flaky,
            Arc::new(channel.clone()),
            Arc::new(FailingSink),
        )
        .with_retry_policy(RetryPolicy::immediate(1));

        // Sink down + ledger down: the handler must NOT swallow the event.
        let result = processor.handle(envelope_for(&donation("DON-1", 1, 400))).await;
        assert!(result.is_err());
    }
}
