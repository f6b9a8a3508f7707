//! The account provisioner: login events in, ledger accounts out.
//!
//! Provisioning is the only way accounts come into existence — the payment
//! processor never creates one implicitly. Redelivered logins are no-ops
//! after the first successful creation; a replay must never reset a balance.

use crate::retry::RetryPolicy;
use crate::sink::DeadLetterSink;
use fundflow_core::{ChannelError, Envelope, EventHandler, LoginEvent};
use fundflow_ledger::{LedgerError, LedgerStore, ProvisionOutcome};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Consumes `login` events and idempotently provisions ledger accounts.
pub struct AccountProvisioner<L> {
    ledger: L,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl<L: LedgerStore> AccountProvisioner<L> {
    /// Assemble a provisioner from its dependencies.
    #[must_use]
    pub fn new(ledger: L, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            ledger,
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

    async fn provision_with_retry(
        &self,
        event: &LoginEvent,
    ) -> Result<ProvisionOutcome, (LedgerError, usize)> {
        let mut attempt = 0;
        loop {
            match self
                .ledger
                .provision_account(event.user_id, &event.username)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        user_id = %event.user_id,
                        attempt = attempt + 1,
                        error = %err,
                        "Transient ledger failure, retrying provisioning"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err((err, attempt + 1)),
            }
        }
    }
}

impl<L: LedgerStore> EventHandler for AccountProvisioner<L> {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        Box::pin(async move {
            let event = match LoginEvent::from_payload(&envelope.payload) {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(
                        topic = %envelope.topic,
                        offset = envelope.offset,
                        error = %err,
                        "Malformed login event"
                    );
                    self.dead_letters
                        .record_failure(&envelope, "malformed login event", Some(&err.to_string()), 0)
                        .await
                        .map_err(|e| ChannelError::HandlerFailed(format!("dead-letter sink failed: {e}")))?;
                    metrics::counter!("settlement.dead_lettered").increment(1);
                    return Ok(());
                },
            };

            match self.provision_with_retry(&event).await {
                Ok(ProvisionOutcome::Created) => {
                    tracing::info!(
                        user_id = %event.user_id,
                        username = %event.username,
                        "Account provisioned from login event"
                    );
                },
                Ok(ProvisionOutcome::AlreadyExists) => {
                    // Redelivery or repeat login; the balance stays as it is.
                    tracing::debug!(user_id = %event.user_id, "Account already provisioned");
                },
                Err((err, attempts)) => {
                    tracing::error!(
                        user_id = %event.user_id,
                        attempts,
                        error = %err,
                        "Provisioning failed after retries, dead-lettering"
                    );
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    self.dead_letters
                        .record_failure(
                            &envelope,
                            "provisioning failed after retries",
                            Some(&err.to_string()),
                            attempts as i32,
                        )
                        .await
                        .map_err(|e| ChannelError::HandlerFailed(format!("dead-letter sink failed: {e}")))?;
                    metrics::counter!("settlement.dead_lettered").increment(1);
                },
            }

            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use fundflow_core::UserId;
    use fundflow_ledger::{InMemoryLedgerStore, DEFAULT_STARTING_BALANCE};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        entries: Arc<Mutex<Vec<String>>>,
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

    fn login_envelope(user_id: i64, username: &str) -> Envelope {
        let payload = serde_json::json!({ "userId": user_id, "username": username });
        Envelope {
            topic: "login".to_string(),
            partition: 0,
            offset: 0,
            key: Some(user_id.to_string()),
            event_type: Some("login.succeeded".to_string()),
            source: Some("user-service".to_string()),
            payload: serde_json::to_vec(&payload).unwrap(),
        }
    }

    #[tokio::test]
    async fn provisions_an_account_with_the_default_balance() {
        let ledger = InMemoryLedgerStore::new();
        let provisioner = AccountProvisioner::new(ledger.clone(), Arc::new(RecordingSink::default()))
            .with_retry_policy(RetryPolicy::immediate(2));

        provisioner.handle(login_envelope(5, "donor@example.com")).await.unwrap();

        let account = ledger.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.balance, DEFAULT_STARTING_BALANCE);
        assert_eq!(account.username, "donor@example.com");
    }

    #[tokio::test]
    async fn redelivered_login_never_resets_the_balance() {
        let ledger = InMemoryLedgerStore::new();
        let provisioner = AccountProvisioner::new(ledger.clone(), Arc::new(RecordingSink::default()))
            .with_retry_policy(RetryPolicy::immediate(2));

        provisioner.handle(login_envelope(5, "donor@example.com")).await.unwrap();

        // Spend some of the default balance, then replay the login.
        ledger
            .settle(&fundflow_ledger::SettlementRequest {
                donation_id: fundflow_core::DonationId::from("DON-1".to_string()),
                user_id: UserId(5),
                amount: Decimal::new(400, 0),
            })
            .await
            .unwrap();

        provisioner.handle(login_envelope(5, "donor@example.com")).await.unwrap();

        let account = ledger.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(600, 0));
    }

    #[tokio::test]
    async fn malformed_login_event_is_dead_lettered() {
        let ledger = InMemoryLedgerStore::new();
        let sink = RecordingSink::default();
        let provisioner = AccountProvisioner::new(ledger, Arc::new(sink.clone()))
            .with_retry_policy(RetryPolicy::immediate(2));

        let envelope = Envelope {
            topic: "login".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            event_type: None,
            source: None,
            payload: b"garbage".to_vec(),
        };
        provisioner.handle(envelope).await.unwrap();

        assert_eq!(
            sink.entries.lock().unwrap().clone(),
            vec!["malformed login event".to_string()]
        );
    }
}
