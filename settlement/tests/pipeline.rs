//! End-to-end pipeline test over the in-memory event channel.
//!
//! Drives the full consume loop the way the binary wires it: login events
//! provision accounts, donation events settle against the ledger, and
//! payment events come out the other side.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use fundflow_core::events::{TOPIC_DONATION, TOPIC_LOGIN, TOPIC_PAYMENT};
use fundflow_core::{
    CampaignId, DonationEvent, DonationId, Envelope, EventChannel, EventRecord, PaymentEvent,
    PaymentStatus, UserId,
};
use fundflow_ledger::{InMemoryLedgerStore, LedgerError, LedgerStore};
use fundflow_settlement::{AccountProvisioner, DeadLetterSink, PaymentProcessor, RetryPolicy};
use fundflow_testing::InMemoryEventChannel;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

fn login_record(user_id: i64, username: &str) -> EventRecord {
    EventRecord {
        key: user_id.to_string(),
        event_type: "login.succeeded".to_string(),
        payload: serde_json::to_vec(&serde_json::json!({
            "userId": user_id,
            "username": username,
        }))
        .unwrap(),
    }
}

fn donation_record(id: &str, user: i64, amount: i64) -> EventRecord {
    DonationEvent::new(
        DonationId::from(id.to_string()),
        format!("key-{id}"),
        CampaignId(1),
        UserId(user),
        "donor@example.com".to_string(),
        Decimal::new(amount, 0),
    )
    .to_record()
    .unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn login_then_donations_flow_through_to_payment_events() {
    let channel = InMemoryEventChannel::new();
    let ledger = InMemoryLedgerStore::new();
    let sink = RecordingSink::default();

    let processor = Arc::new(
        PaymentProcessor::new(
            ledger.clone(),
            Arc::new(channel.clone()),
            Arc::new(sink.clone()),
        )
        .with_retry_policy(RetryPolicy::immediate(2)),
    );
    let provisioner = Arc::new(
        AccountProvisioner::new(ledger.clone(), Arc::new(sink.clone()))
            .with_retry_policy(RetryPolicy::immediate(2)),
    );

    let donation_consumer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .consume(&[TOPIC_DONATION], "payment-service-group", processor)
                .await
        })
    };
    let login_consumer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .consume(&[TOPIC_LOGIN], "payment-service-group", provisioner)
                .await
        })
    };

    // A login provisions the account with $1000.
    channel
        .publish(TOPIC_LOGIN, &login_record(1, "donor@example.com"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while ledger.get_account(UserId(1)).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("account not provisioned in time");

    // Over-budget donation fails; in-budget donation settles.
    channel
        .publish(TOPIC_DONATION, &donation_record("DON-big", 1, 1500))
        .await
        .unwrap();
    channel
        .publish(TOPIC_DONATION, &donation_record("DON-ok", 1, 400))
        .await
        .unwrap();

    {
        let channel = channel.clone();
        wait_for(move || channel.published(TOPIC_PAYMENT).len() == 2).await;
    }

    let payments: Vec<PaymentEvent> = channel
        .published(TOPIC_PAYMENT)
        .iter()
        .map(|e| PaymentEvent::from_payload(&e.payload).unwrap())
        .collect();

    let failed = payments
        .iter()
        .find(|p| p.donation_id.as_str() == "DON-big")
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.reason.as_deref(), Some("InsufficientBalance"));

    let succeeded = payments
        .iter()
        .find(|p| p.donation_id.as_str() == "DON-ok")
        .unwrap();
    assert_eq!(succeeded.status, PaymentStatus::Success);
    assert_eq!(succeeded.new_balance, Some(Decimal::new(600, 0)));

    let account = ledger.get_account(UserId(1)).await.unwrap().unwrap();
    assert_eq!(account.balance, Decimal::new(600, 0));
    assert!(sink.entries.lock().unwrap().is_empty());

    donation_consumer.abort();
    login_consumer.abort();
}
