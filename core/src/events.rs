//! Wire-level events published to the FundFlow topics.
//!
//! Every payload here is a cross-service JSON contract: field names are
//! camelCase on the wire, amounts travel as decimal strings, and events are
//! immutable once published. Messages are keyed by the domain id whose
//! relative order must be preserved (`donationId` for donations and payments,
//! `userId` for logins).

use crate::channel::EventRecord;
use crate::ids::{CampaignId, DonationId, UserId};
use crate::money::CURRENCY_USD;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Topic carrying [`DonationEvent`]s from the gateway to settlement.
pub const TOPIC_DONATION: &str = "donation";
/// Topic carrying [`PaymentEvent`]s from settlement to downstream consumers.
pub const TOPIC_PAYMENT: &str = "payment";
/// Topic carrying [`LoginEvent`]s from the auth service to the provisioner.
pub const TOPIC_LOGIN: &str = "login";

/// Fixed partition count for every FundFlow topic.
pub const TOPIC_PARTITIONS: i32 = 3;

/// `event-type` header value for newly requested donations.
pub const EVENT_DONATION_CREATED: &str = "donation.created";
/// `event-type` header value for successful settlements.
pub const EVENT_PAYMENT_SUCCESS: &str = "payment.success";
/// `event-type` header value for failed settlements.
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";
/// `event-type` header value for successful logins.
pub const EVENT_LOGIN_SUCCEEDED: &str = "login.succeeded";

/// Lifecycle status carried on a [`DonationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    /// Accepted by the gateway, not yet settled.
    Pending,
}

/// A donation accepted by the intake gateway, awaiting settlement.
///
/// Published to [`TOPIC_DONATION`] keyed by `donationId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationEvent {
    /// Server-generated, globally unique donation id.
    pub donation_id: DonationId,
    /// Client-supplied key identifying the logical donation attempt.
    pub idempotency_key: String,
    /// Campaign the donation targets.
    pub campaign_id: CampaignId,
    /// Donor's user id, from the authenticated caller.
    pub user_id: UserId,
    /// Donor's email, from the authenticated caller.
    pub user_email: String,
    /// Donation amount.
    pub amount: Decimal,
    /// ISO currency code; always `USD`.
    pub currency: String,
    /// When the gateway accepted the donation.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status; always `pending` when published.
    pub status: DonationStatus,
}

impl DonationEvent {
    /// Build the event for a donation the gateway just accepted.
    #[must_use]
    pub fn new(
        donation_id: DonationId,
        idempotency_key: String,
        campaign_id: CampaignId,
        user_id: UserId,
        user_email: String,
        amount: Decimal,
    ) -> Self {
        Self {
            donation_id,
            idempotency_key,
            campaign_id,
            user_id,
            user_email,
            amount,
            currency: CURRENCY_USD.to_string(),
            timestamp: Utc::now(),
            status: DonationStatus::Pending,
        }
    }

    /// Serialize into a channel record keyed by the donation id.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error; with these field types that
    /// only happens if the allocator fails.
    pub fn to_record(&self) -> Result<EventRecord, serde_json::Error> {
        Ok(EventRecord {
            key: self.donation_id.to_string(),
            event_type: EVENT_DONATION_CREATED.to_string(),
            payload: serde_json::to_vec(self)?,
        })
    }

    /// Deserialize from a topic payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the payload is not a valid
    /// `DonationEvent` document.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Outcome of settling one donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// The ledger was debited.
    Success,
    /// The donation could not be settled; see `reason`.
    Failed,
}

/// The settlement result for a donation.
///
/// Published to [`TOPIC_PAYMENT`] keyed by `donationId`. Immutable: a
/// redelivered donation re-emits the previously recorded outcome, byte for
/// byte apart from the publish itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    /// The donation this settlement belongs to.
    pub donation_id: DonationId,
    /// Donor's user id.
    pub user_id: UserId,
    /// Amount the settlement attempted to debit.
    pub amount: Decimal,
    /// Settlement outcome.
    pub status: PaymentStatus,
    /// Failure reason code; present only when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Balance after the debit; present only when `status` is `success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Decimal>,
    /// When the settlement was recorded.
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    /// Build a successful settlement event.
    #[must_use]
    pub fn success(donation_id: DonationId, user_id: UserId, amount: Decimal, new_balance: Decimal) -> Self {
        Self {
            donation_id,
            user_id,
            amount,
            status: PaymentStatus::Success,
            reason: None,
            new_balance: Some(new_balance),
            timestamp: Utc::now(),
        }
    }

    /// Build a failed settlement event with a stable reason code.
    #[must_use]
    pub fn failed(donation_id: DonationId, user_id: UserId, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            donation_id,
            user_id,
            amount,
            status: PaymentStatus::Failed,
            reason: Some(reason.into()),
            new_balance: None,
            timestamp: Utc::now(),
        }
    }

    /// The `event-type` header value for this outcome.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self.status {
            PaymentStatus::Success => EVENT_PAYMENT_SUCCESS,
            PaymentStatus::Failed => EVENT_PAYMENT_FAILED,
        }
    }

    /// Serialize into a channel record keyed by the donation id.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error.
    pub fn to_record(&self) -> Result<EventRecord, serde_json::Error> {
        Ok(EventRecord {
            key: self.donation_id.to_string(),
            event_type: self.event_type().to_string(),
            payload: serde_json::to_vec(self)?,
        })
    }

    /// Deserialize from a topic payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the payload is not a valid
    /// `PaymentEvent` document.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// A successful authentication, consumed by the account provisioner.
///
/// Owned by the auth service; FundFlow only reads it. Keyed by `userId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEvent {
    /// The user who logged in.
    pub user_id: UserId,
    /// Display name or email of the user.
    pub username: String,
}

impl LoginEvent {
    /// Deserialize from a topic payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the payload is not a valid
    /// `LoginEvent` document.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn donation_event_wire_format_is_camel_case() {
        let event = DonationEvent::new(
            DonationId::from("DON-1".to_string()),
            "key-1".to_string(),
            CampaignId(7),
            UserId(42),
            "donor@example.com".to_string(),
            Decimal::new(40_000, 2),
        );

        let json: serde_json::Value = serde_json::from_slice(&serde_json::to_vec(&event).unwrap()).unwrap();
        assert_eq!(json["donationId"], "DON-1");
        assert_eq!(json["idempotencyKey"], "key-1");
        assert_eq!(json["campaignId"], 7);
        assert_eq!(json["userId"], 42);
        assert_eq!(json["amount"], "400.00");
        assert_eq!(json["currency"], "USD");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn donation_record_is_keyed_by_donation_id() {
        let event = DonationEvent::new(
            DonationId::from("DON-key".to_string()),
            "k".to_string(),
            CampaignId(1),
            UserId(1),
            "d@example.com".to_string(),
            Decimal::ONE,
        );
        let record = event.to_record().unwrap();
        assert_eq!(record.key, "DON-key");
        assert_eq!(record.event_type, EVENT_DONATION_CREATED);

        let decoded = DonationEvent::from_payload(&record.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn failed_payment_carries_reason_and_no_balance() {
        let event = PaymentEvent::failed(
            DonationId::from("DON-2".to_string()),
            UserId(9),
            Decimal::new(1500, 0),
            "InsufficientBalance",
        );
        assert_eq!(event.event_type(), EVENT_PAYMENT_FAILED);

        let json: serde_json::Value = serde_json::from_slice(&serde_json::to_vec(&event).unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "InsufficientBalance");
        assert!(json.get("newBalance").is_none());
    }

    #[test]
    fn successful_payment_carries_new_balance() {
        let event = PaymentEvent::success(
            DonationId::from("DON-3".to_string()),
            UserId(9),
            Decimal::new(400, 0),
            Decimal::new(600, 0),
        );
        assert_eq!(event.event_type(), EVENT_PAYMENT_SUCCESS);
        assert_eq!(event.new_balance, Some(Decimal::new(600, 0)));
        assert!(event.reason.is_none());
    }

    #[test]
    fn login_event_parses_original_wire_shape() {
        let payload = br#"{"userId": 5, "username": "donor@example.com"}"#;
        let event = LoginEvent::from_payload(payload).unwrap();
        assert_eq!(event.user_id, UserId(5));
        assert_eq!(event.username, "donor@example.com");
    }
}
