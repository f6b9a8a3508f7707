//! The receipt returned to donors.
//!
//! A receipt is built once, when a donation is first accepted, and cached
//! against its idempotency key. Replays return the cached receipt unchanged
//! apart from the `replayed` flag — bit-identical donation data, so clients
//! can retry blindly.

use chrono::{DateTime, Utc};
use fundflow_core::{CampaignId, DonationEvent, DonationId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Donation data echoed back to the donor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationSummary {
    /// Server-generated donation id.
    pub donation_id: DonationId,
    /// Campaign the donation targets.
    pub campaign_id: CampaignId,
    /// Accepted amount.
    pub amount: Decimal,
    /// ISO currency code.
    pub currency: String,
    /// When the gateway accepted the donation.
    pub timestamp: DateTime<Utc>,
}

/// Response body for an accepted donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Always `true`; failures never produce a receipt.
    pub success: bool,
    /// Human-readable confirmation.
    pub message: String,
    /// The accepted donation.
    pub donation: DonationSummary,
    /// Present and `true` only on an idempotent replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
}

impl Receipt {
    /// Build the first-acceptance receipt for a just-published donation.
    #[must_use]
    pub fn for_event(event: &DonationEvent) -> Self {
        Self {
            success: true,
            message: "Donation received successfully".to_string(),
            donation: DonationSummary {
                donation_id: event.donation_id.clone(),
                campaign_id: event.campaign_id,
                amount: event.amount,
                currency: event.currency.clone(),
                timestamp: event.timestamp,
            },
            replayed: None,
        }
    }

    /// The replayed rendition of this receipt: identical donation data,
    /// flagged and re-worded for the retrying client.
    #[must_use]
    pub fn replayed(&self) -> Self {
        Self {
            success: self.success,
            message: "Donation already processed (duplicate request prevented)".to_string(),
            donation: self.donation.clone(),
            replayed: Some(true),
        }
    }
}
