//! Strongly-typed identifiers for the donation pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server-generated, globally unique donation identifier.
///
/// Donation ids double as the partition key for the `donation` and `payment`
/// topics, so all events for one donation stay ordered relative to each other.
///
/// # Example
///
/// ```
/// use fundflow_core::DonationId;
///
/// let id = DonationId::generate();
/// assert!(id.as_str().starts_with("DON-"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonationId(String);

impl DonationId {
    /// Generate a new globally unique donation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("DON-{}", Uuid::new_v4()))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DonationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DonationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an authenticated user, as issued by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the campaign a donation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub i64);

impl CampaignId {
    /// Returns `true` if this is a valid (positive) campaign id.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn donation_ids_are_unique() {
        let a = DonationId::generate();
        let b = DonationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn donation_id_serializes_as_plain_string() {
        let id = DonationId::from("DON-test".to_string());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"DON-test\"");
    }

    #[test]
    fn campaign_id_validity() {
        assert!(CampaignId(1).is_valid());
        assert!(!CampaignId(0).is_valid());
        assert!(!CampaignId(-7).is_valid());
    }
}
