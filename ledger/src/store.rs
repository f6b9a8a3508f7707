//! The `LedgerStore` trait and its domain types.

use crate::error::Result;
use chrono::{DateTime, Utc};
use fundflow_core::{DonationId, PaymentStatus, UserId};
use rust_decimal::Decimal;

/// Balance every newly provisioned account starts with.
pub const DEFAULT_STARTING_BALANCE: Decimal = Decimal::from_parts(100_000, 0, 0, false, 2);

/// One ledger row: a user's balance and its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAccount {
    /// Owning user.
    pub user_id: UserId,
    /// Display name recorded at provisioning time.
    pub username: String,
    /// Current balance; never negative.
    pub balance: Decimal,
    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,
    /// When the balance last changed.
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A new account row was inserted with the default starting balance.
    Created,
    /// The account already existed; nothing was touched.
    AlreadyExists,
}

/// What the payment processor asks the ledger to do for one donation.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRequest {
    /// The donation being settled.
    pub donation_id: DonationId,
    /// The donor to debit.
    pub user_id: UserId,
    /// The amount to debit.
    pub amount: Decimal,
}

/// The durably recorded outcome of settling one donation.
///
/// Written in the same transaction as the debit. Immutable once written:
/// a redelivered donation gets this row back instead of a second debit.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// The donation this outcome belongs to.
    pub donation_id: DonationId,
    /// The donor.
    pub user_id: UserId,
    /// The amount the settlement attempted to debit.
    pub amount: Decimal,
    /// Success or failure.
    pub status: PaymentStatus,
    /// Failure reason code, when `status` is `Failed`.
    pub reason: Option<String>,
    /// Balance after the debit, when `status` is `Success`.
    pub new_balance: Option<Decimal>,
    /// When the outcome was recorded.
    pub settled_at: DateTime<Utc>,
}

/// Whether a settlement call did work or found prior work.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// This call recorded the outcome (and applied the debit on success).
    Applied(Settlement),
    /// The donation was already settled; the recorded outcome is returned
    /// unchanged and the balance was not touched.
    Replayed(Settlement),
}

impl SettleOutcome {
    /// The recorded settlement, regardless of which call recorded it.
    #[must_use]
    pub const fn settlement(&self) -> &Settlement {
        match self {
            Self::Applied(s) | Self::Replayed(s) => s,
        }
    }

    /// Returns `true` if this call found a previously recorded outcome.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Exclusive owner of all `LedgerAccount` mutation.
///
/// Implementations must make [`settle`](Self::settle) strictly serializable
/// per user — two concurrent donations from the same user must observe each
/// other's effect — and must make [`provision_account`](Self::provision_account)
/// a no-op after the first success for a given user, even across concurrent
/// instances. Both guarantees live in the shared store, never in handler
/// state.
pub trait LedgerStore: Send + Sync {
    /// Idempotently create an account with the default starting balance.
    ///
    /// Replays (login redelivery) return [`ProvisionOutcome::AlreadyExists`]
    /// and never reset an existing balance.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LedgerError::Database`] on infrastructure failure;
    /// safe to retry.
    fn provision_account(
        &self,
        user_id: UserId,
        username: &str,
    ) -> impl Future<Output = Result<ProvisionOutcome>> + Send;

    /// Settle one donation: debit the balance and record the outcome in a
    /// single transaction, or return the previously recorded outcome.
    ///
    /// Business failures (missing account, insufficient balance) are
    /// recorded as failed settlements and returned in
    /// [`SettleOutcome::Applied`]; only infrastructure failures surface as
    /// `Err`, and those leave no settlement behind, so a retry is safe.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LedgerError::Database`] on infrastructure failure.
    fn settle(
        &self,
        request: &SettlementRequest,
    ) -> impl Future<Output = Result<SettleOutcome>> + Send;

    /// Fetch an account row, if the user has one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LedgerError::Database`] on infrastructure failure.
    fn get_account(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<LedgerAccount>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_starting_balance_is_one_thousand() {
        assert_eq!(DEFAULT_STARTING_BALANCE, Decimal::new(100_000, 2));
        assert_eq!(DEFAULT_STARTING_BALANCE.to_string(), "1000.00");
    }

    #[test]
    fn settle_outcome_exposes_the_settlement_either_way() {
        let settlement = Settlement {
            donation_id: DonationId::from("DON-1".to_string()),
            user_id: UserId(1),
            amount: Decimal::new(400, 0),
            status: PaymentStatus::Success,
            reason: None,
            new_balance: Some(Decimal::new(600, 0)),
            settled_at: Utc::now(),
        };
        let applied = SettleOutcome::Applied(settlement.clone());
        let replayed = SettleOutcome::Replayed(settlement.clone());
        assert!(!applied.is_replay());
        assert!(replayed.is_replay());
        assert_eq!(applied.settlement(), replayed.settlement());
    }
}
