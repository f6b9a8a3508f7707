//! Domain error taxonomy for the donation pipeline.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors a donation can fail with anywhere in the pipeline.
///
/// The taxonomy separates three fates:
///
/// - **Client errors** (`InvalidRequest`, credential problems): returned
///   synchronously by the gateway, never retried by the system.
/// - **Settlement failures** (`AccountNotProvisioned`, `InsufficientBalance`):
///   terminal for that donation, surfaced as a failed payment event, never
///   retried.
/// - **Transient failures** (`UpstreamUnavailable`): retried with backoff at
///   the boundary that detected them; safe to repeat because idempotency and
///   settlement state are only persisted after success.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Client input failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No credential was presented, or it could not be read.
    #[error("Missing or malformed credential")]
    Unauthenticated,

    /// The presented credential has expired.
    #[error("Credential has expired")]
    TokenExpired,

    /// The presented credential is malformed or has a bad signature.
    #[error("Credential is invalid")]
    TokenInvalid,

    /// The donor has no ledger account; provisioning happens only on login.
    #[error("Account not provisioned for user {user_id}")]
    AccountNotProvisioned {
        /// The user whose account is missing.
        user_id: i64,
    },

    /// The donor's balance does not cover the donation.
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount the donation asked for.
        requested: Decimal,
        /// Balance at the time of the check.
        available: Decimal,
    },

    /// A dependency (event channel, ledger store) is temporarily unavailable.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl DomainError {
    /// Returns `true` if this error is the caller's fault (4xx class).
    ///
    /// # Examples
    ///
    /// ```
    /// # use fundflow_core::DomainError;
    /// assert!(DomainError::InvalidRequest("bad".into()).is_client_error());
    /// assert!(!DomainError::UpstreamUnavailable("kafka".into()).is_client_error());
    /// ```
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::Unauthenticated | Self::TokenExpired | Self::TokenInvalid
        )
    }

    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Settlement failures are deliberately non-retryable: a donation that
    /// failed on business grounds stays failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// The stable reason string recorded on failed payment events.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Unauthenticated => "Unauthenticated",
            Self::TokenExpired => "TokenExpired",
            Self::TokenInvalid => "TokenInvalid",
            Self::AccountNotProvisioned { .. } => "AccountNotProvisioned",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_failures_are_not_retryable() {
        let err = DomainError::InsufficientBalance {
            requested: Decimal::new(1500, 0),
            available: Decimal::new(1000, 0),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_client_error());
        assert_eq!(err.reason_code(), "InsufficientBalance");
    }

    #[test]
    fn credential_errors_are_client_errors() {
        assert!(DomainError::TokenExpired.is_client_error());
        assert!(DomainError::TokenInvalid.is_client_error());
        assert!(DomainError::Unauthenticated.is_client_error());
    }
}
