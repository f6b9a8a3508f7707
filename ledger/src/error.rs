//! Error types for ledger operations.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors the ledger store can fail with.
///
/// Business outcomes (insufficient balance, missing account) are NOT errors
/// here: they are recorded settlement results returned by
/// [`crate::LedgerStore::settle`]. This enum covers infrastructure failures
/// only, which callers may retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Database operation failed; transient, safe to retry.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),
}

impl LedgerError {
    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}
