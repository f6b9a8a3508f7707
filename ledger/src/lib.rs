//! PostgreSQL ledger store for FundFlow.
//!
//! The ledger is the single owner of user balances: every balance change in
//! the system goes through [`LedgerStore::settle`] or
//! [`LedgerStore::provision_account`], and all cross-handler invariants are
//! enforced here — by the database, not by in-process state — so any number
//! of service instances can run against the same store.
//!
//! Three tables:
//!
//! - `ledger_accounts` — one row per user, `balance >= 0` at all times
//! - `settlements` — one row per donation id, written in the same
//!   transaction as the debit; this marker is what makes settlement
//!   exactly-once under at-least-once delivery
//! - `failed_events` — dead-letter queue for events that exhausted retries
//!
//! An in-memory implementation with the same serialization guarantees ships
//! behind the `test-utils` feature for service-level tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter;
mod error;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod postgres;
mod store;

pub use dead_letter::{DeadLetterQueue, DlqStatus, FailedEvent};
pub use error::LedgerError;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{
    DEFAULT_STARTING_BALANCE, LedgerAccount, LedgerStore, ProvisionOutcome, Settlement,
    SettlementRequest, SettleOutcome,
};
