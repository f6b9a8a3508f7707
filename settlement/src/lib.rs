//! Settlement service for FundFlow.
//!
//! Two consumers share this process, mirroring the two duties the ledger
//! serves:
//!
//! - [`processor::PaymentProcessor`] consumes `donation` events, debits the
//!   ledger exactly once per donation, and emits `payment` events.
//! - [`provisioner::AccountProvisioner`] consumes `login` events and
//!   idempotently creates ledger accounts with the default starting balance.
//!
//! Both handlers are idempotent by construction: the transport delivers
//! at-least-once, and redelivery must never debit twice or reset a balance.
//!
//! # Failure policy
//!
//! Transient ledger failures are retried with exponential backoff without
//! committing the consumer offset. A fixed retry budget escalates to the
//! dead-letter queue (log + persist + skip) so one poisoned event cannot
//! block its partition; every dead-lettered event stays observable for
//! operator replay.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod processor;
pub mod provisioner;
pub mod retry;
pub mod sink;

pub use config::SettlementConfig;
pub use processor::PaymentProcessor;
pub use provisioner::AccountProvisioner;
pub use retry::RetryPolicy;
pub use sink::DeadLetterSink;
