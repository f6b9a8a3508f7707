//! # FundFlow Core
//!
//! Domain model and event channel abstraction for the FundFlow donation
//! pipeline.
//!
//! This crate defines the types shared by every FundFlow service:
//!
//! - **Events**: the wire-level payloads published to the `donation`,
//!   `payment`, and `login` topics ([`events`])
//! - **Identifiers**: strongly-typed ids for donations, users, and campaigns
//!   ([`ids`])
//! - **Money**: decimal amount parsing and validation ([`money`])
//! - **Errors**: the domain error taxonomy ([`error`])
//! - **Event channel**: the [`channel::EventChannel`] trait implemented by
//!   `fundflow-kafka` (production) and `fundflow-testing` (in-memory)
//!
//! # Delivery Model
//!
//! The event channel provides **at-least-once delivery**: a consumer may see
//! the same event more than once, and every handler in the pipeline is
//! required to be idempotent. Exactly-once *effect* is achieved downstream
//! via idempotency keys (gateway) and per-donation settlement records
//! (payment processor), never by assuming a stronger transport guarantee.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod error;
pub mod events;
pub mod ids;
pub mod money;

pub use channel::{ChannelError, Envelope, EventChannel, EventHandler, EventRecord, Published, TopicSpec};
pub use error::DomainError;
pub use events::{DonationEvent, DonationStatus, LoginEvent, PaymentEvent, PaymentStatus};
pub use ids::{CampaignId, DonationId, UserId};
