//! Donation intake gateway for FundFlow.
//!
//! HTTP-facing service that accepts donations, deduplicates client retries
//! by idempotency key, and publishes `DonationRequested` events to the
//! `donation` topic. The gateway never debits anything itself: acceptance
//! and settlement are connected only by the durable event channel.
//!
//! # Contract
//!
//! - `POST /donate` with `Authorization: Bearer <jwt>` and
//!   `Idempotency-Key: <string>` headers: `201` on first acceptance, `200`
//!   with `replayed: true` on a retry of an accepted key, `400`/`401` for
//!   client errors, `503` when the event channel is unavailable.
//! - `GET /health`: liveness probe.
//!
//! Exactly one `DonationEvent` is published per idempotency key that is ever
//! accepted as new — duplicate suppression is part of the contract, enforced
//! by an atomic reserve on the idempotency store, not best-effort.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod receipt;
pub mod state;

pub use config::GatewayConfig;
pub use error::AppError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Compose the gateway router with all routes and middleware.
///
/// # Example
///
/// ```rust,ignore
/// let app = gateway_router(state);
/// let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
/// axum::serve(listener, app).await?;
/// ```
pub fn gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/donate", post(handlers::donate))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
