//! Shared application state for the gateway.

use crate::auth::JwtVerifier;
use crate::idempotency::IdempotencyStore;
use fundflow_core::EventChannel;
use std::sync::Arc;

/// Dependencies injected into every request handler.
///
/// Constructed once in `main` (or a test harness) and cloned per request;
/// all fields are cheap handles to shared resources with their own internal
/// synchronization.
#[derive(Clone)]
pub struct AppState {
    /// Durable event channel the gateway publishes donations to.
    pub channel: Arc<dyn EventChannel>,
    /// Idempotency record store.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Bearer-token verifier.
    pub verifier: JwtVerifier,
}

impl AppState {
    /// Assemble the gateway's dependencies.
    #[must_use]
    pub fn new(
        channel: Arc<dyn EventChannel>,
        idempotency: Arc<dyn IdempotencyStore>,
        verifier: JwtVerifier,
    ) -> Self {
        Self {
            channel,
            idempotency,
            verifier,
        }
    }
}
