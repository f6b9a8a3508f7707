//! Gateway configuration.
//!
//! Values come from the environment; defaults match a local development
//! setup. Nothing here is hardcoded into handlers — the config is read once
//! in `main` and threaded through construction.

use chrono::Duration;

/// Donation intake gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Kafka bootstrap servers, comma-separated.
    pub kafka_brokers: String,
    /// Secret the auth service signs its HS256 tokens with.
    pub jwt_secret: String,
    /// Redis URL for the shared idempotency store; `None` selects the
    /// in-memory store (single-instance deployments only).
    pub redis_url: Option<String>,
    /// How long idempotency records live before a retry counts as new.
    pub idempotency_ttl: Duration,
}

impl GatewayConfig {
    /// Read configuration from the environment.
    ///
    /// Recognized variables: `PORT`, `KAFKA_BROKER`, `JWT_SECRET`,
    /// `REDIS_URL`. Unset variables fall back to local-development defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            kafka_brokers: std::env::var("KAFKA_BROKER").unwrap_or(defaults.kafka_brokers),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            redis_url: std::env::var("REDIS_URL").ok(),
            idempotency_ttl: defaults.idempotency_ttl,
        }
    }

    /// Set the idempotency record retention window.
    #[must_use]
    pub const fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 6000,
            kafka_brokers: "localhost:9092".to_string(),
            jwt_secret: "devsecret".to_string(),
            redis_url: None,
            idempotency_ttl: Duration::hours(24),
        }
    }
}
