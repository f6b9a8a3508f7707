//! Donation intake gateway binary.

use anyhow::Context;
use fundflow_core::events::{TOPIC_DONATION, TOPIC_PARTITIONS};
use fundflow_core::{EventChannel, TopicSpec};
use fundflow_gateway::auth::JwtVerifier;
use fundflow_gateway::idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore,
};
use fundflow_gateway::{gateway_router, AppState, GatewayConfig};
use fundflow_kafka::KafkaEventChannel;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env();

    let channel: Arc<dyn EventChannel> = Arc::new(
        KafkaEventChannel::builder()
            .brokers(&config.kafka_brokers)
            .source("donation-gateway")
            .build()
            .context("failed to create event channel")?,
    );

    // Topic creation races with other services at startup and with a broker
    // that may still be warming up; retry rather than crash-loop.
    ensure_topics_with_retry(channel.as_ref()).await?;

    let idempotency: Arc<dyn IdempotencyStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!(redis_url = %url, "Using Redis idempotency store");
            Arc::new(
                RedisIdempotencyStore::connect(url, config.idempotency_ttl)
                    .await
                    .context("failed to connect to Redis")?,
            )
        },
        None => {
            tracing::info!("Using in-memory idempotency store (single instance only)");
            let store = InMemoryIdempotencyStore::new(config.idempotency_ttl);
            spawn_sweeper(store.clone());
            Arc::new(store)
        },
    };

    let state = AppState::new(channel, idempotency, JwtVerifier::new(&config.jwt_secret));
    let app = gateway_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Donation gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Donation gateway stopped");
    Ok(())
}

/// Ensure the donation topic exists, retrying while the broker warms up.
async fn ensure_topics_with_retry(channel: &dyn EventChannel) -> anyhow::Result<()> {
    let specs = [TopicSpec::new(TOPIC_DONATION, TOPIC_PARTITIONS)];
    let mut attempt = 0_u32;
    loop {
        match channel.ensure_topics(&specs).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < 30 => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "Topic bootstrap failed, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            },
            Err(e) => return Err(e).context("topic bootstrap failed"),
        }
    }
}

/// Periodically evict expired idempotency records.
fn spawn_sweeper(store: InMemoryIdempotencyStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            store.sweep();
            tracing::debug!("Idempotency store swept");
        }
    });
}

/// Resolve when the process receives ctrl-c / SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
