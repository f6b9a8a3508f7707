//! Settlement service binary: payment processor + account provisioner.

use anyhow::Context;
use fundflow_core::events::{TOPIC_DONATION, TOPIC_LOGIN, TOPIC_PARTITIONS, TOPIC_PAYMENT};
use fundflow_core::{EventChannel, TopicSpec};
use fundflow_kafka::KafkaEventChannel;
use fundflow_ledger::{DeadLetterQueue, PostgresLedgerStore};
use fundflow_settlement::{AccountProvisioner, PaymentProcessor, SettlementConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SettlementConfig::from_env();

    // Postgres may still be warming up when the container starts; retry
    // instead of crash-looping.
    let ledger = connect_ledger_with_retry(&config.database_url).await?;
    ledger.init_schema().await.context("schema bootstrap failed")?;

    let dead_letters = Arc::new(DeadLetterQueue::new(ledger.pool().clone()));

    let channel: Arc<dyn EventChannel> = Arc::new(
        KafkaEventChannel::builder()
            .brokers(&config.kafka_brokers)
            .source("payment-service")
            .build()
            .context("failed to create event channel")?,
    );

    ensure_topics_with_retry(channel.as_ref()).await?;

    let processor = Arc::new(PaymentProcessor::new(
        ledger.clone(),
        Arc::clone(&channel),
        dead_letters.clone() as Arc<dyn fundflow_settlement::DeadLetterSink>,
    ));
    let provisioner = Arc::new(AccountProvisioner::new(
        ledger.clone(),
        dead_letters as Arc<dyn fundflow_settlement::DeadLetterSink>,
    ));

    let donation_consumer = {
        let channel = Arc::clone(&channel);
        let group = config.donation_group.clone();
        tokio::spawn(async move {
            channel
                .consume(&[TOPIC_DONATION], &group, processor)
                .await
        })
    };
    let login_consumer = {
        let channel = Arc::clone(&channel);
        let group = config.login_group.clone();
        tokio::spawn(async move { channel.consume(&[TOPIC_LOGIN], &group, provisioner).await })
    };

    tracing::info!(
        donation_group = %config.donation_group,
        login_group = %config.login_group,
        "Settlement service running"
    );

    tokio::select! {
        result = donation_consumer => {
            match result {
                Ok(Ok(())) => tracing::info!("Donation consumer finished"),
                Ok(Err(e)) => tracing::error!(error = %e, "Donation consumer failed"),
                Err(e) => tracing::error!(error = %e, "Donation consumer task panicked"),
            }
        },
        result = login_consumer => {
            match result {
                Ok(Ok(())) => tracing::info!("Login consumer finished"),
                Ok(Err(e)) => tracing::error!(error = %e, "Login consumer failed"),
                Err(e) => tracing::error!(error = %e, "Login consumer task panicked"),
            }
        },
        () = shutdown_signal() => {
            tracing::info!("Shutting down consumers");
        },
    }

    // Uncommitted offsets at shutdown simply redeliver; handlers are
    // idempotent, so stopping here is safe.
    tracing::info!("Settlement service stopped");
    Ok(())
}

/// Connect to Postgres, retrying while the database warms up.
async fn connect_ledger_with_retry(database_url: &str) -> anyhow::Result<PostgresLedgerStore> {
    let mut attempt = 0_u32;
    loop {
        match PostgresLedgerStore::connect(database_url).await {
            Ok(ledger) => return Ok(ledger),
            Err(e) if attempt < 30 => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "Database connect failed, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            },
            Err(e) => return Err(e).context("database connect failed"),
        }
    }
}

/// Ensure all pipeline topics exist, retrying while the broker warms up.
async fn ensure_topics_with_retry(channel: &dyn EventChannel) -> anyhow::Result<()> {
    let specs = [
        TopicSpec::new(TOPIC_DONATION, TOPIC_PARTITIONS),
        TopicSpec::new(TOPIC_PAYMENT, TOPIC_PARTITIONS),
        TopicSpec::new(TOPIC_LOGIN, TOPIC_PARTITIONS),
    ];
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
}
