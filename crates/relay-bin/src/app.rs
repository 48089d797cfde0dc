//! Building the relay from configuration and running it to completion.

use outbox_database::{AsyncDatabase, DatabaseResult, OutboxStats};
use outbox_relay::{
    relay_command, BreakerSettings, BrokerProducer, BrokerSender, CircuitBreaker,
    CircuitBreakerSender, ConfirmFailurePolicy, MessagesRelay, RelayResult,
    RelaySettings, RetrySender, SqliteDeliveryConfirmer, SqliteMessagesReader,
};
use relay_config::Config;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Service name written to every log line.
pub const SERVICE_NAME: &str = "outbox-relay";

pub fn relay_settings(config: &Config) -> RelaySettings {
    RelaySettings {
        batch_limit: config.relay.batch_limit,
        poll_delay: config.relay.poll_delay(),
        confirm_failure: if config.relay.terminate_on_confirm_failure {
            ConfirmFailurePolicy::Terminate
        } else {
            ConfirmFailurePolicy::Continue
        },
    }
}

pub fn breaker_settings(config: &Config) -> BreakerSettings {
    BreakerSettings {
        name: "kafka".to_string(),
        max_consecutive_failures: config.breaker.max_consecutive_failures,
        open_timeout: config.breaker.open_timeout(),
        half_open_max_requests: config.breaker.half_open_max_requests,
        interval: config.breaker.interval(),
    }
}

/// Assemble `Retry(CircuitBreaker(Broker(producer)))` and the SQLite
/// reader and confirmer into a relay.
pub fn build_relay<P>(config: &Config, db: &AsyncDatabase, producer: P) -> RelayResult<MessagesRelay>
where
    P: BrokerProducer + 'static,
{
    let breaker = Arc::new(CircuitBreaker::new(breaker_settings(config)));

    let broker = BrokerSender::new(producer).with_max_wait(config.kafka.max_wait());
    let sender = RetrySender::new(CircuitBreakerSender::new(broker, breaker))
        .with_pause(config.relay.retry_pause());

    MessagesRelay::builder()
        .reader(SqliteMessagesReader::new(db.clone()))
        .sender(sender)
        .confirmer(SqliteDeliveryConfirmer::new(db.clone()))
        .settings(relay_settings(config))
        .build()
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
pub fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, winding down");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Run the relay until `cancel` fires or it fails, then close the database.
///
/// Returns the process exit code.
pub async fn run_relay<P>(
    config: &Config,
    db: AsyncDatabase,
    producer: P,
    cancel: &CancellationToken,
) -> i32
where
    P: BrokerProducer + 'static,
{
    let mut code = match build_relay(config, &db, producer) {
        Ok(relay) => {
            info!(
                database = %db.path(),
                kafka = %config.kafka.servers,
                "Starting outbox relay"
            );
            relay_command(&relay, cancel).await
        }
        Err(e) => {
            error!(error = %e, "Invalid relay configuration");
            outbox_relay::EXIT_FAILURE
        }
    };

    if let Err(e) = db.close().await {
        error!(error = %e, "Failed to close outbox database");
        code = outbox_relay::EXIT_FAILURE;
    }
    code
}

/// Snapshot printed by the `status` command.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    #[serde(flatten)]
    pub stats: OutboxStats,
}

pub async fn status_report(db: &AsyncDatabase) -> DatabaseResult<StatusReport> {
    db.health_check().await?;
    Ok(StatusReport {
        database: db.path().to_string(),
        stats: db.stats().await?,
    })
}
