//! Publishes synthetic weather readings to the main exchange

use std::process::ExitCode;
use std::time::Duration;

use lapin::{
    options::BasicPublishOptions, BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weather_ingest::{
    broker::{BrokerConfig, QueueBinding},
    config::PipelineConfig,
    reading::synthetic,
    telemetry,
};

const PERSISTENT: u8 = 2;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Shutdown signal received");
        cancel_on_signal.cancel();
    });

    match run(&config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Producer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &PipelineConfig, cancel: CancellationToken) -> Result<(), lapin::Error> {
    let Some(connection) = connect_with_backoff(&config.broker, &cancel).await else {
        return Ok(());
    };

    let channel = connection.create_channel().await?;
    let binding = &config.broker.topology.main;
    binding.declare(&channel).await?;

    if config.producer_once {
        let body = synthetic::sample_reading().to_string();
        publish(&channel, binding, body.as_bytes()).await?;
        info!(exchange = %binding.exchange, "Published sample reading");
    } else {
        info!(
            exchange = %binding.exchange,
            interval = ?config.producer_interval,
            "Publishing readings"
        );

        let mut ticker = tokio::time::interval(config.producer_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let body = synthetic::random_reading(&mut rand::thread_rng()).to_string();
            publish(&channel, binding, body.as_bytes()).await?;
            info!(message = %body, "Published reading");
        }
    }

    connection.close(200, "producer done").await?;
    info!("Connection closed");
    Ok(())
}

/// Connect, doubling the pause after each failure up to `MAX_BACKOFF`
///
/// Returns `None` only if cancelled before a connection was made.
async fn connect_with_backoff(config: &BrokerConfig, cancel: &CancellationToken) -> Option<Connection> {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1u32;

    loop {
        info!(broker = %config, attempt, "Connecting to broker");
        let properties = ConnectionProperties::default().with_connection_name("weather-producer".into());

        let attempt_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = Connection::connect_uri(config.amqp_uri(), properties) => result,
        };

        match attempt_result {
            Ok(connection) => return Some(connection),
            Err(e) => {
                warn!(error = %e, attempt, retry_in = ?backoff, "Broker connection failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }

        backoff = (backoff * 2).min(MAX_BACKOFF);
        attempt += 1;
    }
}

async fn publish(channel: &Channel, binding: &QueueBinding, body: &[u8]) -> Result<(), lapin::Error> {
    channel
        .basic_publish(
            &binding.exchange,
            &binding.routing_key,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_delivery_mode(PERSISTENT)
                .with_content_type("application/json".into()),
        )
        .await?
        .await?;
    Ok(())
}
