use std::process::ExitCode;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use weather_ingest::{
    broker::ConsumerRuntime,
    config::PipelineConfig,
    storage::StorageGateway,
    telemetry,
};

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

    info!(
        broker = %config.broker,
        database = %config.database,
        queue = %config.broker.topology.main.queue,
        "Starting weather consumer"
    );

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing current message");
        cancel_on_signal.cancel();
    });

    let gateway = StorageGateway::new(config.database, config.retry);
    let mut runtime = ConsumerRuntime::new(config.broker, config.reconnect_delay, gateway);

    let result = runtime.run(cancel).await;
    runtime.into_store().close();

    match result {
        Ok(()) => {
            info!("Consumer shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Consumer stopped");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
