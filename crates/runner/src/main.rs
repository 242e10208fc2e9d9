//! Price divergence monitor
//!
//! Headless entry point: polls the configured sources until interrupted

use std::time::Duration;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arb_runner::{load_settings, MonitorService};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting price divergence monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = load_settings()?;
    info!("Configuration: {}", settings.summary());

    let mut service = MonitorService::new(settings)?;
    service.start()?;

    // Setup shutdown channel
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
            }
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        let _ = shutdown_tx.send(());
    });

    info!("Press Ctrl+C to shutdown");

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    status_tick.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = status_tick.tick() => {
                let status = service.status();
                info!(
                    "Status: {} active, {} disabled, {} cycles, {} opportunities, {:?}",
                    status.feed.active_sources.len(),
                    status.feed.disabled_sources.len(),
                    status.cycles_processed,
                    status.total_detected,
                    status.assessment
                );
            }
        }
    }

    service.stop().await;

    match serde_json::to_string_pretty(&service.status()) {
        Ok(report) => info!("Final status:\n{}", report),
        Err(e) => error!("Failed to render final status: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
