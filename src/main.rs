mod api;
mod bootstrap;
mod chain;
mod config;
mod conversion;
mod error;
mod middleware;
mod orders;
mod pricing;
mod reconciliation;
mod rewards;
mod server;
#[cfg(test)]
mod test_utils;

use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,escrow_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown requested");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting escrow reconciliation backend");

    let config = config::Config::from_env()?;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let state = bootstrap::initialize_app_state(&config, &tracker, &cancel).await?;

    let app = server::create_app(state);
    let served = server::run_server(app, &config.bind_address, shutdown_signal(cancel.clone())).await;

    // Stop the poller and let in-flight releases finish
    cancel.cancel();
    tracker.close();
    info!("⏳ Waiting for {} background task(s)", tracker.len());
    tracker.wait().await;

    served?;
    info!("👋 Shutdown complete");
    Ok(())
}
