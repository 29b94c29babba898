//! Clickrush delivery server entry point.

use std::sync::Arc;

use clickrush_common::Config;
use clickrush_queue::{BotApiClient, DeliveryQueue};
use clickrush_store::RedisStore;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clickrush=debug".into()),
        )
        .init();

    info!("Starting clickrush delivery server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to Redis
    info!("Connecting to Redis...");
    let store = Arc::new(RedisStore::connect(&config.redis.url).await?);
    info!("Connected to Redis");

    // Messaging API client
    let api = Arc::new(BotApiClient::new(&config.bot.api_url, &config.bot.token)?);

    // Delivery queue and worker pool
    let queue = DeliveryQueue::new(store, api, &config.redis.prefix, config.queue.clone());
    let dispatcher = queue.start();
    info!(
        workers = config.queue.workers,
        rate_per_sec = config.queue.dispatch_rate_per_sec,
        "Delivery queue started"
    );

    shutdown_signal().await;

    info!("Shutting down delivery queue...");
    dispatcher.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
