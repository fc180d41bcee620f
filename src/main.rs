//! urlwatch - HTTP uptime monitoring service.

use urlwatch::config::ServerConfig;
use urlwatch::db::{Store, Target, TargetStore};
use urlwatch::probe::ProbeClient;
use urlwatch::scheduler::{MonitorRegistry, UptimeTicker};
use urlwatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("urlwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting urlwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Add sample target if none exist
    if store.get_targets()?.is_empty() {
        tracing::info!("Adding sample target: Example");
        store.add_target(&Target {
            order: 1,
            ..Target::new("Example", "https://example.com")
        })?;
    }

    // Create registry and start every enabled target
    let registry = Arc::new(MonitorRegistry::with_store(ProbeClient::new(), store.clone()));
    registry.reload().await?;

    let ticker = UptimeTicker::new(registry.clone(), cfg.tick_interval);
    ticker.start().await;

    // Start web server
    let server = Server::new(cfg, registry.clone(), ticker.summary());
    server.start(shutdown_signal()).await?;

    ticker.stop().await;
    registry.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
