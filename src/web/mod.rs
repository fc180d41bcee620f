//! Web server module.
//!
//! JSON API consumed by the presentation layer.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::scheduler::{MonitorRegistry, Summary};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<MonitorRegistry>,
    pub summary: watch::Receiver<Summary>,
}

/// Web server for urlwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        registry: Arc<MonitorRegistry>,
        summary: watch::Receiver<Summary>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                registry,
                summary,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route(
                "/api/monitors",
                get(handlers::handle_list_monitors)
                    .post(handlers::handle_create_monitor)
                    .put(handlers::handle_update_monitor)
                    .delete(handlers::handle_delete_monitor),
            )
            .route("/api/monitors/start", post(handlers::handle_start_monitor))
            .route("/api/monitors/stop", post(handlers::handle_stop_monitor))
            .route("/api/monitors/ping", post(handlers::handle_ping_monitor))
            .route("/api/reload", post(handlers::handle_reload))
            .route("/api/summary", get(handlers::handle_summary))
            .route("/api/facets", get(handlers::handle_facets))
            .route("/api/downtimes", get(handlers::handle_downtimes))
            .route("/api/downtimes.csv", get(handlers::handle_downtimes_csv))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port, until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
