use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod routes;
pub mod utils;

use config::Config;
use context::AppContext;
use queue::QueuePublisher;

/// Initialize the global tracing subscriber; later calls are no-ops
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Build the full HTTP + hub application around a connected queue backend
pub fn build_app(config: Config, publisher: Arc<dyn QueuePublisher>) -> Router {
    let app_context = Arc::new(AppContext::from_config(config, publisher));
    routes::create_router(app_context)
}

/// Serve `app` on `listener` until ctrl-c / SIGTERM
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")
}

pub async fn run() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.rust_log);

    tracing::info!("=== Anomaly Gateway Starting ===");
    tracing::info!("Port: {}", config.port);
    tracing::info!("Queue backend: {:?}", config.queue.backend);
    tracing::info!("Hub route: {}", config.hub.route());

    let publisher = queue::connect_publisher(&config.queue).await?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Failed to parse bind address")?;

    let app = build_app(config, publisher);

    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Anomaly Gateway listening on {}", addr);

    serve(listener, app).await?;

    tracing::info!("Anomaly Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
