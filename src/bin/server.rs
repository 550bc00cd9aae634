use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;

use snowgate::config::AppConfig;
use snowgate::driver::mock::MockDriver;
use snowgate::driver::WarehouseDriver;
use snowgate::http::AppServer;
use snowgate::SnowflakeBackend;

#[derive(Parser)]
#[command(name = "snowgate-server", about = "Snowgate query backend server")]
struct Cli {
    /// Path to config file
    config: Option<String>,

    /// Serve against the built-in mock warehouse driver instead of a real one
    #[arg(long)]
    mock_driver: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    snowgate::telemetry::init_telemetry();

    let cli = Cli::parse();

    tracing::info!("Starting Snowgate server");

    let config = match &cli.config {
        Some(path) => {
            let config = AppConfig::load(path)?;
            tracing::info!("Configuration '{}' loaded successfully", path);
            config
        }
        None => AppConfig {
            server: Default::default(),
        },
    };

    // The warehouse driver is a linkage point: the mock driver serves local
    // development and tests; a real driver is wired in by the embedding
    // distribution.
    let driver: Arc<dyn WarehouseDriver> = Arc::new(MockDriver::new());
    if !cli.mock_driver {
        tracing::warn!("no warehouse driver linked in this build, using the mock driver");
    }

    let app = AppServer::new(SnowflakeBackend::new(driver));
    let backend = app.backend.clone();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started in {}ms", now.elapsed().as_millis());
    tracing::info!("Server listening on {}", addr);

    let server = axum::serve(listener, app.router).with_graceful_shutdown(shutdown());
    server.await?;

    backend.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
