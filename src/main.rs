//! Graceful exit demo server.
//!
//! Serves a small axum app whose server and router are hooked into the
//! shutdown coordinator, plus one async cleanup task. Send SIGINT/SIGTERM
//! and watch the drain.

use std::path::PathBuf;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use graceful_exit::config::loader::load_config;
use graceful_exit::config::watcher::{apply_updates, ConfigWatcher};
use graceful_exit::config::ExitConfig;
use graceful_exit::observability::{logging, metrics};
use graceful_exit::{hook_http_server, CoordinatorSettings, HttpServer, ShutdownCoordinator};

#[derive(Parser)]
#[command(name = "graceful-exit")]
#[command(about = "Demo server for graceful exit coordination", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (watched for max timeout changes).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ExitConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!("graceful-exit v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let coordinator = ShutdownCoordinator::new(CoordinatorSettings::from(&config.shutdown));
    tracing::info!(
        timeout_ms = coordinator.get_timeout().as_millis() as u64,
        "Configuration loaded"
    );

    // Keep the watcher alive for the lifetime of the process.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(apply_updates(coordinator.clone(), updates));
            Some(watcher.run()?)
        }
        None => None,
    };

    let app = Router::new()
        .route("/", get(|| async { "Hello from graceful-exit" }))
        .route("/status", get(status))
        .with_state(coordinator.clone());

    let mut server = HttpServer::new(app);
    hook_http_server(&coordinator, &mut server, true)?;

    coordinator.add_async_exit_handler(
        Some("demo state flush"),
        Some(Duration::from_secs(10)),
        |source| async move {
            tracing::info!(source = %source, "Flushing demo state");
            tokio::time::sleep(Duration::from_millis(250)).await;
        },
    )?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    server.run(listener).await?;

    // The coordinator exits the process once every cleanup task is done.
    std::future::pending::<()>().await;
    Ok(())
}

async fn status(State(coordinator): State<ShutdownCoordinator>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "exiting": coordinator.is_exiting(),
        "timeout_ms": coordinator.get_timeout().as_millis() as u64,
    }))
}
