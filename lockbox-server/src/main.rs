//! lockbox-server binary entry point.
//!
//! Usage:
//! ```bash
//! lockbox-server --config lockbox.toml
//! lockbox-server --help
//! ```

use anyhow::Context;
use clap::Parser;
use lockbox_server::cleanup::spawn_cleanup_task;
use lockbox_server::config::{Config, LogFormat};
use lockbox_server::{http, Gateway, Listener, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "lockbox.toml";

/// Store and authentication gateway for Lockbox.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file [default: lockbox.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(config.logging.format);
    http::init_start_time();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting lockbox-server");

    let storage = SqliteStorage::new(&config.storage.database)
        .await
        .with_context(|| format!("opening database {}", config.storage.database.display()))?;
    let gateway = Arc::new(Gateway::new(config.clone(), Arc::new(storage))?);

    let cleanup = spawn_cleanup_task(gateway.clone());

    let http_listener = tokio::net::TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("binding HTTP endpoint {}", config.http.bind_address))?;
    tracing::info!(addr = %config.http.bind_address, "HTTP endpoints listening");
    let router = http::build_router(gateway.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    let listener = Listener::bind(gateway)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    listener.run_until(shutdown_signal()).await?;

    cleanup.abort();
    tracing::info!("lockbox-server stopped");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(Config::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(Config::default()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
