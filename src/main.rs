//! canlogger daemon entry point

use anyhow::{Context, Result};
use canlogger::api::build_router;
use canlogger::config::cli::Cli;
use canlogger::runtime::{Runtime, RuntimeOptions};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli.log_level);

    println!("canlogger v{}", env!("CARGO_PKG_VERSION"));
    println!("multi-channel CAN bus data logger");
    println!();
    println!("storage root : {}", cli.storage_root.display());
    println!("bind address : {}", cli.bind_addr);

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| cli.storage_root.join("config.bin"));

    let runtime = Runtime::new(RuntimeOptions {
        storage_root: cli.storage_root.clone(),
        config_path,
        virtual_capacity_bytes: cli.virtual_capacity_bytes,
    })
    .context("failed to initialize runtime")?;

    runtime.start_logging();

    let tokio_runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = tokio_runtime.block_on(serve(runtime.clone(), &cli));

    runtime.stop_logging();
    result
}

async fn serve(runtime: std::sync::Arc<Runtime>, cli: &Cli) -> Result<()> {
    let router = build_router(runtime, cli.assets_dir.clone());
    let listener = tokio::net::TcpListener::bind(&cli.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind_addr))?;

    println!("listening on {}", cli.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
