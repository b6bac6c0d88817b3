use rescue_coordinator::config::ServerConfig;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let (addr, _handle) = rescue_coordinator::spawn_server(ServerConfig::default(), shutdown_rx).await?;
    info!(%addr, "rescue coordinator running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(false);

    Ok(())
}
