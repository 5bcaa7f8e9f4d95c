use anyhow::Result;
use dotenv::dotenv;
use indexer_rust::{Indexer, IndexerConfig};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting MarsCorp indexer...");

    let config = IndexerConfig::from_env()?;
    let indexer = Indexer::new(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(indexer.run(shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
    let _ = shutdown_tx.send(true);

    task.await??;
    Ok(())
}
