use std::sync::Arc;

use anyhow::{Context, bail};
use murmur_core::{
    Config, FsBlobStore, IdentityProvider, KeypairIdentity, RpcActivityOracle, Session,
    WatchOnlyIdentity,
};
use murmur_db::Database;
use murmur_types::{Address, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,murmur_core=debug".into()),
        )
        .init();

    let config = Config::from_env();

    let identity = load_identity(&config)?;
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = Arc::new(FsBlobStore::new(config.blob_dir.clone()).await?);

    let session = Session::open(config.clone(), db, identity, blobs).await?;
    tokio::spawn(log_events(session.subscribe()));

    let oracle = Arc::new(RpcActivityOracle::new(
        config.rpc_url.clone(),
        config.rpc_timeout,
    )?);
    session.start_reconciler(oracle).await?;

    info!("Murmur running as {}", session.local_address());
    info!(
        "Ledger RPC {} (timeout {:?}), reconciling every {:?}",
        config.rpc_url, config.rpc_timeout, config.reconcile_interval
    );

    shutdown_signal().await;
    session.close().await;

    Ok(())
}

/// A seed gives a full keypair; a bare address runs watch-only.
fn load_identity(config: &Config) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    if let Some(seed) = &config.identity_seed {
        let identity = KeypairIdentity::from_hex_seed(seed).context("MURMUR_IDENTITY_SEED")?;
        return Ok(Arc::new(identity));
    }

    if let Some(address) = &config.identity {
        let address = Address::parse(address).context("MURMUR_IDENTITY")?;
        warn!("No seed configured, running watch-only for {}", address);
        return Ok(Arc::new(WatchOnlyIdentity::new(address)));
    }

    bail!("Set MURMUR_IDENTITY_SEED or MURMUR_IDENTITY in your .env file and restart.");
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StatusChanged { id, status }) => {
                info!("Message {} is now {}", id, status.name());
            }
            Ok(SessionEvent::Closed) => break,
            Ok(other) => debug!("Session event: {:?}", other),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event log lagged, skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
