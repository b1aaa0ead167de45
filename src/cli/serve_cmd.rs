use std::path::Path;
use std::sync::Arc;

use ethers_core::types::Address;
use tracing::{error, info};

use super::CliError;
use crate::bridge::BridgeCore;
use crate::chain::dest_client::EthDestinationClient;
use crate::chain::source_reader::EthSourceReader;
use crate::confirmer::ConfirmerConfig;
use crate::config::{require_private_key, BridgeConfig};
use crate::rotator::Rotator;
use crate::store::SledStore;
use crate::wallet::Wallet;

/// How many one-second polls `close()` waits for the in-flight map to drain
/// before proceeding anyway.
const SHUTDOWN_RETRY_LIMIT: u32 = 30;

pub async fn run(home: &Path) -> Result<(), CliError> {
    let config = BridgeConfig::load(home)?;
    let private_key = require_private_key()?;

    let bank: Address = config
        .bank
        .parse()
        .map_err(|_| CliError::InvalidAddress(config.bank.clone()))?;

    let db = Arc::new(SledStore::open(&config.db_path)?);

    let source = Arc::new(
        EthSourceReader::new(&config.in_endpoint, bank)
            .map_err(|e| CliError::Io(e.to_string()))?,
    );
    let dest = Arc::new(
        EthDestinationClient::new(&config.out_endpoint)
            .await
            .map_err(|e| CliError::Io(e.to_string()))?,
    );
    let wallet = Arc::new(
        Wallet::new(dest.as_ref(), &private_key)
            .await
            .map_err(|e| CliError::Io(e.to_string()))?,
    );

    info!(
        in_endpoint = %config.in_endpoint,
        out_endpoint = %config.out_endpoint,
        bank = %config.bank,
        wallet = %wallet.address(),
        "starting bridge relay"
    );

    let core = BridgeCore::new(db, source, dest, wallet);
    core.start(ConfirmerConfig {
        workers: config.confirmer.workers,
        poll_interval_ms: config.confirmer.interval_ms,
        confirmation_blocks: config.confirmer.confirmation_blocks,
        queue_capacity: 1024,
    })
    .await;

    let mut rotator = Rotator::new(2);
    let tick = std::time::Duration::from_millis(config.log_fetch_interval_ms / 2);

    // Seed from the persisted checkpoint, not zero: a shutdown that lands
    // before any scan cycle completes must re-commit the existing
    // checkpoint, never regress it (checkpoints are monotonically
    // non-decreasing across restarts).
    let mut last_erc20 = core.checkpoint_erc20().map_err(|e| CliError::Io(e.to_string()))?;
    let mut last_nft = core.checkpoint_nft().map_err(|e| CliError::Io(e.to_string()))?;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {
                match rotator.rotate() {
                    1 => match core.fetch_erc20().await {
                        // `fetch_erc20` never returns below its own checkpoint, but
                        // the checkpoint is only committed on close, so clamp here too
                        // against ever regressing what we're about to commit.
                        Ok(end) => last_erc20 = end.max(last_erc20),
                        Err(e) => error!(error = %e, "erc20 scan cycle failed"),
                    },
                    _ => match core.fetch_nft().await {
                        Ok(end) => last_nft = end.max(last_nft),
                        Err(e) => error!(error = %e, "nft scan cycle failed"),
                    },
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, draining in-flight transactions");
                break;
            }
        }
    }

    core.close(SHUTDOWN_RETRY_LIMIT, true, last_erc20, last_nft).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
