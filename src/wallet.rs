//! Nonce authority for the destination-chain signing key.
//!
//! Exactly one [`Wallet`] exists per relay process. It owns the private key
//! used to sign mint transactions and serializes nonce allocation behind a
//! mutex so concurrent mint submissions never collide on the same nonce.

use ethers_core::types::Address;
use ethers_signers::{LocalWallet, Signer};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chain::dest_client::{DestClientError, DestinationClient};

#[derive(Debug)]
pub enum WalletError {
    InvalidKey(String),
    Chain(DestClientError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::InvalidKey(msg) => write!(f, "invalid private key: {msg}"),
            WalletError::Chain(e) => write!(f, "chain error while initializing wallet: {e}"),
        }
    }
}

impl std::error::Error for WalletError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalletError::Chain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DestClientError> for WalletError {
    fn from(e: DestClientError) -> Self {
        WalletError::Chain(e)
    }
}

/// Holds the signing key and the next nonce to use for the destination
/// chain. `next_nonce` is seeded from the chain's pending-state nonce at
/// startup and incremented locally thereafter — the relay never re-queries
/// the chain for a nonce mid-run, since a pending mint would not yet be
/// visible there.
pub struct Wallet {
    signer: LocalWallet,
    next_nonce: Mutex<u64>,
}

impl Wallet {
    pub async fn new<C: DestinationClient>(
        client: &C,
        private_key_hex: &str,
    ) -> Result<Self, WalletError> {
        let key_hex = private_key_hex.trim_start_matches("0x");
        let signer: LocalWallet = key_hex
            .parse()
            .map_err(|e: ethers_signers::WalletError| WalletError::InvalidKey(e.to_string()))?;

        let address = signer.address();
        let nonce = client.nonce_at(address).await?;
        info!(address = %hex_addr(address), nonce, "wallet initialized from pending-state nonce");

        Ok(Self {
            signer,
            next_nonce: Mutex::new(nonce),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &LocalWallet {
        &self.signer
    }

    /// Atomically reserves and returns the next nonce, advancing the
    /// counter for the following caller.
    pub async fn reserve_nonce(&self) -> u64 {
        let mut guard = self.next_nonce.lock().await;
        let nonce = *guard;
        *guard = nonce.saturating_add(1);
        debug!(nonce, "reserved nonce");
        nonce
    }
}

fn hex_addr(addr: Address) -> String {
    format!("{addr:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::dest_client::MockDestinationClient;

    #[tokio::test]
    async fn test_wallet_seeds_nonce_from_chain_pending_state() {
        let client = MockDestinationClient::new().with_nonce(42);
        let wallet = Wallet::new(
            &client,
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .await
        .unwrap();

        assert_eq!(wallet.reserve_nonce().await, 42);
        assert_eq!(wallet.reserve_nonce().await, 43);
    }

    #[tokio::test]
    async fn test_invalid_private_key_is_rejected() {
        let client = MockDestinationClient::new().with_nonce(0);
        let result = Wallet::new(&client, "not-a-key").await;
        assert!(matches!(result, Err(WalletError::InvalidKey(_))));
    }
}
