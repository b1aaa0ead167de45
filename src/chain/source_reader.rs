//! Source-chain log reader: watches the Bank contract for deposit events.

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::abi::{decode, ParamType, Token};
use ethers_core::types::{Address, BlockNumber, Filter, H256, U256, U64};
use ethers_providers::{Http, Middleware, Provider};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Source RPC providers typically cap a single `eth_getLogs` range; the
/// reader pages internally in windows this wide so callers never see it.
const LOG_WINDOW_BLOCKS: u64 = 2_000;

#[derive(Debug)]
pub enum SourceReaderError {
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for SourceReaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceReaderError::Transport(msg) => write!(f, "source chain transport error: {msg}"),
            SourceReaderError::Decode(msg) => write!(f, "source chain log decode error: {msg}"),
        }
    }
}

impl std::error::Error for SourceReaderError {}

#[derive(Debug, Clone)]
pub struct Erc20DepositLog {
    pub id: u64,
    pub token: Address,
    pub sender: Address,
    pub amount: U256,
    pub block: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone)]
pub struct NftDepositLog {
    pub id: u64,
    pub token: Address,
    pub sender: Address,
    pub token_id: U256,
    pub block: u64,
    pub log_index: u64,
}

/// Watches the source chain's Bank contract for deposit events.
///
/// `filter_*_deposited` streams decoded logs onto `sink` in ascending
/// `(block, log_index)` order and returns once the range is exhausted. A
/// closed `sink` (the drain side has moved on) ends the scan quietly rather
/// than as an error.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn latest_block(&self) -> Result<u64, SourceReaderError>;

    async fn filter_erc20_deposited(
        &self,
        start_block: u64,
        end_block: u64,
        sink: mpsc::Sender<Erc20DepositLog>,
    ) -> Result<(), SourceReaderError>;

    async fn filter_nft_deposited(
        &self,
        start_block: u64,
        end_block: u64,
        sink: mpsc::Sender<NftDepositLog>,
    ) -> Result<(), SourceReaderError>;
}

fn event_topic(signature: &str) -> H256 {
    H256::from(ethers_core::utils::keccak256(signature.as_bytes()))
}

/// `ethers-providers`-backed reader against the Bank contract's
/// `ERC20Deposited(uint256,address,address,uint256)` and
/// `NFTDeposited(uint256,address,address,uint256)` events. Neither event
/// declares indexed fields, so every argument is ABI-decoded out of the log
/// data rather than out of topics.
pub struct EthSourceReader {
    provider: Arc<Provider<Http>>,
    bank: Address,
    erc20_topic: H256,
    nft_topic: H256,
}

impl EthSourceReader {
    pub fn new(endpoint: &str, bank: Address) -> Result<Self, SourceReaderError> {
        let http = super::http_transport(endpoint).map_err(SourceReaderError::Transport)?;
        let provider = Provider::new(http);
        Ok(Self {
            provider: Arc::new(provider),
            bank,
            erc20_topic: event_topic("ERC20Deposited(uint256,address,address,uint256)"),
            nft_topic: event_topic("NFTDeposited(uint256,address,address,uint256)"),
        })
    }

    async fn paged_logs(
        &self,
        topic: H256,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<ethers_core::types::Log>, SourceReaderError> {
        let mut all = Vec::new();
        let mut from = start_block;
        while from <= end_block {
            let to = (from + LOG_WINDOW_BLOCKS - 1).min(end_block);
            let filter = Filter::new()
                .address(self.bank)
                .topic0(topic)
                .from_block(BlockNumber::Number(U64::from(from)))
                .to_block(BlockNumber::Number(U64::from(to)));

            let logs = self
                .provider
                .get_logs(&filter)
                .await
                .map_err(|e| SourceReaderError::Transport(e.to_string()))?;
            debug!(from, to, count = logs.len(), "fetched log window");
            all.extend(logs);
            from = to + 1;
        }
        all.sort_by_key(|l| {
            (
                l.block_number.map(|b| b.as_u64()).unwrap_or(0),
                l.log_index.map(|i| i.as_u64()).unwrap_or(0),
            )
        });
        Ok(all)
    }
}

#[async_trait]
impl SourceReader for EthSourceReader {
    async fn latest_block(&self) -> Result<u64, SourceReaderError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| SourceReaderError::Transport(e.to_string()))
    }

    async fn filter_erc20_deposited(
        &self,
        start_block: u64,
        end_block: u64,
        sink: mpsc::Sender<Erc20DepositLog>,
    ) -> Result<(), SourceReaderError> {
        if start_block > end_block {
            return Ok(());
        }
        let logs = self.paged_logs(self.erc20_topic, start_block, end_block).await?;
        for log in logs {
            let tokens = decode(
                &[
                    ParamType::Uint(256),
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                ],
                &log.data.0,
            )
            .map_err(|e| SourceReaderError::Decode(e.to_string()))?;
            let deposit = Erc20DepositLog {
                id: as_uint(&tokens[0])?.as_u64(),
                token: as_address(&tokens[1])?,
                sender: as_address(&tokens[2])?,
                amount: as_uint(&tokens[3])?,
                block: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
                log_index: log.log_index.map(|i| i.as_u64()).unwrap_or(0),
            };
            if sink.send(deposit).await.is_err() {
                warn!("erc20 deposit sink closed early, stopping scan");
                return Ok(());
            }
        }
        Ok(())
    }

    async fn filter_nft_deposited(
        &self,
        start_block: u64,
        end_block: u64,
        sink: mpsc::Sender<NftDepositLog>,
    ) -> Result<(), SourceReaderError> {
        if start_block > end_block {
            return Ok(());
        }
        let logs = self.paged_logs(self.nft_topic, start_block, end_block).await?;
        for log in logs {
            let tokens = decode(
                &[
                    ParamType::Uint(256),
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                ],
                &log.data.0,
            )
            .map_err(|e| SourceReaderError::Decode(e.to_string()))?;
            let deposit = NftDepositLog {
                id: as_uint(&tokens[0])?.as_u64(),
                token: as_address(&tokens[1])?,
                sender: as_address(&tokens[2])?,
                token_id: as_uint(&tokens[3])?,
                block: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
                log_index: log.log_index.map(|i| i.as_u64()).unwrap_or(0),
            };
            if sink.send(deposit).await.is_err() {
                warn!("nft deposit sink closed early, stopping scan");
                return Ok(());
            }
        }
        Ok(())
    }
}

fn as_uint(token: &Token) -> Result<U256, SourceReaderError> {
    token
        .clone()
        .into_uint()
        .ok_or_else(|| SourceReaderError::Decode("expected uint256".into()))
}

fn as_address(token: &Token) -> Result<Address, SourceReaderError> {
    token
        .clone()
        .into_address()
        .ok_or_else(|| SourceReaderError::Decode("expected address".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics_are_stable_keccak_hashes() {
        let a = event_topic("ERC20Deposited(uint256,address,address,uint256)");
        let b = event_topic("ERC20Deposited(uint256,address,address,uint256)");
        assert_eq!(a, b);

        let nft = event_topic("NFTDeposited(uint256,address,address,uint256)");
        assert_ne!(a, nft);
    }
}
