//! Destination-chain RPC client: builds, signs, submits, and confirms mint
//! transactions against the paired contract.

use async_trait::async_trait;
use ethers_core::abi::{short_signature, ParamType, Token};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{
    Address, Bytes, NameOrAddress, TransactionRequest, H256, U256, U64,
};
use ethers_providers::{Http, Middleware, Provider};
use ethers_signers::{LocalWallet, Signer};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub enum DestClientError {
    Transport(String),
    Signing(String),
}

impl std::fmt::Display for DestClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestClientError::Transport(msg) => write!(f, "destination chain transport error: {msg}"),
            DestClientError::Signing(msg) => write!(f, "destination chain signing error: {msg}"),
        }
    }
}

impl std::error::Error for DestClientError {}

/// Outcomes of polling a submitted transaction for confirmation, matching
/// the destination client's `ConfirmTx` contract exactly: a clean miss, a
/// mined-but-not-yet-deep-enough receipt, and a mined-but-reverted receipt
/// are three distinct, non-fatal outcomes — only `Transport` is a fault.
#[derive(Debug)]
pub enum ConfirmError {
    NotFound,
    ConfirmPending,
    TxFailed,
    Transport(DestClientError),
}

impl std::fmt::Display for ConfirmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmError::NotFound => write!(f, "transaction not found"),
            ConfirmError::ConfirmPending => write!(f, "transaction pending confirmation"),
            ConfirmError::TxFailed => write!(f, "transaction reverted"),
            ConfirmError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ConfirmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfirmError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DestClientError> for ConfirmError {
    fn from(e: DestClientError) -> Self {
        ConfirmError::Transport(e)
    }
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: H256,
}

#[derive(Debug, Clone, Copy)]
pub struct TxReceipt {
    pub status: bool,
    pub block_number: u64,
}

#[async_trait]
pub trait DestinationClient: Send + Sync {
    async fn latest_block(&self) -> Result<u64, DestClientError>;
    async fn nonce_at(&self, address: Address) -> Result<u64, DestClientError>;

    async fn build_erc20_mint_tx(
        &self,
        signer: &LocalWallet,
        nonce: u64,
        out_token: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<SignedTx, DestClientError>;

    async fn build_nft_mint_tx(
        &self,
        signer: &LocalWallet,
        nonce: u64,
        out_token: Address,
        recipient: Address,
        token_id: u64,
    ) -> Result<SignedTx, DestClientError>;

    async fn send_tx(&self, tx: &SignedTx) -> Result<H256, DestClientError>;
    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, DestClientError>;

    /// Fetches the receipt and classifies it per the confirmer's contract:
    /// missing → `NotFound`; present but reverted → `TxFailed`; present but
    /// not yet `confirmation_blocks` deep → `ConfirmPending`; otherwise ok.
    async fn confirm_tx(&self, hash: H256, confirmation_blocks: u64) -> Result<(), ConfirmError>;
}

/// `ethers-providers`-backed implementation, signing legacy (Homestead,
/// type-0) transactions with a `LocalWallet`.
pub struct EthDestinationClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl EthDestinationClient {
    pub async fn new(endpoint: &str) -> Result<Self, DestClientError> {
        let http = super::http_transport(endpoint).map_err(DestClientError::Transport)?;
        let provider = Provider::new(http);
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| DestClientError::Transport(e.to_string()))?
            .as_u64();
        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    async fn build_mint_tx(
        &self,
        signer: &LocalWallet,
        nonce: u64,
        out_token: Address,
        data: Bytes,
    ) -> Result<SignedTx, DestClientError> {
        let mut req = TransactionRequest::new()
            .to(NameOrAddress::Address(out_token))
            .value(U256::zero())
            .nonce(nonce)
            .data(data)
            .from(signer.address());

        let gas = self
            .provider
            .estimate_gas(&req.clone().into(), None)
            .await
            .map_err(|e| DestClientError::Transport(e.to_string()))?;
        req = req.gas(gas);

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| DestClientError::Transport(e.to_string()))?;
        req = req.gas_price(gas_price);

        let typed: TypedTransaction = req.chain_id(self.chain_id).into();
        let signer = signer.clone().with_chain_id(self.chain_id);
        let signature = signer
            .sign_transaction(&typed)
            .await
            .map_err(|e| DestClientError::Signing(e.to_string()))?;

        let raw = typed.rlp_signed(&signature);
        let hash = typed.hash(&signature);
        debug!(nonce, to = %out_token, %hash, "built signed mint tx");
        Ok(SignedTx { raw, hash })
    }
}

#[async_trait]
impl DestinationClient for EthDestinationClient {
    async fn latest_block(&self) -> Result<u64, DestClientError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| DestClientError::Transport(e.to_string()))
    }

    async fn nonce_at(&self, address: Address) -> Result<u64, DestClientError> {
        self.provider
            .get_transaction_count(address, Some(ethers_core::types::BlockNumber::Pending.into()))
            .await
            .map(|n| n.as_u64())
            .map_err(|e| DestClientError::Transport(e.to_string()))
    }

    async fn build_erc20_mint_tx(
        &self,
        signer: &LocalWallet,
        nonce: u64,
        out_token: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<SignedTx, DestClientError> {
        let selector = short_signature("mint", &[ParamType::Address, ParamType::Uint(256)]);
        let mut data = selector.to_vec();
        data.extend(ethers_core::abi::encode(&[
            Token::Address(recipient),
            Token::Uint(amount),
        ]));
        self.build_mint_tx(signer, nonce, out_token, Bytes::from(data)).await
    }

    async fn build_nft_mint_tx(
        &self,
        signer: &LocalWallet,
        nonce: u64,
        out_token: Address,
        recipient: Address,
        token_id: u64,
    ) -> Result<SignedTx, DestClientError> {
        let selector = short_signature("safeMint", &[ParamType::Address, ParamType::Uint(256)]);
        let mut data = selector.to_vec();
        data.extend(ethers_core::abi::encode(&[
            Token::Address(recipient),
            Token::Uint(U256::from(token_id)),
        ]));
        self.build_mint_tx(signer, nonce, out_token, Bytes::from(data)).await
    }

    async fn send_tx(&self, tx: &SignedTx) -> Result<H256, DestClientError> {
        let pending = self
            .provider
            .send_raw_transaction(tx.raw.clone())
            .await
            .map_err(|e| DestClientError::Transport(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, DestClientError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| DestClientError::Transport(e.to_string()))?;
        Ok(receipt.map(|r| TxReceipt {
            status: r.status == Some(U64::from(1)),
            block_number: r.block_number.map(|b| b.as_u64()).unwrap_or(0),
        }))
    }

    async fn confirm_tx(&self, hash: H256, confirmation_blocks: u64) -> Result<(), ConfirmError> {
        let receipt = self.receipt(hash).await?;
        let Some(receipt) = receipt else {
            return Err(ConfirmError::NotFound);
        };
        if !receipt.status {
            return Err(ConfirmError::TxFailed);
        }
        let latest = self.latest_block().await?;
        if receipt.block_number + confirmation_blocks > latest {
            return Err(ConfirmError::ConfirmPending);
        }
        Ok(())
    }
}

/// In-memory stand-in used by component tests, driven purely by the
/// scripted responses a test installs before exercising the code under test.
pub struct MockDestinationClient {
    nonce: std::sync::Mutex<u64>,
    latest_block: std::sync::Mutex<u64>,
    confirm_script: std::sync::Mutex<std::collections::HashMap<H256, ConfirmScriptEntry>>,
    next_hash: std::sync::atomic::AtomicU64,
}

enum ConfirmScriptEntry {
    Ok,
    NotFound,
    Pending,
    Failed,
}

impl MockDestinationClient {
    pub fn new() -> Self {
        Self {
            nonce: std::sync::Mutex::new(0),
            latest_block: std::sync::Mutex::new(0),
            confirm_script: std::sync::Mutex::new(std::collections::HashMap::new()),
            next_hash: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        *self.nonce.lock().unwrap() = nonce;
        self
    }

    pub fn script_confirmed(&self, hash: H256) {
        self.confirm_script
            .lock()
            .unwrap()
            .insert(hash, ConfirmScriptEntry::Ok);
    }

    pub fn script_not_found(&self, hash: H256) {
        self.confirm_script
            .lock()
            .unwrap()
            .insert(hash, ConfirmScriptEntry::NotFound);
    }

    pub fn script_pending(&self, hash: H256) {
        self.confirm_script
            .lock()
            .unwrap()
            .insert(hash, ConfirmScriptEntry::Pending);
    }

    pub fn script_failed(&self, hash: H256) {
        self.confirm_script
            .lock()
            .unwrap()
            .insert(hash, ConfirmScriptEntry::Failed);
    }

    fn fresh_hash(&self) -> H256 {
        let n = self.next_hash.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        H256::from_low_u64_be(n)
    }
}

impl Default for MockDestinationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationClient for MockDestinationClient {
    async fn latest_block(&self) -> Result<u64, DestClientError> {
        Ok(*self.latest_block.lock().unwrap())
    }

    async fn nonce_at(&self, _address: Address) -> Result<u64, DestClientError> {
        Ok(*self.nonce.lock().unwrap())
    }

    async fn build_erc20_mint_tx(
        &self,
        _signer: &LocalWallet,
        _nonce: u64,
        _out_token: Address,
        _recipient: Address,
        _amount: U256,
    ) -> Result<SignedTx, DestClientError> {
        Ok(SignedTx {
            raw: Bytes::default(),
            hash: self.fresh_hash(),
        })
    }

    async fn build_nft_mint_tx(
        &self,
        _signer: &LocalWallet,
        _nonce: u64,
        _out_token: Address,
        _recipient: Address,
        _token_id: u64,
    ) -> Result<SignedTx, DestClientError> {
        Ok(SignedTx {
            raw: Bytes::default(),
            hash: self.fresh_hash(),
        })
    }

    async fn send_tx(&self, tx: &SignedTx) -> Result<H256, DestClientError> {
        Ok(tx.hash)
    }

    async fn receipt(&self, _hash: H256) -> Result<Option<TxReceipt>, DestClientError> {
        Ok(None)
    }

    async fn confirm_tx(&self, hash: H256, _confirmation_blocks: u64) -> Result<(), ConfirmError> {
        match self.confirm_script.lock().unwrap().get(&hash) {
            Some(ConfirmScriptEntry::Ok) | None => Ok(()),
            Some(ConfirmScriptEntry::NotFound) => Err(ConfirmError::NotFound),
            Some(ConfirmScriptEntry::Pending) => Err(ConfirmError::ConfirmPending),
            Some(ConfirmScriptEntry::Failed) => Err(ConfirmError::TxFailed),
        }
    }
}
