//! Typed façades over the KV store: the event ledger (one sub-store per
//! event kind), the pair registry, and the checkpoint store.
//!
//! Deposit events are modeled as a closed sum `{ERC20, NFT}` with a small
//! shared capability set (id/token/retry/status), not as open polymorphism —
//! the set of kinds is fixed and known at compile time, so each kind gets its
//! own concrete record type plus a generic [`Ledger<E>`] wrapper rather than
//! a trait-object event type.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{KvStore, PrefixStore, StoreError};

pub const PREFIX_EVENT_ERC20: &[u8] = b".eventerc20";
pub const PREFIX_EVENT_NFT: &[u8] = b".eventnft";
pub const PREFIX_PAIR: &[u8] = b".pair";
pub const PREFIX_CHECKPOINT: &[u8] = b".confirmedblok";

const CHECKPOINT_KEY_ERC20: &[u8] = b".erc20";
const CHECKPOINT_KEY_NFT: &[u8] = b".nft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Undefined,
    Succeeded,
    Failed,
}

// ---------------------------------------------------------------------------
// Closed sum of deposit event kinds
// ---------------------------------------------------------------------------

/// Shared capability set for a deposit event record, regardless of kind.
pub trait DepositEvent: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// KV-key prefix for this kind's sub-store.
    const PREFIX: &'static [u8];

    fn id(&self) -> u64;
    fn token(&self) -> &str;
    fn retry(&self) -> u32;
    fn set_retry(&mut self, retry: u32);
    fn status(&self) -> EventStatus;
    fn set_status(&mut self, status: EventStatus);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Erc20DepositEvent {
    pub id: u64,
    pub token: String,
    pub sender: String,
    /// Decimal-string amount; modeled as an arbitrary-precision integer
    /// (ERC20 `uint256`), never as a float.
    pub amount: String,
    pub retry: u32,
    pub status: EventStatus,
}

impl DepositEvent for Erc20DepositEvent {
    const PREFIX: &'static [u8] = PREFIX_EVENT_ERC20;

    fn id(&self) -> u64 {
        self.id
    }
    fn token(&self) -> &str {
        &self.token
    }
    fn retry(&self) -> u32 {
        self.retry
    }
    fn set_retry(&mut self, retry: u32) {
        self.retry = retry;
    }
    fn status(&self) -> EventStatus {
        self.status
    }
    fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftDepositEvent {
    pub id: u64,
    pub token: String,
    pub sender: String,
    /// Truncated to 64 bits from the on-chain 256-bit token id. See
    /// DESIGN.md for the truncation contract this crate commits to.
    pub token_id: u64,
    pub retry: u32,
    pub status: EventStatus,
}

impl DepositEvent for NftDepositEvent {
    const PREFIX: &'static [u8] = PREFIX_EVENT_NFT;

    fn id(&self) -> u64 {
        self.id
    }
    fn token(&self) -> &str {
        &self.token
    }
    fn retry(&self) -> u32 {
        self.retry
    }
    fn set_retry(&mut self, retry: u32) {
        self.retry = retry;
    }
    fn status(&self) -> EventStatus {
        self.status
    }
    fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }
}

/// The in-flight map needs a single value type spanning both event kinds.
/// A tagged enum (rather than two parallel maps) is the variant this crate
/// chooses among the two equally-valid designs called out in DESIGN.md.
#[derive(Debug, Clone)]
pub enum InFlightEvent {
    Erc20(Erc20DepositEvent),
    Nft(NftDepositEvent),
}

impl InFlightEvent {
    pub fn retry(&self) -> u32 {
        match self {
            InFlightEvent::Erc20(e) => e.retry(),
            InFlightEvent::Nft(e) => e.retry(),
        }
    }

    pub fn bump_retry(&mut self) {
        match self {
            InFlightEvent::Erc20(e) => e.retry += 1,
            InFlightEvent::Nft(e) => e.retry += 1,
        }
    }

    pub fn set_status(&mut self, status: EventStatus) {
        match self {
            InFlightEvent::Erc20(e) => e.set_status(status),
            InFlightEvent::Nft(e) => e.set_status(status),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            InFlightEvent::Erc20(e) => e.token(),
            InFlightEvent::Nft(e) => e.token(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event ledger
// ---------------------------------------------------------------------------

/// A typed façade over one event kind's prefixed sub-store.
pub struct Ledger<S: KvStore, E: DepositEvent> {
    store: PrefixStore<S>,
    _kind: std::marker::PhantomData<E>,
}

impl<S: KvStore, E: DepositEvent> Ledger<S, E> {
    pub fn new(db: Arc<S>) -> Self {
        Self {
            store: PrefixStore::new(db, E::PREFIX),
            _kind: std::marker::PhantomData,
        }
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    /// Returns `Ok(None)` on a clean miss, `Err` on a real backend/codec fault.
    pub fn get(&self, id: u64) -> Result<Option<E>, StoreError> {
        match self.store.get(&Self::key(id)) {
            Ok(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Codec(e.to_string()))?;
                Ok(Some(record))
            }
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put(&self, event: &E) -> Result<(), StoreError> {
        let bytes = bincode::serialize(event).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.put(&Self::key(event.id()), &bytes)
    }
}

// ---------------------------------------------------------------------------
// Pair registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairDirection {
    /// Source-chain token is the original asset; relay mints a representation
    /// on the destination chain.
    Original,
    /// Source-chain token is already a wrapped representation. Reserved:
    /// dispatch is currently a no-op (see DESIGN.md Open Question).
    Wrapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub in_addr: String,
    pub out_addr: String,
    pub in_type: PairDirection,
}

pub struct PairRegistry<S: KvStore> {
    store: PrefixStore<S>,
}

impl<S: KvStore> PairRegistry<S> {
    pub fn new(db: Arc<S>) -> Self {
        Self {
            store: PrefixStore::new(db, PREFIX_PAIR),
        }
    }

    pub fn get(&self, in_addr: &str) -> Result<Option<Pair>, StoreError> {
        match self.store.get(in_addr.as_bytes()) {
            Ok(bytes) => {
                let pair = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Codec(e.to_string()))?;
                Ok(Some(pair))
            }
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put(&self, pair: &Pair) -> Result<(), StoreError> {
        let bytes = bincode::serialize(pair).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.put(pair.in_addr.as_bytes(), &bytes)
    }
}

// ---------------------------------------------------------------------------
// Checkpoint store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub number: u64,
}

pub struct CheckpointStore<S: KvStore> {
    store: PrefixStore<S>,
}

impl<S: KvStore> CheckpointStore<S> {
    pub fn new(db: Arc<S>) -> Self {
        Self {
            store: PrefixStore::new(db, PREFIX_CHECKPOINT),
        }
    }

    /// Returns 0 (not an error) when no checkpoint has ever been written —
    /// a fresh relay starts scanning from genesis.
    pub fn get_erc20(&self) -> Result<u64, StoreError> {
        self.get(CHECKPOINT_KEY_ERC20)
    }

    pub fn get_nft(&self) -> Result<u64, StoreError> {
        self.get(CHECKPOINT_KEY_NFT)
    }

    pub fn put_erc20(&self, number: u64) -> Result<(), StoreError> {
        self.put(CHECKPOINT_KEY_ERC20, number)
    }

    pub fn put_nft(&self, number: u64) -> Result<(), StoreError> {
        self.put(CHECKPOINT_KEY_NFT, number)
    }

    fn get(&self, key: &[u8]) -> Result<u64, StoreError> {
        match self.store.get(key) {
            Ok(bytes) => {
                let cp: Checkpoint =
                    bincode::deserialize(&bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
                Ok(cp.number)
            }
            Err(StoreError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &[u8], number: u64) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&Checkpoint { number })
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.put(key, &bytes)
    }
}
