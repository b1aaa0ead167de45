use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Backend(String),
    Codec(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "key not found"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
            StoreError::Codec(msg) => write!(f, "store codec error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// KV store trait
// ---------------------------------------------------------------------------

/// A byte-level ordered key/value store with prefix scoping.
///
/// Mirrors the `Get`/`Put`/`Delete` contract this crate's persistence layer is
/// built on: reads that miss return [`StoreError::NotFound`], which callers
/// pattern-match as control flow rather than treat as a fault.
pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Iterates all `(key, value)` pairs whose key starts with `prefix`, in
    /// key-ascending order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

/// A fixed byte prefix over a shared [`KvStore`], giving each logical
/// sub-store (events, pairs, checkpoints) its own keyspace without needing a
/// separate physical tree per prefix.
#[derive(Clone)]
pub struct PrefixStore<S: KvStore> {
    inner: Arc<S>,
    prefix: &'static [u8],
}

impl<S: KvStore> PrefixStore<S> {
    pub fn new(inner: Arc<S>, prefix: &'static [u8]) -> Self {
        Self { inner, prefix }
    }

    fn prefixed(&self, key: &[u8]) -> Vec<u8> {
        let mut k = Vec::with_capacity(self.prefix.len() + key.len());
        k.extend_from_slice(self.prefix);
        k.extend_from_slice(key);
        k
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.inner.get(&self.prefixed(key))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(&self.prefixed(key), value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(&self.prefixed(key))
    }

    /// Scans every key under this sub-store's prefix, stripping the prefix
    /// back off before returning it to the caller.
    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rows = self.inner.scan_prefix(self.prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_vec(), v))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// sled-backed implementation
// ---------------------------------------------------------------------------

/// The concrete, crash-safe embedded store used by `bridgecli serve`.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening kv store");
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self.db.get(key).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(v) => Ok(v.to_vec()),
            None => Err(StoreError::NotFound),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, and a `--db-path memory` escape hatch)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStore {
    inner: std::sync::Mutex<std::collections::BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let map = self.inner.lock().unwrap();
        map.get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let map = self.inner.lock().unwrap();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), StoreError> {
        debug!("memstore flush is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_get_put_delete() {
        let store = MemStore::new();
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), b"1");
        store.delete(b"a").unwrap();
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_prefix_store_isolates_keyspace() {
        let store = Arc::new(MemStore::new());
        let a = PrefixStore::new(store.clone(), b".a");
        let b = PrefixStore::new(store.clone(), b".b");

        a.put(b"x", b"from-a").unwrap();
        b.put(b"x", b"from-b").unwrap();

        assert_eq!(a.get(b"x").unwrap(), b"from-a");
        assert_eq!(b.get(b"x").unwrap(), b"from-b");
    }

    #[test]
    fn test_scan_all_strips_prefix_and_orders_ascending() {
        let store = Arc::new(MemStore::new());
        let sub = PrefixStore::new(store.clone(), b".events");
        sub.put(&1u64.to_be_bytes(), b"one").unwrap();
        sub.put(&2u64.to_be_bytes(), b"two").unwrap();

        let rows = sub.scan_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 1u64.to_be_bytes());
        assert_eq!(rows[1].0, 2u64.to_be_bytes());
    }
}
