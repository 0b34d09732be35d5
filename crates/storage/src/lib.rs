use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testament_types::Receipt;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Ledger client error: {0}")]
    Client(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Client interface to the key/value ledger.
///
/// The ledger offers single-key reads and writes only: no transactions and
/// no compare-and-swap. `wait` bounds how long a write blocks for commit
/// confirmation; it does not promise that later reads observe the write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored at `key`. Fails with [`StoreError::NotFound`]
    /// when the key was never written.
    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    /// Write `value` at `key`.
    async fn put(
        &self,
        key: &str,
        value: Value,
        wait: Option<Duration>,
    ) -> Result<Receipt, StoreError>;

    /// All key/value pairs currently stored, ordered by key.
    async fn list(&self) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Sled-backed implementation
pub struct SledStore {
    db: Db,
    state: Tree,
}

impl SledStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let state = db.open_tree("state")?;
        Ok(Self { db, state })
    }

    /// Store that lives only as long as the process, for tests and dev runs.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let state = db.open_tree("state")?;
        Ok(Self { db, state })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        match self.state.get(key.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Value,
        wait: Option<Duration>,
    ) -> Result<Receipt, StoreError> {
        let data = serde_json::to_vec(&value)?;
        self.state.insert(key.as_bytes(), data)?;

        // A zero wait asks for no confirmation at all.
        let Some(wait) = wait.filter(|wait| !wait.is_zero()) else {
            return Ok(Receipt::submitted(key));
        };

        let db = self.db.clone();
        let flush = tokio::task::spawn_blocking(move || db.flush());
        match tokio::time::timeout(wait, flush).await {
            Ok(Ok(Ok(_))) => Ok(Receipt::committed(key)),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(err)) => Err(StoreError::Client(format!("flush task failed: {err}"))),
            Err(_) => {
                tracing::debug!("flush of {} not confirmed within {:?}", key, wait);
                Ok(Receipt::submitted(key))
            }
        }
    }

    async fn list(&self) -> Result<Vec<(String, Value)>, StoreError> {
        let mut pairs = Vec::new();
        for entry in self.state.iter() {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key).into_owned();
            pairs.push((key, serde_json::from_slice(&bytes)?));
        }
        Ok(pairs)
    }
}

/// In-memory implementation for tests and development nodes.
///
/// Writes are visible immediately, so every receipt reports a commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop `key` from the store. The ledger interface has no delete; this
    /// exists so callers can model records that disappeared out of band.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        value: Value,
        _wait: Option<Duration>,
    ) -> Result<Receipt, StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(Receipt::committed(key))
    }

    async fn list(&self) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
