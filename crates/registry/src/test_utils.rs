use crate::Ledger;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use testament_storage::{KeyValueStore, MemoryStore, StoreError};
use testament_types::Receipt;

/// Memory store that can be told to fail writes or reads for chosen keys.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing_puts: Arc<Mutex<HashSet<String>>>,
    failing_gets: Arc<Mutex<HashSet<String>>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().insert(key.to_string());
    }

    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_puts.lock().clear();
        self.failing_gets.lock().clear();
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(Arc::new(self.clone()))
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        if self.failing_gets.lock().contains(key) {
            return Err(StoreError::Client(format!("connection reset reading {key}")));
        }
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        value: Value,
        wait: Option<Duration>,
    ) -> Result<Receipt, StoreError> {
        if self.failing_puts.lock().contains(key) {
            return Err(StoreError::Client(format!("connection reset writing {key}")));
        }
        self.inner.put(key, value, wait).await
    }

    async fn list(&self) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.list().await
    }
}

pub fn memory_ledger() -> (MemoryStore, Ledger) {
    let store = MemoryStore::new();
    let ledger = Ledger::new(Arc::new(store.clone()));
    (store, ledger)
}
