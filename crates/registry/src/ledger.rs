//! Shared handle to the key/value ledger.

use crate::errors::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use testament_storage::{KeyValueStore, StoreError};
use testament_types::{Receipt, UnresolvedReason};
use tokio::sync::{Mutex, MutexGuard};

/// Typed access to the ledger plus the per-process write gate.
///
/// Every read-modify-write sequence in this crate holds the gate for its
/// whole duration, so two requests served by the same process never
/// interleave inside a multi-key update. Writers in other processes are not
/// covered; all updates are written to be safely re-run instead.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn KeyValueStore>,
    wait: Option<Duration>,
    write_gate: Arc<Mutex<()>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            wait: None,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Bound how long each write blocks for commit confirmation.
    pub fn with_wait(mut self, wait: Option<Duration>) -> Self {
        self.wait = wait;
        self
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Read and decode the record at `key`; `None` when the key is absent.
    pub async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = match self.store.get(key).await {
            Ok(value) => value,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(LedgerError::from_store(key, err)),
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| LedgerError::CorruptRecord {
                key: key.to_string(),
                source,
            })
    }

    /// Like [`Ledger::fetch`], but folds missing and undecodable records into
    /// an [`UnresolvedReason`] so listings can skip them. Client failures
    /// still propagate.
    pub async fn resolve<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<std::result::Result<T, UnresolvedReason>> {
        match self.fetch(key).await {
            Ok(Some(record)) => Ok(Ok(record)),
            Ok(None) => Ok(Err(UnresolvedReason::Missing)),
            Err(LedgerError::CorruptRecord { .. }) => Ok(Err(UnresolvedReason::Corrupt)),
            Err(err) => Err(err),
        }
    }

    /// Every stored pair whose key starts with `prefix`, in key order.
    ///
    /// Used to rebuild derived lists from the records they point at.
    pub async fn entries(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let pairs = self
            .store
            .list()
            .await
            .map_err(|err| LedgerError::from_store(prefix, err))?;
        Ok(pairs
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }

    /// Encode and write `record` at `key`.
    pub async fn save<T: Serialize>(&self, key: &str, record: &T) -> Result<Receipt> {
        let value = serde_json::to_value(record)?;
        let receipt = self
            .store
            .put(key, value, self.wait)
            .await
            .map_err(|err| match err {
                StoreError::Serialization(source) => LedgerError::Encode(source),
                other => LedgerError::Client(other.to_string()),
            })?;
        tracing::debug!("wrote {} ({:?})", receipt.key, receipt.status);
        Ok(receipt)
    }
}
