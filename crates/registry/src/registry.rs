//! Public key registry
//!
//! Newly registered keys enter the review list stored at `KEY_NEED_REVIEW`
//! and leave it once an administrator approves them. The record and the
//! review list are separate ledger keys, so every operation here is written
//! to converge when re-run after a partial failure.

use crate::errors::*;
use crate::ledger::Ledger;
use crate::types::Registration;
use testament_types::{
    validate_public_key, KeySet, KeyStatus, PublicKeyRecord, Receipt, Resolved, UnresolvedReason,
    KEY_NEED_REVIEW, WILL_PREFIX,
};
use tracing::{info, warn};

/// Key Registry
#[derive(Clone)]
pub struct Registry {
    ledger: Ledger,
    require_review: bool,
}

impl Registry {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            require_review: false,
        }
    }

    /// Refuse registrations that arrive already marked approved, so keys
    /// only become approved through [`Registry::approve`].
    pub fn require_review(mut self, required: bool) -> Self {
        self.require_review = required;
        self
    }

    /// Register a public key and queue it for review.
    ///
    /// Returns the receipts of the writes that were submitted; they are not
    /// necessarily committed.
    pub async fn register(&self, registration: Registration) -> Result<Vec<Receipt>> {
        validate_public_key(&registration.public_key)?;
        if self.require_review && registration.status == Some(KeyStatus::Approved) {
            return Err(LedgerError::Validation(
                "status approved can only be granted by an administrator".to_string(),
            ));
        }
        let key = registration.public_key.clone();
        let mut receipts = Vec::with_capacity(2);

        let _gate = self.ledger.lock().await;

        // An absent list is bootstrapped, a rebuilt one is written back.
        let (mut pending, rewrite) = self
            .load_pending()
            .await?
            .unwrap_or((KeySet::new(), true));
        if pending.insert(key.clone()) || rewrite {
            receipts.push(self.ledger.save(KEY_NEED_REVIEW, &pending).await?);
        }

        let record = registration.into_record();
        receipts.push(self.ledger.save(&key, &record).await?);

        metrics::counter!("testament_keys_registered_total").increment(1);
        info!("Registered public key {} ({:?})", key, record.status);
        Ok(receipts)
    }

    /// Fetch the record registered for `key`.
    pub async fn show(&self, key: &str) -> Result<PublicKeyRecord> {
        validate_public_key(key)?;
        self.ledger
            .fetch(key)
            .await?
            .ok_or_else(|| LedgerError::KeyNotFound {
                key: key.to_string(),
            })
    }

    /// Resolve every key awaiting review.
    ///
    /// Keys whose record is missing or unreadable are skipped and reported in
    /// `unresolved`; a failing ledger client aborts the listing.
    pub async fn list_pending(&self) -> Result<Resolved<PublicKeyRecord>> {
        let mut resolved = Resolved::new();
        let pending = match self.load_pending().await? {
            Some((pending, rebuilt)) => {
                if rebuilt {
                    resolved.skip(KEY_NEED_REVIEW, UnresolvedReason::Corrupt);
                }
                pending
            }
            None => KeySet::new(),
        };

        for key in pending.iter() {
            match self.ledger.resolve::<PublicKeyRecord>(key).await? {
                Ok(record) => resolved.push(record),
                Err(reason) => {
                    warn!("Skipping pending key {}: {:?}", key, reason);
                    metrics::counter!("testament_unresolved_entries_total").increment(1);
                    resolved.skip(key, reason);
                }
            }
        }

        Ok(resolved)
    }

    /// Approve `key` and take it off the review list.
    pub async fn approve(&self, key: &str) -> Result<PublicKeyRecord> {
        validate_public_key(key)?;
        let _gate = self.ledger.lock().await;

        let mut record: PublicKeyRecord =
            self.ledger
                .fetch(key)
                .await?
                .ok_or_else(|| LedgerError::KeyNotFound {
                    key: key.to_string(),
                })?;

        record.status = KeyStatus::Approved;
        self.ledger.save(key, &record).await?;

        if let Some((mut pending, rebuilt)) = self.load_pending().await? {
            if pending.remove(key) || rebuilt {
                self.ledger.save(KEY_NEED_REVIEW, &pending).await?;
            }
        }

        metrics::counter!("testament_keys_approved_total").increment(1);
        info!("Approved public key {}", key);
        Ok(record)
    }

    /// Read the review list; `None` when it was never written. An
    /// unreadable list is rebuilt from the stored key records and flagged so
    /// writers persist the repair.
    async fn load_pending(&self) -> Result<Option<(KeySet, bool)>> {
        match self.ledger.resolve::<KeySet>(KEY_NEED_REVIEW).await? {
            Ok(pending) => Ok(Some((pending, false))),
            Err(UnresolvedReason::Missing) => Ok(None),
            Err(_) => {
                warn!("Review list {} is unreadable, rebuilding", KEY_NEED_REVIEW);
                Ok(Some((self.rebuild_pending().await?, true)))
            }
        }
    }

    /// Keys whose stored record still needs review, in key order.
    async fn rebuild_pending(&self) -> Result<KeySet> {
        let mut pending = KeySet::new();
        for (key, value) in self.ledger.entries("").await? {
            if key.starts_with(WILL_PREFIX) || validate_public_key(&key).is_err() {
                continue;
            }
            match serde_json::from_value::<PublicKeyRecord>(value) {
                Ok(record) if record.status == KeyStatus::NeedReview => {
                    pending.insert(key);
                }
                Ok(_) => {}
                Err(_) => warn!("Skipping unreadable key record {} during rebuild", key),
            }
        }
        Ok(pending)
    }
}
