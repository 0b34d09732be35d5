//! Will ledger
//!
//! A will names zero or more witnesses and stays `pending` until every one
//! of them has signed, at which point it becomes `valid` for good. Each
//! witness also has an index of the wills still waiting on their signature,
//! stored at `WILL_LIST_` + witness key.

use crate::errors::*;
use crate::ledger::Ledger;
use crate::types::WillDraft;
use testament_types::{
    validate_public_key, will_key, witness_index_key, KeySet, PublicKeyRecord, Receipt,
    Resolved, UnresolvedReason, Will, WillStatus, WillView, WitnessStatus, WILL_LIST_PREFIX,
    WILL_PREFIX,
};
use tracing::{info, warn};

/// Will Ledger
#[derive(Clone)]
pub struct WillLedger {
    ledger: Ledger,
    require_approved_testator: bool,
}

impl WillLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            require_approved_testator: false,
        }
    }

    /// Only accept wills from testators whose key has been approved.
    pub fn require_approved_testator(mut self, required: bool) -> Self {
        self.require_approved_testator = required;
        self
    }

    /// Create or replace the will of `draft.public_key`.
    ///
    /// Witness indexes are updated before the will itself is written, so an
    /// interrupted call can leave an index entry pointing at a will that does
    /// not exist yet; listings skip those and a retry completes the write.
    pub async fn create(&self, draft: WillDraft) -> Result<Vec<Receipt>> {
        validate_public_key(&draft.public_key)?;
        for witness in &draft.witnesses {
            validate_public_key(&witness.public_key)?;
            if witness.public_key == draft.public_key {
                return Err(LedgerError::Validation(
                    "testator cannot witness their own will".to_string(),
                ));
            }
        }

        let will = draft.into_will();
        let testator = will.public_key.clone();
        let key = will_key(&testator);

        let _gate = self.ledger.lock().await;

        if self.require_approved_testator {
            let record = self.ledger.fetch::<PublicKeyRecord>(&testator).await?;
            if !record.is_some_and(|r| r.is_approved()) {
                return Err(LedgerError::TestatorNotApproved { testator });
            }
        }

        let previous = match self.ledger.fetch::<Will>(&key).await {
            Ok(previous) => previous,
            Err(LedgerError::CorruptRecord { .. }) => {
                warn!("Replacing unreadable will at {}", key);
                None
            }
            Err(err) => return Err(err),
        };

        let mut receipts = Vec::new();
        for witness in will.witness_keys() {
            if let Some(receipt) = self.index_insert(witness, &testator).await? {
                receipts.push(receipt);
            }
        }

        receipts.push(self.ledger.save(&key, &will).await?);

        if let Some(previous) = previous {
            for dropped in previous.witness_keys().filter(|w| !will.names(w)) {
                if let Some(receipt) = self.index_remove(dropped, &testator).await? {
                    receipts.push(receipt);
                }
            }
        }

        metrics::counter!("testament_wills_created_total").increment(1);
        info!(
            "Created will for {} with {} witness(es), status {:?}",
            testator,
            will.witnesses.len(),
            will.status
        );
        Ok(receipts)
    }

    /// Fetch the will authored by `testator`.
    pub async fn show(&self, testator: &str) -> Result<Will> {
        validate_public_key(testator)?;
        self.ledger
            .fetch(&will_key(testator))
            .await?
            .ok_or_else(|| LedgerError::WillNotFound {
                testator: testator.to_string(),
            })
    }

    /// Wills still waiting on `witness`, each with its testator's profile.
    ///
    /// Index entries whose will or testator record cannot be read, or whose
    /// will no longer expects this witness, are skipped and reported.
    pub async fn list_for_witness(&self, witness: &str) -> Result<Resolved<WillView>> {
        validate_public_key(witness)?;
        let index_key = witness_index_key(witness);
        let mut resolved = Resolved::new();

        let index = match self.ledger.resolve::<KeySet>(&index_key).await? {
            Ok(index) => index,
            Err(UnresolvedReason::Missing) => return Ok(resolved),
            Err(reason) => {
                warn!("Witness index {} is unreadable, listing from wills", index_key);
                resolved.skip(index_key, reason);
                self.rebuild_index(witness).await?
            }
        };

        for testator in index.iter() {
            let key = will_key(testator);
            let mut will = match self.ledger.resolve::<Will>(&key).await? {
                Ok(will) => will,
                Err(reason) => {
                    skip_entry(&mut resolved, key, reason);
                    continue;
                }
            };

            if !awaits_signature(&will, witness) {
                skip_entry(&mut resolved, key, UnresolvedReason::Stale);
                continue;
            }

            let record = match self.ledger.resolve::<PublicKeyRecord>(testator).await? {
                Ok(record) => record,
                Err(reason) => {
                    skip_entry(&mut resolved, testator.to_string(), reason);
                    continue;
                }
            };

            will.details.remove("testator");
            resolved.push(WillView {
                will,
                testator: record,
            });
        }

        Ok(resolved)
    }

    /// Record `witness`'s signature on `testator`'s will.
    ///
    /// Signing again is accepted and changes nothing. Once every witness has
    /// signed the will becomes valid, and the will is dropped from the
    /// signer's pending index.
    pub async fn sign(&self, testator: &str, witness: &str) -> Result<Will> {
        validate_public_key(testator)?;
        validate_public_key(witness)?;
        let key = will_key(testator);

        let _gate = self.ledger.lock().await;

        let mut will: Will =
            self.ledger
                .fetch(&key)
                .await?
                .ok_or_else(|| LedgerError::WillNotFound {
                    testator: testator.to_string(),
                })?;

        if !will.names(witness) {
            return Err(LedgerError::WitnessNotListed {
                testator: testator.to_string(),
                witness: witness.to_string(),
            });
        }

        if apply_signature(&mut will, witness) {
            self.ledger.save(&key, &will).await?;
            metrics::counter!("testament_signatures_total").increment(1);
            info!(
                "Witness {} signed will of {} ({}/{} signed, {:?})",
                witness,
                testator,
                will.signed_count(),
                will.witnesses.len(),
                will.status
            );
        }

        self.index_remove(witness, testator).await?;
        Ok(will)
    }

    async fn index_insert(&self, witness: &str, testator: &str) -> Result<Option<Receipt>> {
        let key = witness_index_key(witness);
        let (mut index, rebuilt) = self.load_index(witness).await?;
        if !index.insert(testator) && !rebuilt {
            return Ok(None);
        }
        Ok(Some(self.ledger.save(&key, &index).await?))
    }

    async fn index_remove(&self, witness: &str, testator: &str) -> Result<Option<Receipt>> {
        let key = witness_index_key(witness);
        let (mut index, rebuilt) = self.load_index(witness).await?;
        if !index.remove(testator) && !rebuilt {
            return Ok(None);
        }
        Ok(Some(self.ledger.save(&key, &index).await?))
    }

    /// Read the index of `witness`. An unreadable index is rebuilt from the
    /// stored wills; the flag tells the caller to write it back.
    async fn load_index(&self, witness: &str) -> Result<(KeySet, bool)> {
        let key = witness_index_key(witness);
        match self.ledger.resolve::<KeySet>(&key).await? {
            Ok(index) => Ok((index, false)),
            Err(UnresolvedReason::Corrupt) => {
                warn!("Rebuilding unreadable witness index {}", key);
                Ok((self.rebuild_index(witness).await?, true))
            }
            Err(_) => Ok((KeySet::new(), false)),
        }
    }

    /// Testators whose stored will still waits on `witness`, in key order.
    async fn rebuild_index(&self, witness: &str) -> Result<KeySet> {
        let mut index = KeySet::new();
        for (key, value) in self.ledger.entries(WILL_PREFIX).await? {
            if key.starts_with(WILL_LIST_PREFIX) {
                continue;
            }
            let Some(testator) = key.strip_prefix(WILL_PREFIX) else {
                continue;
            };
            match serde_json::from_value::<Will>(value) {
                Ok(will) if awaits_signature(&will, witness) => {
                    index.insert(testator);
                }
                Ok(_) => {}
                Err(_) => warn!("Skipping unreadable will {} during index rebuild", key),
            }
        }
        Ok(index)
    }
}

/// Mark every entry for `witness` signed and settle the will's status.
/// Returns whether anything changed.
fn apply_signature(will: &mut Will, witness: &str) -> bool {
    let mut changed = false;
    for entry in will
        .witnesses
        .iter_mut()
        .filter(|entry| entry.public_key == witness)
    {
        if !entry.is_signed() {
            entry.status = WitnessStatus::Signed;
            changed = true;
        }
    }

    if !will.is_valid() && will.is_fully_signed() {
        will.status = WillStatus::Valid;
        changed = true;
    }

    changed
}

fn awaits_signature(will: &Will, witness: &str) -> bool {
    will.witnesses
        .iter()
        .any(|entry| entry.public_key == witness && !entry.is_signed())
}

fn skip_entry(resolved: &mut Resolved<WillView>, key: String, reason: UnresolvedReason) {
    warn!("Skipping will list entry {}: {:?}", key, reason);
    metrics::counter!("testament_unresolved_entries_total").increment(1);
    resolved.skip(key, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{memory_ledger, FaultyStore};
    use crate::{Registration, Registry};
    use serde_json::json;
    use testament_storage::KeyValueStore;

    fn draft(body: serde_json::Value) -> WillDraft {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_zero_witness_will_is_valid() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills.create(WillDraft::new("alice", &[])).await.unwrap();

        assert_eq!(wills.show("alice").await.unwrap().status, WillStatus::Valid);
        // No witness indexes are touched.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_will_without_witnesses_field_is_valid() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(draft(json!({"public_key": "alice", "content": "house"})))
            .await
            .unwrap();

        let will = wills.show("alice").await.unwrap();
        assert!(will.is_valid());
        assert_eq!(will.details.get("content"), Some(&json!("house")));
    }

    #[tokio::test]
    async fn test_create_ignores_client_supplied_status() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(draft(json!({
                "public_key": "alice",
                "status": "valid",
                "witnesses": [{"public_key": "bob", "status": "signed"}]
            })))
            .await
            .unwrap();

        let will = wills.show("alice").await.unwrap();
        assert_eq!(will.status, WillStatus::Pending);
        assert_eq!(will.signed_count(), 0);
        assert!(!will.details.contains_key("status"));
    }

    #[tokio::test]
    async fn test_signature_completion() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(WillDraft::new("alice", &["bob", "carol", "dave"]))
            .await
            .unwrap();

        let after_bob = wills.sign("alice", "bob").await.unwrap();
        assert_eq!(after_bob.status, WillStatus::Pending);
        let after_carol = wills.sign("alice", "carol").await.unwrap();
        assert_eq!(after_carol.status, WillStatus::Pending);
        assert_eq!(after_carol.signed_count(), 2);

        let after_dave = wills.sign("alice", "dave").await.unwrap();
        assert_eq!(after_dave.status, WillStatus::Valid);
        assert_eq!(wills.show("alice").await.unwrap().status, WillStatus::Valid);
    }

    #[tokio::test]
    async fn test_repeated_signature_is_not_double_counted() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(WillDraft::new("alice", &["bob", "carol"]))
            .await
            .unwrap();

        wills.sign("alice", "bob").await.unwrap();
        let again = wills.sign("alice", "bob").await.unwrap();

        assert_eq!(again.signed_count(), 1);
        assert_eq!(again.status, WillStatus::Pending);
        assert_eq!(wills.show("alice").await.unwrap().status, WillStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_witness_is_rejected_without_mutation() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        let before = store.get("WILL_alice").await.unwrap();

        let err = wills.sign("alice", "mallory").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::WitnessNotListed { ref witness, .. } if witness == "mallory"
        ));
        assert_eq!(store.get("WILL_alice").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_sign_missing_will() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        let err = wills.sign("alice", "bob").await.unwrap_err();
        assert!(matches!(err, LedgerError::WillNotFound { .. }));
    }

    #[tokio::test]
    async fn test_valid_will_stays_valid() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        wills.sign("alice", "bob").await.unwrap();
        let again = wills.sign("alice", "bob").await.unwrap();

        assert!(again.is_valid());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_witnesses() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        let err = wills
            .create(WillDraft::new("alice", &["alice"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = wills
            .create(WillDraft::new("alice", &["WILL_LIST_bob"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_witnesses_collapse() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(WillDraft::new("alice", &["bob", "bob"]))
            .await
            .unwrap();
        assert_eq!(wills.show("alice").await.unwrap().witnesses.len(), 1);
        assert_eq!(store.get("WILL_LIST_bob").await.unwrap(), json!(["alice"]));

        let signed = wills.sign("alice", "bob").await.unwrap();
        assert!(signed.is_valid());
    }

    #[tokio::test]
    async fn test_witness_scenario() {
        let (store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger);

        registry.register(Registration::new("alice")).await.unwrap();
        wills
            .create(draft(json!({"public_key": "alice", "witnesses": [{"public_key": "bob"}]})))
            .await
            .unwrap();
        assert_eq!(wills.show("alice").await.unwrap().status, WillStatus::Pending);

        let listing = wills.list_for_witness("bob").await.unwrap();
        assert!(listing.is_complete());
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].testator.public_key, "alice");

        wills.sign("alice", "bob").await.unwrap();
        assert_eq!(wills.show("alice").await.unwrap().status, WillStatus::Valid);

        // Signed wills leave the witness's pending index.
        assert_eq!(store.get("WILL_LIST_bob").await.unwrap(), json!([]));
        assert!(wills.list_for_witness("bob").await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_list_for_unknown_witness_is_empty() {
        let (_store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        let listing = wills.list_for_witness("nobody").await.unwrap();
        assert!(listing.items.is_empty());
        assert!(listing.is_complete());
    }

    #[tokio::test]
    async fn test_list_for_witness_reports_unresolved_entries() {
        let (store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger);

        registry.register(Registration::new("alice")).await.unwrap();
        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        // carol's will names bob, but carol never registered
        wills.create(WillDraft::new("carol", &["bob"])).await.unwrap();
        store
            .put("WILL_LIST_bob", json!(["alice", "carol", "erin"]), None)
            .await
            .unwrap();

        let listing = wills.list_for_witness("bob").await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].will.public_key, "alice");
        assert_eq!(listing.unresolved.len(), 2);
        assert_eq!(listing.unresolved[0].key, "carol");
        assert_eq!(listing.unresolved[0].reason, UnresolvedReason::Missing);
        assert_eq!(listing.unresolved[1].key, "WILL_erin");
        assert_eq!(listing.unresolved[1].reason, UnresolvedReason::Missing);
    }

    #[tokio::test]
    async fn test_replacing_will_prunes_dropped_witnesses() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills
            .create(WillDraft::new("alice", &["bob", "carol"]))
            .await
            .unwrap();
        wills
            .create(WillDraft::new("alice", &["carol", "dave"]))
            .await
            .unwrap();

        assert_eq!(store.get("WILL_LIST_bob").await.unwrap(), json!([]));
        assert_eq!(store.get("WILL_LIST_carol").await.unwrap(), json!(["alice"]));
        assert_eq!(store.get("WILL_LIST_dave").await.unwrap(), json!(["alice"]));

        let err = wills.sign("alice", "bob").await.unwrap_err();
        assert!(matches!(err, LedgerError::WitnessNotListed { .. }));
    }

    #[tokio::test]
    async fn test_stale_index_entry_is_skipped() {
        let (store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger);

        registry.register(Registration::new("alice")).await.unwrap();
        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        // Sign landed, but the index prune never did.
        wills.sign("alice", "bob").await.unwrap();
        store
            .put("WILL_LIST_bob", json!(["alice"]), None)
            .await
            .unwrap();

        let listing = wills.list_for_witness("bob").await.unwrap();
        assert!(listing.items.is_empty());
        assert_eq!(listing.unresolved[0].key, "WILL_alice");
        assert_eq!(listing.unresolved[0].reason, UnresolvedReason::Stale);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rebuilt_on_write() {
        let (store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger);

        registry.register(Registration::new("alice")).await.unwrap();
        registry.register(Registration::new("carol")).await.unwrap();
        wills.create(WillDraft::new("carol", &["bob"])).await.unwrap();
        store
            .put("WILL_LIST_bob", json!({"oops": 1}), None)
            .await
            .unwrap();

        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();

        assert_eq!(
            store.get("WILL_LIST_bob").await.unwrap(),
            json!(["carol", "alice"])
        );
        let listing = wills.list_for_witness("bob").await.unwrap();
        assert!(listing.is_complete());
        let testators: Vec<_> = listing
            .items
            .iter()
            .map(|view| view.will.public_key.as_str())
            .collect();
        assert_eq!(testators, vec!["carol", "alice"]);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rebuilt_on_sign() {
        let (store, ledger) = memory_ledger();
        let wills = WillLedger::new(ledger);

        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        wills.create(WillDraft::new("carol", &["bob"])).await.unwrap();
        store.put("WILL_LIST_bob", json!("garbage"), None).await.unwrap();

        wills.sign("alice", "bob").await.unwrap();

        assert_eq!(store.get("WILL_LIST_bob").await.unwrap(), json!(["carol"]));
    }

    #[tokio::test]
    async fn test_corrupt_index_listing_falls_back_to_wills() {
        let (store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger);

        registry.register(Registration::new("carol")).await.unwrap();
        wills.create(WillDraft::new("carol", &["bob"])).await.unwrap();
        // Signed by bob already: never listed.
        wills.create(WillDraft::new("dave", &["bob"])).await.unwrap();
        wills.sign("dave", "bob").await.unwrap();
        store.put("WILL_LIST_bob", json!(42), None).await.unwrap();

        let listing = wills.list_for_witness("bob").await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].will.public_key, "carol");
        assert_eq!(listing.unresolved.len(), 1);
        assert_eq!(listing.unresolved[0].key, "WILL_LIST_bob");
        assert_eq!(listing.unresolved[0].reason, UnresolvedReason::Corrupt);
        // Listing does not write.
        assert_eq!(store.get("WILL_LIST_bob").await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_create_retry_converges_after_partial_failure() {
        let store = FaultyStore::new();
        let wills = WillLedger::new(store.ledger());

        store.fail_put("WILL_LIST_carol");
        assert!(wills
            .create(WillDraft::new("alice", &["bob", "carol"]))
            .await
            .is_err());
        // bob's index was updated, the will itself was never written
        assert_eq!(
            store.memory().get("WILL_LIST_bob").await.unwrap(),
            json!(["alice"])
        );
        assert!(matches!(
            wills.show("alice").await.unwrap_err(),
            LedgerError::WillNotFound { .. }
        ));

        store.heal();
        wills
            .create(WillDraft::new("alice", &["bob", "carol"]))
            .await
            .unwrap();
        assert_eq!(
            store.memory().get("WILL_LIST_bob").await.unwrap(),
            json!(["alice"])
        );
        assert_eq!(
            store.memory().get("WILL_LIST_carol").await.unwrap(),
            json!(["alice"])
        );
        assert_eq!(wills.show("alice").await.unwrap().witnesses.len(), 2);
    }

    #[tokio::test]
    async fn test_sign_retry_after_failed_index_prune() {
        let store = FaultyStore::new();
        let wills = WillLedger::new(store.ledger());

        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        store.fail_put("WILL_LIST_bob");
        assert!(wills.sign("alice", "bob").await.is_err());
        assert!(wills.show("alice").await.unwrap().is_valid());

        store.heal();
        let will = wills.sign("alice", "bob").await.unwrap();
        assert!(will.is_valid());
        assert_eq!(
            store.memory().get("WILL_LIST_bob").await.unwrap(),
            json!([])
        );
    }

    #[tokio::test]
    async fn test_approval_gate() {
        let (_store, ledger) = memory_ledger();
        let registry = Registry::new(ledger.clone());
        let wills = WillLedger::new(ledger).require_approved_testator(true);

        let err = wills
            .create(WillDraft::new("alice", &["bob"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TestatorNotApproved { .. }));

        registry.register(Registration::new("alice")).await.unwrap();
        assert!(wills.create(WillDraft::new("alice", &["bob"])).await.is_err());

        registry.approve("alice").await.unwrap();
        wills.create(WillDraft::new("alice", &["bob"])).await.unwrap();
        assert!(!wills.show("alice").await.unwrap().is_valid());
    }
}
