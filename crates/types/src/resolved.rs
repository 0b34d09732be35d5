use serde::{Deserialize, Serialize};

/// Why an entry of an aggregated listing was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The referenced key was never written or has been removed.
    Missing,
    /// The stored value did not decode into the expected record type.
    Corrupt,
    /// The record exists but no longer matches the index that pointed at it.
    Stale,
}

/// A listing entry that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unresolved {
    pub key: String,
    pub reason: UnresolvedReason,
}

/// Result of best-effort aggregation over a set of ledger keys.
///
/// Keeps "nothing there" distinguishable from "some entries failed".
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub items: Vec<T>,
    pub unresolved: Vec<Unresolved>,
}

impl<T> Resolved<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn skip(&mut self, key: impl Into<String>, reason: UnresolvedReason) {
        self.unresolved.push(Unresolved {
            key: key.into(),
            reason,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

impl<T> Default for Resolved<T> {
    fn default() -> Self {
        Self::new()
    }
}
