use serde::{Deserialize, Serialize};

/// How far a write had progressed when the store answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// Accepted by the store; commit was not confirmed within the wait bound.
    Submitted,
    /// Commit confirmed before the call returned.
    Committed,
}

/// Acknowledgement for a single ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Key that was written.
    pub key: String,
    pub status: CommitStatus,
}

impl Receipt {
    pub fn submitted(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: CommitStatus::Submitted,
        }
    }

    pub fn committed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: CommitStatus::Committed,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == CommitStatus::Committed
    }
}
