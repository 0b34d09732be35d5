//! Error types for the key registry and will ledger

use testament_storage::StoreError;
use testament_types::KeyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Public key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Will not found for testator: {testator}")]
    WillNotFound { testator: String },

    #[error("Witness {witness} is not found in the will of {testator}")]
    WitnessNotListed { testator: String, witness: String },

    #[error("Testator {testator} has not been approved")]
    TestatorNotApproved { testator: String },

    #[error("Stored record at {key} is malformed: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Ledger client error: {0}")]
    Client(String),
}

impl From<KeyError> for LedgerError {
    fn from(err: KeyError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl LedgerError {
    /// Translate a store failure for `key`. `NotFound` is expected to have
    /// been handled by the caller before reaching here.
    pub(crate) fn from_store(key: &str, err: StoreError) -> Self {
        match err {
            StoreError::Serialization(source) => Self::CorruptRecord {
                key: key.to_string(),
                source,
            },
            other => Self::Client(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
