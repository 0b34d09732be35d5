use crate::record::PublicKeyRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a will.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WillStatus {
    /// At least one named witness has not signed yet.
    #[default]
    Pending,
    /// Every witness signed (or none were named). Terminal.
    Valid,
}

/// Signature state of one witness entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessStatus {
    #[default]
    Unsigned,
    Signed,
}

/// A witness named in a will.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub public_key: String,
    #[serde(default)]
    pub status: WitnessStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WitnessEntry {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            status: WitnessStatus::Unsigned,
            extra: Map::new(),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.status == WitnessStatus::Signed
    }
}

/// Will document stored under `WILL_` + testator key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Will {
    /// Testator identity.
    pub public_key: String,
    #[serde(default)]
    pub witnesses: Vec<WitnessEntry>,
    #[serde(default)]
    pub status: WillStatus,
    /// Remaining will fields, carried through untouched.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Will {
    /// Build a fresh will for `testator`.
    ///
    /// Witnesses are reset to unsigned and repeated witness keys collapse to
    /// their first occurrence. A will without witnesses starts out valid.
    pub fn new(
        testator: impl Into<String>,
        witnesses: Vec<WitnessEntry>,
        details: Map<String, Value>,
    ) -> Self {
        let mut unique: Vec<WitnessEntry> = Vec::with_capacity(witnesses.len());
        for mut entry in witnesses {
            if unique.iter().any(|w| w.public_key == entry.public_key) {
                continue;
            }
            entry.status = WitnessStatus::Unsigned;
            unique.push(entry);
        }

        let status = if unique.is_empty() {
            WillStatus::Valid
        } else {
            WillStatus::Pending
        };

        Self {
            public_key: testator.into(),
            witnesses: unique,
            status,
            details,
        }
    }

    /// Whether `witness` is named in this will.
    pub fn names(&self, witness: &str) -> bool {
        self.witnesses.iter().any(|w| w.public_key == witness)
    }

    pub fn witness_keys(&self) -> impl Iterator<Item = &str> {
        self.witnesses.iter().map(|w| w.public_key.as_str())
    }

    /// Number of witness entries marked signed.
    pub fn signed_count(&self) -> usize {
        self.witnesses.iter().filter(|w| w.is_signed()).count()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signed_count() == self.witnesses.len()
    }

    pub fn is_valid(&self) -> bool {
        self.status == WillStatus::Valid
    }
}

/// A will as presented to one of its witnesses, with the testator's
/// registered profile attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WillView {
    #[serde(flatten)]
    pub will: Will,
    pub testator: PublicKeyRecord,
}
