//! Request types accepted by the registry and will ledger

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use testament_types::{KeyStatus, PublicKeyRecord, Will, WitnessEntry};

/// Public key registration request
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub public_key: String,
    /// Explicit review status; `need_review` when omitted.
    #[serde(default)]
    pub status: Option<KeyStatus>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Registration {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            status: None,
            profile: Map::new(),
        }
    }

    pub fn into_record(self) -> PublicKeyRecord {
        PublicKeyRecord {
            public_key: self.public_key,
            status: self.status.unwrap_or_default(),
            profile: self.profile,
        }
    }
}

/// Will creation request
#[derive(Debug, Clone, Deserialize)]
pub struct WillDraft {
    /// Testator public key.
    pub public_key: String,
    /// Absent and `null` both mean no witnesses.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub witnesses: Vec<WitnessEntry>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<WitnessEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<WitnessEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Fields computed by the ledger; never taken from a draft.
const DERIVED_FIELDS: [&str; 2] = ["status", "testator"];

impl WillDraft {
    pub fn new(testator: impl Into<String>, witnesses: &[&str]) -> Self {
        Self {
            public_key: testator.into(),
            witnesses: witnesses.iter().map(|w| WitnessEntry::new(*w)).collect(),
            details: Map::new(),
        }
    }

    pub fn into_will(mut self) -> Will {
        for field in DERIVED_FIELDS {
            self.details.remove(field);
        }
        Will::new(self.public_key, self.witnesses, self.details)
    }
}
