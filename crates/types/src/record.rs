use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Review state of a registered public key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    NeedReview,
    Approved,
}

/// Profile registered for a public key, stored under the key itself.
///
/// Profile fields are free-form and are carried through verbatim next to
/// `public_key` and `status` in the stored JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub public_key: String,
    #[serde(default)]
    pub status: KeyStatus,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl PublicKeyRecord {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            status: KeyStatus::NeedReview,
            profile: Map::new(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == KeyStatus::Approved
    }
}
