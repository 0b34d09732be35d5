use serde::{Deserialize, Serialize};

/// Ordered list of keys with set semantics.
///
/// Used for the pending review list and for witness indexes. The ledger only
/// stores plain JSON arrays, so duplicates written by older clients are
/// collapsed on decode and never written back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct KeySet(Vec<String>);

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key` unless already present. Returns `true` if the set changed.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.0.push(key);
        true
    }

    /// Remove `key`. Returns `true` if the set changed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|existing| existing != key);
        self.0.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|existing| existing == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for KeySet {
    fn from(keys: Vec<String>) -> Self {
        keys.into_iter().collect()
    }
}

impl From<KeySet> for Vec<String> {
    fn from(set: KeySet) -> Self {
        set.0
    }
}

impl FromIterator<String> for KeySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = KeySet::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}
