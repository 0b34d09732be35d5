//! Key layout of the flat ledger namespace.

/// Key holding the list of public keys awaiting administrator review.
pub const KEY_NEED_REVIEW: &str = "KEY_NEED_REVIEW";
/// Prefix of the key under which a testator's will is stored.
pub const WILL_PREFIX: &str = "WILL_";
/// Prefix of the key under which a witness's pending-will index is stored.
pub const WILL_LIST_PREFIX: &str = "WILL_LIST_";

/// `WILL_` + `LIST_x` would alias the witness index of `x`.
const LIST_ALIAS_PREFIX: &str = "LIST_";

/// Errors raised when a public key cannot be used as a ledger key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("public_key must not be empty")]
    Empty,
    #[error("public_key {key} collides with a reserved ledger key")]
    Reserved { key: String },
}

/// Check that `key` is usable as a public-key identity.
///
/// A key is rejected when it is blank or when storing a record under it
/// would overwrite one of the system records (the review list, a will, or a
/// witness index).
pub fn validate_public_key(key: &str) -> Result<(), KeyError> {
    if key.trim().is_empty() {
        return Err(KeyError::Empty);
    }

    if key == KEY_NEED_REVIEW
        || key.starts_with(WILL_PREFIX)
        || key.starts_with(LIST_ALIAS_PREFIX)
    {
        return Err(KeyError::Reserved {
            key: key.to_string(),
        });
    }

    Ok(())
}

/// Ledger key of the will authored by `testator`.
pub fn will_key(testator: &str) -> String {
    format!("{WILL_PREFIX}{testator}")
}

/// Ledger key of the set of testators whose wills name `witness`.
pub fn witness_index_key(witness: &str) -> String {
    format!("{WILL_LIST_PREFIX}{witness}")
}
