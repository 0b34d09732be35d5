//! Shared record types for the testament workspace.
//!
//! Everything the registry and will ledger persist lives in one flat
//! key/value namespace. This crate defines the tagged record types stored
//! under those keys and the rules for building the keys themselves.

pub mod key_set;
pub mod namespace;
pub mod receipt;
pub mod record;
pub mod resolved;
pub mod will;


pub use key_set::*;
pub use namespace::*;
pub use receipt::*;
pub use record::*;
pub use resolved::*;
pub use will::*;
