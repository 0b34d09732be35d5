//! HTTP boundary for the key registry and will ledger.
//!
//! Translates requests into [`testament_registry::Registry`] and
//! [`testament_registry::WillLedger`] calls and wraps every answer in the
//! `{ data, ...metadata }` response envelope.

pub mod envelope;
pub mod server;


pub use envelope::{ApiError, Envelope};
pub use server::{build_router, start_server, AppState};
