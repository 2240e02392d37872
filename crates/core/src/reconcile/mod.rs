//! Idempotent resource reconciliation
//!
//! Discover, canonicalize both sides, diff, then create, patch or delete.
//! Only fields the caller declares take part in a comparison.

pub mod canonical;
pub mod diff;
pub mod ports;
pub mod schema;
pub mod service;
