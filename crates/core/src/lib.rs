//! # ITSI Core
//!
//! Pure request-pipeline and reconciliation logic - no network code.
//!
//! This crate contains:
//! - The `Transport` port and the response normalizer
//! - Declarative per-resource schemas
//! - The canonicalizer, differencer and reconciliation orchestrator
//! - The `ResourceStore` port consumed by the orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `itsi-common` and `itsi-domain`
//! - No HTTP client, no filesystem access
//! - All external dependencies via traits

pub mod reconcile;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use reconcile::canonical::{canonicalize, unwrap_envelope, Envelope};
pub use reconcile::diff::{describe_changes, diff};
pub use reconcile::ports::{Discovery, Lookup, RefKind, ResourceRef, ResourceStore};
pub use reconcile::schema::{
    CreatePolicy, ExtraFields, FieldRule, FieldSpec, ResourceSchema, UpdateMode,
};
pub use reconcile::service::{Mode, Reconciler};
pub use transport::normalize::{normalize, NormalizeError};
pub use transport::ports::{HeaderSource, RawResponse, ResponseMeta, Transport, TransportError};
