//! Domain types and models

pub mod auth;
pub mod http;
pub mod resource;

pub use auth::{AuthMethod, CredentialOrigin, CredentialSet, SessionCacheEntry};
pub use http::{merge_headers, ApiResponse, Headers, HttpMethod};
pub use resource::{CanonicalResource, FieldChange, Operation, Patch, ReconcileResult};
