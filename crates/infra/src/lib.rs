//! # ITSI Infrastructure
//!
//! Implementations of the core ports plus everything that talks to the
//! network.
//!
//! This crate contains:
//! - The reqwest-backed HTTP transport
//! - Credential resolution, session caching and the one-shot auth retry
//! - The request layer and the per-resource adapters
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `itsi-core`
//! - Depends on `itsi-common`, `itsi-domain` and `itsi-core`
//! - Contains all "impure" code (I/O, environment access)

pub mod auth;
pub mod config;
pub mod connection;
pub mod errors;
pub mod http;
pub mod observability;
pub mod request;
pub mod resources;

// Re-export commonly used items
pub use auth::{AuthError, AuthState, CredentialResolver, SessionCache};
pub use connection::{ItsiConnection, RequestOptions};
pub use errors::InfraError;
pub use http::{HttpTransport, HttpTransportBuilder};
pub use observability::{init_tracing, LogFormat};
pub use request::{ApiReply, Call, Fetched, ItsiRequest, Params, Payload, RequestChannel};
pub use resources::{
    AggregationPolicyStore, CorrelationSearchStore, EpisodeStore, ListOptions, ServiceStore,
};
