//! # ITSI Domain
//!
//! Data types shared by the ITSI request pipeline and the resource
//! reconciler.
//!
//! This crate contains:
//! - The workspace error type and `Result` alias
//! - Connection configuration structures
//! - HTTP primitives (methods, header maps, normalized responses)
//! - Authentication and reconciliation data models
//!
//! ## Architecture
//! - Depends only on `itsi-common` (error classification)
//! - No I/O, no async
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
