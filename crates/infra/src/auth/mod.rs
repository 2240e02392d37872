//! Connection-scoped authentication
//!
//! The credential resolver, the session cache it fills, and the state the
//! auth retry controller keeps between attempts.

pub mod credentials;
pub mod retry;
pub mod session;

pub use credentials::{extract_session_key, AuthError, CredentialResolver, LOGIN_PATH};
pub use retry::{AuthState, RetryState};
pub use session::SessionCache;
