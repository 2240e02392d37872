//! Auth retry controller state
//!
//! `Fresh -> RetriedOnce` happens only for a 401 on a refreshable method
//! while still `Fresh`. The state returns to `Fresh` at the start of every
//! top-level call and after any 2xx response.

use itsi_domain::AuthMethod;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    #[default]
    Fresh,
    RetriedOnce,
}

/// Mutable per-connection auth state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    last_method: Option<AuthMethod>,
    retry: RetryState,
    fallback_to_derived: bool,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_method(&self) -> Option<AuthMethod> {
        self.last_method
    }

    pub fn record_method(&mut self, method: AuthMethod) {
        self.last_method = Some(method);
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    /// One-shot flag making the next resolution skip the explicit session key.
    pub fn fallback_to_derived(&self) -> bool {
        self.fallback_to_derived
    }

    pub fn clear_fallback(&mut self) {
        self.fallback_to_derived = false;
    }

    pub fn reset_retry(&mut self) {
        self.retry = RetryState::Fresh;
    }

    /// Whether a response with `status` may trigger the single auth retry.
    pub fn should_retry(&self, status: u16) -> bool {
        status == 401
            && self.retry == RetryState::Fresh
            && self.last_method.is_some_and(|method| method.is_refreshable())
    }

    /// Record that the retry is being spent. A failing explicit session key
    /// arms the fallback to derived auth when credentials are available.
    pub fn arm(&mut self, has_credentials: bool) {
        self.retry = RetryState::RetriedOnce;
        if self.last_method == Some(AuthMethod::ExplicitSession) && has_credentials {
            debug!("explicit session key rejected, falling back to derived session");
            self.fallback_to_derived = true;
        }
    }
}
