//! Authenticated connection
//!
//! `ItsiConnection` hosts the auth retry controller: it resolves headers,
//! sends through the transport, normalizes the response and spends at most
//! one retry on a 401 for session-based credentials.

use itsi_common::filter_sensitive_headers;
use itsi_core::{normalize, NormalizeError, Transport, TransportError};
use itsi_domain::{merge_headers, ApiResponse, AuthOptions, ConnectionConfig, Headers, HttpMethod, Result};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{AuthState, CredentialResolver, SessionCache};
use crate::http::HttpTransport;

/// Per-call options for [`ItsiConnection::send_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub body: String,
    pub headers: Headers,
    pub strip_whitespace: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            body: String::new(),
            headers: Headers::new(),
            strip_whitespace: true,
        }
    }
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self { method, ..Self::default() }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        merge_headers(&mut self.headers, &headers);
        self
    }

    pub fn strip_whitespace(mut self, enabled: bool) -> Self {
        self.strip_whitespace = enabled;
        self
    }
}

/// Result of a single send attempt.
enum Attempt {
    Response(ApiResponse),
    Failed(TransportError),
}

impl Attempt {
    fn status(&self) -> u16 {
        match self {
            Self::Response(response) => response.status,
            Self::Failed(err) => err.status_or_default(),
        }
    }
}

/// One logical connection to an ITSI management endpoint.
///
/// Owns its session cache and retry state; share nothing between
/// concurrent callers, give each its own connection instead.
#[derive(Debug)]
pub struct ItsiConnection<T> {
    transport: T,
    options: AuthOptions,
    cache: SessionCache,
    state: AuthState,
}

impl ItsiConnection<HttpTransport> {
    /// Connection over the reqwest transport built from `config`.
    ///
    /// # Errors
    /// Returns `ItsiError::Config` when the base URL or TLS settings are
    /// unusable.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(transport, config.auth.clone()))
    }
}

impl<T: Transport> ItsiConnection<T> {
    pub fn new(transport: T, options: AuthOptions) -> Self {
        Self { transport, options, cache: SessionCache::new(), state: AuthState::new() }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn auth_options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.state
    }

    pub fn session_cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Send one request, retrying once on an eligible 401.
    ///
    /// Never fails: transport errors and internal failures come back as
    /// error responses with a JSON body.
    #[instrument(skip_all, fields(method = %options.method, path = %path))]
    pub async fn send_request(&mut self, path: &str, options: RequestOptions) -> ApiResponse {
        self.state.reset_retry();
        let path = request_path(path, options.method);

        match self.dispatch(&path, &options).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "request failed internally");
                internal_error_response(&err.to_string())
            }
        }
    }

    async fn dispatch(
        &mut self,
        path: &str,
        options: &RequestOptions,
    ) -> std::result::Result<ApiResponse, NormalizeError> {
        let first = self.attempt(path, options, false).await?;

        let outcome = if self.handle_http_error(first.status()) {
            info!("authentication rejected, retrying with refreshed credentials");
            self.attempt(path, options, true).await?
        } else {
            first
        };

        let response = match outcome {
            Attempt::Response(response) => response,
            Attempt::Failed(err) => {
                warn!(error = %err, "transport error");
                transport_error_response(&err, path, options.method)
            }
        };

        self.update_auth(response.status);
        debug!(status = response.status, "request complete");
        Ok(response)
    }

    async fn attempt(
        &mut self,
        path: &str,
        options: &RequestOptions,
        force_refresh: bool,
    ) -> std::result::Result<Attempt, NormalizeError> {
        let mut headers = CredentialResolver::new(&self.transport, &self.options)
            .resolve(&mut self.cache, &mut self.state, force_refresh)
            .await;
        merge_headers(&mut headers, &options.headers);

        match self.transport.send(path, &options.body, options.method, &headers).await {
            Ok(raw) => {
                let response = normalize(raw, options.strip_whitespace)?;
                let headers = filter_sensitive_headers(response.headers);
                Ok(Attempt::Response(ApiResponse::new(response.status, headers, response.body)))
            }
            Err(err) => Ok(Attempt::Failed(err)),
        }
    }

    /// Decide whether `status` spends the single auth retry.
    ///
    /// When it does, the retry state moves to `RetriedOnce`, a rejected
    /// explicit session key arms the fallback to derived auth, and the
    /// session cache is cleared.
    pub fn handle_http_error(&mut self, status: u16) -> bool {
        if !self.state.should_retry(status) {
            return false;
        }
        self.state.arm(self.options.credentials().is_some());
        self.cache.clear();
        true
    }

    /// Reset the retry state after a successful response.
    pub fn update_auth(&mut self, status: u16) {
        if (200..300).contains(&status) {
            self.state.reset_retry();
        }
    }

    /// Drop every cached credential and forget the last auth method.
    pub fn logout(&mut self) {
        debug!("logging out");
        self.cache.clear();
        self.state = AuthState::new();
    }

    pub fn clear_auth_cache(&mut self) {
        self.cache.clear();
    }
}

/// Prefix a missing `/` and ask GET endpoints for JSON output.
fn request_path(path: &str, method: HttpMethod) -> String {
    let mut path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
    if method == HttpMethod::Get && !path.contains("output_mode=") {
        path.push(if path.contains('?') { '&' } else { '?' });
        path.push_str("output_mode=json");
    }
    path
}

fn transport_error_response(err: &TransportError, path: &str, method: HttpMethod) -> ApiResponse {
    let body = json!({
        "error": "HTTP request failed",
        "details": err.message,
        "path": path,
        "method": method.as_str(),
    });
    ApiResponse::bare(err.status_or_default(), body.to_string())
}

fn internal_error_response(message: &str) -> ApiResponse {
    let body = json!({ "error": "Internal error", "details": message });
    ApiResponse::bare(500, body.to_string())
}
