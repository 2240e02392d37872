//! Credential resolution
//!
//! Picks exactly one credential per request in fixed priority order:
//! bearer token, explicit session key, a session key derived from
//! username/password, Basic auth. Resolved headers are cached on the
//! connection's [`SessionCache`] until a refresh is forced.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use itsi_common::mask_secret;
use itsi_core::{normalize, Transport};
use itsi_domain::{AuthMethod, AuthOptions, CredentialSet, Headers, HttpMethod};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::retry::AuthState;
use super::session::SessionCache;

/// Login endpoint used to exchange username/password for a session key.
pub const LOGIN_PATH: &str = "/services/auth/login";

static SESSION_KEY_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)<sessionKey>\s*(.*?)\s*</sessionKey>").ok());

/// Session-key derivation failures. Never surfaced to callers: the resolver
/// falls back to Basic auth.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Transport(String),

    #[error("login rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("login response carried no session key")]
    MissingSessionKey,

    #[error("login response could not be read: {0}")]
    InvalidBody(String),
}

/// Extract a session key from a login response body.
///
/// Reads the first `<sessionKey>` element, then falls back to a JSON
/// `{"sessionKey": ...}` body. Empty keys count as missing.
pub fn extract_session_key(body: &str) -> Option<String> {
    let from_xml = SESSION_KEY_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.captures(body))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim().to_string());

    from_xml
        .or_else(|| {
            serde_json::from_str::<Value>(body)
                .ok()?
                .get("sessionKey")?
                .as_str()
                .map(|key| key.trim().to_string())
        })
        .filter(|key| !key.is_empty())
}

/// Headers sent with every request before authentication is added.
pub fn base_headers() -> Headers {
    Headers::from([
        ("Accept".to_string(), "application/json".to_string()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ])
}

/// Resolves the `Authorization` header for one connection.
pub struct CredentialResolver<'a, T: ?Sized> {
    transport: &'a T,
    options: &'a AuthOptions,
}

impl<'a, T: Transport + ?Sized> CredentialResolver<'a, T> {
    pub fn new(transport: &'a T, options: &'a AuthOptions) -> Self {
        Self { transport, options }
    }

    /// Build the full header set for the next request.
    ///
    /// Cached headers are returned as-is unless `force_refresh` is set. The
    /// header set is cached whenever a credential was found; unauthenticated
    /// headers are never cached.
    pub async fn resolve(
        &self,
        cache: &mut SessionCache,
        state: &mut AuthState,
        force_refresh: bool,
    ) -> Headers {
        if !force_refresh {
            if let Some(headers) = cache.headers() {
                debug!("using cached authentication headers");
                return headers.clone();
            }
        }

        let mut headers = base_headers();
        let Some(credential) = self.select(cache, state, force_refresh).await else {
            debug!("no credentials configured, sending unauthenticated request");
            return headers;
        };

        debug!(method = %credential.method(), origin = ?credential.origin(), "resolved credentials");
        state.record_method(credential.method());
        headers.insert("Authorization".to_string(), credential.header_value().to_string());
        cache.set_headers(headers.clone());
        headers
    }

    async fn select(
        &self,
        cache: &mut SessionCache,
        state: &mut AuthState,
        force_refresh: bool,
    ) -> Option<CredentialSet> {
        let scheme = self.options.scheme();

        if let Some(token) = self.options.token() {
            return Some(CredentialSet::new(AuthMethod::Token, format!("Bearer {token}")));
        }

        if !state.fallback_to_derived() {
            if let Some(key) = self.options.session_key() {
                return Some(CredentialSet::new(
                    AuthMethod::ExplicitSession,
                    format!("{scheme} {key}"),
                ));
            }
        }

        let (username, password) = self.options.credentials()?;
        match self.derive_session_key(username, password, cache, force_refresh).await {
            Ok(key) => {
                state.clear_fallback();
                Some(CredentialSet::new(AuthMethod::AutoSession, format!("{scheme} {key}")))
            }
            Err(err) => {
                warn!(error = %err, username, "session key derivation failed, using basic auth");
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Some(CredentialSet::new(AuthMethod::Basic, format!("Basic {encoded}")))
            }
        }
    }

    /// Exchange username/password for a session key.
    ///
    /// A cached key is reused unless `force_refresh` is set. A fresh key is
    /// stored in the cache.
    ///
    /// # Errors
    /// Returns [`AuthError`] when the login call fails, is rejected or
    /// carries no session key.
    pub async fn derive_session_key(
        &self,
        username: &str,
        password: &str,
        cache: &mut SessionCache,
        force_refresh: bool,
    ) -> Result<String, AuthError> {
        if !force_refresh {
            if let Some(key) = cache.session_key() {
                debug!("using cached session key");
                return Ok(key.to_string());
            }
        }

        debug!(username, force_refresh, "requesting session key");
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("username", username)
            .append_pair("password", password)
            .finish();
        let headers = Headers::from([
            ("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string()),
            ("Accept".to_string(), "application/xml".to_string()),
        ]);

        let raw = self
            .transport
            .send(LOGIN_PATH, &body, HttpMethod::Post, &headers)
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;
        let response = normalize(raw, true).map_err(|err| AuthError::InvalidBody(err.to_string()))?;
        if !response.is_success() {
            return Err(AuthError::Rejected { status: response.status });
        }

        let key = extract_session_key(&response.body).ok_or(AuthError::MissingSessionKey)?;
        debug!(session_key = %mask_secret(&key), "obtained session key");
        cache.set_session_key(key.clone());
        Ok(key)
    }
}
