//! Authentication data model

use serde::{Deserialize, Serialize};

use super::http::Headers;

/// Authentication method, listed in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>`
    Token,
    /// Session key supplied in configuration
    ExplicitSession,
    /// Session key derived from username/password via the login endpoint
    AutoSession,
    /// `Authorization: Basic base64(user:pass)`
    Basic,
}

impl AuthMethod {
    /// Session-based methods can be refreshed after a 401; token and basic
    /// auth failures are terminal.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, Self::ExplicitSession | Self::AutoSession)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::ExplicitSession => "explicit_session",
            Self::AutoSession => "auto_session",
            Self::Basic => "basic",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a credential came straight from configuration or was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOrigin {
    Explicit,
    Derived,
}

/// The single active credential for a request.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    method: AuthMethod,
    header_value: String,
    origin: CredentialOrigin,
}

impl CredentialSet {
    pub fn new(method: AuthMethod, header_value: impl Into<String>) -> Self {
        let origin = match method {
            AuthMethod::AutoSession => CredentialOrigin::Derived,
            AuthMethod::Token | AuthMethod::ExplicitSession | AuthMethod::Basic => {
                CredentialOrigin::Explicit
            }
        };
        Self { method, header_value: header_value.into(), origin }
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Full `Authorization` header value, scheme included.
    pub fn header_value(&self) -> &str {
        &self.header_value
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("method", &self.method)
            .field("header_value", &"<redacted>")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Per-connection cached authentication state.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCacheEntry {
    pub session_key: Option<String>,
    pub headers: Option<Headers>,
}

impl SessionCacheEntry {
    pub fn is_empty(&self) -> bool {
        self.session_key.is_none() && self.headers.is_none()
    }
}

impl std::fmt::Debug for SessionCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCacheEntry")
            .field("session_key", &self.session_key.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.as_ref().map(Headers::len))
            .finish()
    }
}
