//! Connection configuration structures

use serde::{Deserialize, Serialize};

/// Default session scheme used in `Authorization: <scheme> <key>`.
pub const DEFAULT_SESSION_SCHEME: &str = "Splunk";

/// Connection settings for one ITSI management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the management port, e.g. `https://splunk.example.com:8089`
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub auth: AuthOptions,
}

impl ConnectionConfig {
    /// Configuration with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            verify_tls: default_verify_tls(),
            user_agent: None,
            auth: AuthOptions::default(),
        }
    }
}

/// Credential options, consulted in fixed priority order by the resolver.
///
/// Debug output never includes secret values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Scheme for session keys (`Splunk` unless overridden)
    #[serde(default = "default_session_scheme")]
    pub session_scheme: String,
}

impl AuthOptions {
    /// Options authenticating with a static bearer token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), ..Self::empty() }
    }

    /// Options authenticating with a pre-issued session key.
    pub fn with_session_key(key: impl Into<String>) -> Self {
        Self { session_key: Some(key.into()), ..Self::empty() }
    }

    /// Options authenticating with username/password.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::empty()
        }
    }

    /// No credentials at all.
    pub fn empty() -> Self {
        Self {
            token: None,
            session_key: None,
            username: None,
            password: None,
            session_scheme: default_session_scheme(),
        }
    }

    /// Non-empty token, if configured.
    pub fn token(&self) -> Option<&str> {
        non_empty(self.token.as_deref())
    }

    /// Non-empty explicit session key, if configured.
    pub fn session_key(&self) -> Option<&str> {
        non_empty(self.session_key.as_deref())
    }

    /// Username and password, only when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (non_empty(self.username.as_deref()), non_empty(self.password.as_deref())) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Scheme for session-key headers, falling back to the default when blank.
    pub fn scheme(&self) -> &str {
        if self.session_scheme.trim().is_empty() {
            DEFAULT_SESSION_SCHEME
        } else {
            &self.session_scheme
        }
    }
}

impl std::fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthOptions")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("session_key", &self.session_key.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("session_scheme", &self.session_scheme)
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_verify_tls() -> bool {
    true
}

fn default_session_scheme() -> String {
    DEFAULT_SESSION_SCHEME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"base_url": "https://itsi:8089"}"#).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.verify_tls);
        assert_eq!(config.auth.scheme(), "Splunk");
        assert!(config.auth.token().is_none());
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let options = AuthOptions {
            token: Some(String::new()),
            username: Some("admin".into()),
            password: Some(String::new()),
            ..AuthOptions::empty()
        };
        assert!(options.token().is_none());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let options = AuthOptions {
            token: Some("tok-secret".into()),
            password: Some("hunter2".into()),
            username: Some("admin".into()),
            ..AuthOptions::empty()
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("tok-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("admin"));
    }
}
