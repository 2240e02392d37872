//! HTTP primitives shared by the transport, the connection and the request
//! layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ItsiError, Result};

/// Header map. Ordered so request logs and test assertions are stable.
pub type Headers = BTreeMap<String, String>;

/// HTTP verbs used by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ItsiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            other => Err(ItsiError::Validation(format!("unsupported HTTP method: {other}"))),
        }
    }
}

/// Merge `overrides` into `base`. Header names compare case-insensitively and
/// the override wins on collision.
pub fn merge_headers(base: &mut Headers, overrides: &Headers) {
    for (name, value) in overrides {
        base.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        base.insert(name.clone(), value.clone());
    }
}

/// Uniform response triple produced by the response normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<String>) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// Response with no headers, used for locally generated error bodies.
    pub fn bare(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, Headers::new(), body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `ItsiError::Serialization` when the body is not valid JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
