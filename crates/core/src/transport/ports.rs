//! Port interface for the network transport
//!
//! The transport performs the actual HTTP exchange. The core only consumes
//! `send(path, body, method, headers)` and never sees a socket.

use std::fmt;
use std::io::Read;

use async_trait::async_trait;
use itsi_domain::{Headers, HttpMethod};
use serde_json::Value;
use thiserror::Error;

/// Trait for performing one HTTP exchange.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; `Err` is reserved for exchanges that produced no
/// usable response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `path` (relative to the transport's base URL).
    async fn send(
        &self,
        path: &str,
        body: &str,
        method: HttpMethod,
        headers: &Headers,
    ) -> Result<RawResponse, TransportError>;
}

/// Failure raised by a transport, optionally carrying an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    /// Status carried by the error, 500 when none was attached.
    pub fn status_or_default(&self) -> u16 {
        self.status.unwrap_or(500)
    }
}

/// Response shapes a transport may hand back.
pub enum RawResponse {
    /// Body already decoded as text
    Text(String),
    /// Raw body bytes, decoded as UTF-8
    Bytes(Vec<u8>),
    /// Readable body with no metadata
    Stream(Box<dyn Read + Send>),
    /// Response metadata plus a readable body
    MetaAndStream { meta: ResponseMeta, body: Box<dyn Read + Send> },
    /// Arbitrary value, rendered as text (objects and arrays as JSON)
    Value(Value),
}

impl RawResponse {
    /// Metadata-and-body response with an explicit status.
    pub fn with_status(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self::MetaAndStream {
            meta: ResponseMeta { status: Some(status), headers: HeaderSource::Map(headers), ..ResponseMeta::default() },
            body: Box::new(std::io::Cursor::new(body.into())),
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::MetaAndStream { meta, .. } => {
                f.debug_struct("MetaAndStream").field("meta", meta).finish_non_exhaustive()
            }
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

/// Response metadata. The status is taken from the first of `status`,
/// `code` and `reported_code` that is set.
#[derive(Debug, Default)]
pub struct ResponseMeta {
    pub status: Option<u16>,
    pub code: Option<u16>,
    pub reported_code: Option<u16>,
    pub headers: HeaderSource,
}

impl ResponseMeta {
    pub fn resolved_status(&self) -> Option<u16> {
        self.status.or(self.code).or(self.reported_code)
    }
}

/// Where response headers come from.
#[derive(Debug, Default)]
pub enum HeaderSource {
    #[default]
    None,
    Map(Headers),
    Pairs(Vec<(String, String)>),
    /// Unparsed `Name: value` header block
    Raw(Vec<u8>),
}

impl HeaderSource {
    /// Flatten into a header map. An unreadable header block yields an empty
    /// map.
    pub fn into_headers(self) -> Headers {
        match self {
            Self::None => Headers::new(),
            Self::Map(headers) => headers,
            Self::Pairs(pairs) => pairs.into_iter().collect(),
            Self::Raw(bytes) => parse_raw_headers(&bytes).unwrap_or_default(),
        }
    }
}

fn parse_raw_headers(bytes: &[u8]) -> Option<Headers> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut headers = Headers::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        let (name, value) = line.split_once(':')?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Some(headers)
}
