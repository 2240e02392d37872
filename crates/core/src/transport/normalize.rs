//! Response normalizer
//!
//! Converts every [`RawResponse`] shape into one `(status, headers, body)`
//! triple.

use std::io::Read;

use itsi_domain::{ApiResponse, Headers};
use serde_json::Value;
use thiserror::Error;

use super::ports::RawResponse;

/// Status used for response shapes that carry no metadata at all.
const IMPLIED_STATUS: u16 = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// Metadata was present but none of its status sources were set.
    #[error("response metadata carries no status code")]
    MissingStatus,

    #[error("failed to read response body: {0}")]
    Read(String),
}

/// Normalize a transport response.
///
/// Shapes without metadata are treated as `200`. A metadata-carrying
/// response whose status cannot be derived is an error rather than a guess.
///
/// # Errors
/// Returns [`NormalizeError`] when the status is missing or the body stream
/// cannot be read.
pub fn normalize(raw: RawResponse, strip_whitespace: bool) -> Result<ApiResponse, NormalizeError> {
    let (status, headers, body) = match raw {
        RawResponse::Text(text) => (IMPLIED_STATUS, Headers::new(), text),
        RawResponse::Bytes(bytes) => (IMPLIED_STATUS, Headers::new(), decode(bytes)),
        RawResponse::Stream(mut reader) => (IMPLIED_STATUS, Headers::new(), read_body(&mut reader)?),
        RawResponse::MetaAndStream { meta, mut body } => {
            let status = meta.resolved_status().ok_or(NormalizeError::MissingStatus)?;
            let text = read_body(&mut body)?;
            (status, meta.headers.into_headers(), text)
        }
        RawResponse::Value(value) => (IMPLIED_STATUS, Headers::new(), render_value(value)),
    };

    let body = if strip_whitespace { body.trim().to_string() } else { body };
    Ok(ApiResponse::new(status, headers, body))
}

fn read_body(reader: &mut (dyn Read + Send)) -> Result<String, NormalizeError> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).map_err(|err| NormalizeError::Read(err.to_string()))?;
    Ok(decode(buffer))
}

fn decode(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::transport::ports::{HeaderSource, ResponseMeta};

    #[test]
    fn plain_text_defaults_to_200_and_strips() {
        let response = normalize(RawResponse::Text("  {\"a\":1}\n".into()), true).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"a\":1}");
        assert!(response.headers.is_empty());
    }

    #[test]
    fn whitespace_is_kept_when_stripping_disabled() {
        let response = normalize(RawResponse::Text(" padded ".into()), false).unwrap();
        assert_eq!(response.body, " padded ");
    }

    #[test]
    fn bytes_are_decoded_as_utf8() {
        let response = normalize(RawResponse::Bytes("caf\u{e9}".as_bytes().to_vec()), true).unwrap();
        assert_eq!(response.body, "caf\u{e9}");
    }

    #[test]
    fn stream_is_read_to_end() {
        let reader = Cursor::new(b"<response/>".to_vec());
        let response = normalize(RawResponse::Stream(Box::new(reader)), true).unwrap();
        assert_eq!(response.body, "<response/>");
    }

    #[test]
    fn meta_and_stream_uses_first_available_status() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".into(), "application/json".into());
        let raw = RawResponse::MetaAndStream {
            meta: ResponseMeta {
                status: None,
                code: Some(404),
                reported_code: Some(200),
                headers: HeaderSource::Map(headers),
            },
            body: Box::new(Cursor::new(b"{}".to_vec())),
        };

        let response = normalize(raw, true).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn meta_without_status_is_an_error() {
        let raw = RawResponse::MetaAndStream {
            meta: ResponseMeta::default(),
            body: Box::new(Cursor::new(Vec::new())),
        };
        assert_eq!(normalize(raw, true).unwrap_err(), NormalizeError::MissingStatus);
    }

    #[test]
    fn values_are_coerced_to_text() {
        let object = normalize(RawResponse::Value(json!({"k": [1, 2]})), true).unwrap();
        assert_eq!(object.body, r#"{"k":[1,2]}"#);

        let string = normalize(RawResponse::Value(json!("ok")), true).unwrap();
        assert_eq!(string.body, "ok");

        let number = normalize(RawResponse::Value(json!(42)), true).unwrap();
        assert_eq!(number.body, "42");
    }
}
