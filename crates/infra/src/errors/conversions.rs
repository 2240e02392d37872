//! Conversions from external infrastructure errors into domain errors.

use itsi_core::TransportError;
use itsi_domain::ItsiError;
use reqwest::Error as HttpError;
use serde_json::Error as JsonError;
use toml::de::Error as TomlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub ItsiError);

impl From<InfraError> for ItsiError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<ItsiError> for InfraError {
    fn from(value: ItsiError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoItsiError {
    fn into_itsi(self) -> ItsiError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → ItsiError */
/* -------------------------------------------------------------------------- */

impl IntoItsiError for HttpError {
    fn into_itsi(self) -> ItsiError {
        let TransportError { status, message } = transport_error(&self);
        match status {
            Some(code @ (401 | 403)) => ItsiError::Auth { status: code, message },
            Some(404) => ItsiError::NotFound(message),
            Some(code) => ItsiError::Transport { status: code, message },
            None if self.is_builder() => ItsiError::Config(message),
            None => ItsiError::Transport { status: 500, message },
        }
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_itsi())
    }
}

/// Describe a reqwest failure as a transport error. Timeouts and connect
/// failures carry no status.
pub fn transport_error(err: &HttpError) -> TransportError {
    if err.is_timeout() {
        return TransportError::new("HTTP request timed out");
    }

    #[cfg(not(target_arch = "wasm32"))]
    if err.is_connect() {
        return TransportError::new(format!("HTTP connection failure: {err}"));
    }

    if let Some(status) = err.status() {
        let code = status.as_u16();
        return TransportError::with_status(
            code,
            format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status")),
        );
    }

    TransportError::new(format!("HTTP request failed: {err}"))
}

/* -------------------------------------------------------------------------- */
/* serde_json / toml → ItsiError */
/* -------------------------------------------------------------------------- */

impl IntoItsiError for JsonError {
    fn into_itsi(self) -> ItsiError {
        ItsiError::Serialization(format!("invalid JSON: {self}"))
    }
}

impl From<JsonError> for InfraError {
    fn from(value: JsonError) -> Self {
        InfraError(value.into_itsi())
    }
}

impl IntoItsiError for TomlError {
    fn into_itsi(self) -> ItsiError {
        ItsiError::Config(format!("Invalid TOML format: {self}"))
    }
}

impl From<TomlError> for InfraError {
    fn from(value: TomlError) -> Self {
        InfraError(value.into_itsi())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
