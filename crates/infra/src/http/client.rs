use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use itsi_core::{HeaderSource, RawResponse, ResponseMeta, Transport, TransportError};
use itsi_domain::{ConnectionConfig, Headers, HttpMethod, ItsiError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use tracing::debug;
use url::Url;

use crate::errors::{transport_error, InfraError};

/// HTTP transport bound to one management endpoint.
///
/// Every response the server produces is returned as `Ok`, whatever its
/// status; only failures that yield no response become `TransportError`.
#[derive(Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: Url,
    max_attempts: usize,
    base_backoff: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Start building a transport for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    /// Transport configured from connection settings.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let mut builder = Self::builder(config.base_url.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .accept_invalid_certs(!config.verify_tls);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base URL. Any path prefix on
    /// the base URL is kept.
    fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|err| TransportError::new(format!("invalid request URL: {err}")))
    }

    fn request(
        &self,
        method: HttpMethod,
        url: Url,
        body: &str,
        headers: &Headers,
    ) -> std::result::Result<RequestBuilder, TransportError> {
        let method = match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self.client.request(method, url).headers(header_map(headers)?);
        if !body.is_empty() {
            builder = builder.body(body.to_owned());
        }
        Ok(builder)
    }

    /// Execute the provided request builder, retrying connection failures.
    async fn execute(
        &self,
        builder: RequestBuilder,
    ) -> std::result::Result<Response, TransportError> {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            let cloned_builder = builder.try_clone().ok_or_else(|| {
                TransportError::new("request body cannot be cloned; buffer the body to enable retries")
            })?;
            let request = cloned_builder.build().map_err(|err| transport_error(&err))?;

            let method = request.method().clone();
            let url = request.url().clone();
            debug!(attempt = attempt + 1, %method, path = url.path(), "sending HTTP request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, path = url.path(), %status, "received HTTP response");
                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, path = url.path(), error = %err, "HTTP request failed");

                    if attempt + 1 < attempts && should_retry_error(&err) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Err(transport_error(&err));
                }
            }
        }

        Err(TransportError::new("http transport exhausted retries without producing a result"))
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = u32::try_from(retry_number.saturating_sub(1).min(8)).unwrap_or(8);
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        path: &str,
        body: &str,
        method: HttpMethod,
        headers: &Headers,
    ) -> std::result::Result<RawResponse, TransportError> {
        let url = self.url_for(path)?;
        let response = self.execute(self.request(method, url, body, headers)?).await?;

        let status = response.status().as_u16();
        let response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(|err| transport_error(&err))?;

        Ok(RawResponse::MetaAndStream {
            meta: ResponseMeta {
                status: Some(status),
                headers: HeaderSource::Pairs(response_headers),
                ..ResponseMeta::default()
            },
            body: Box::new(Cursor::new(bytes.to_vec())),
        })
    }
}

fn header_map(headers: &Headers) -> std::result::Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::new(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::new(format!("invalid value for header '{name}': {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    base_url: String,
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
    accept_invalid_certs: bool,
}

impl HttpTransportBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            max_attempts: 1,
            base_backoff: Duration::from_millis(200),
            user_agent: None,
            accept_invalid_certs: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts for connection failures
    /// (initial try + retries). Responses are never retried here.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Skip TLS verification (self-signed management certificates).
    pub fn accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let base_url = Url::parse(&self.base_url).map_err(|err| {
            ItsiError::Config(format!("invalid base URL '{}': {err}", self.base_url))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ItsiError::Config(format!(
                "unsupported URL scheme '{}'",
                base_url.scheme()
            )));
        }

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|err| ItsiError::from(InfraError::from(err)))?;

        Ok(HttpTransport {
            client,
            base_url,
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
        })
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_request() {
        return true;
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        if err.is_connect() {
            return true;
        }
    }
    false
}
