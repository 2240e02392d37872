//! Request layer used by the resource adapters
//!
//! Builds query strings and bodies, sends through a [`RequestChannel`] and
//! parses the reply into JSON. [`ItsiRequest::request`] never fails: errors
//! come back as a status plus an `{"error": ...}` object.
//! [`ItsiRequest::fetch`] is the strict variant that turns 404 into `None`
//! and every other non-2xx status into an error.

use async_trait::async_trait;
use itsi_core::Transport;
use itsi_domain::{ApiResponse, Headers, HttpMethod, ItsiError, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use crate::connection::{ItsiConnection, RequestOptions};

/// Key under which response headers are attached to parsed reply data.
pub const RESPONSE_HEADERS_KEY: &str = "_response_headers";

/// Anything that can carry one request to the API and hand back the
/// normalized response.
#[async_trait]
pub trait RequestChannel: Send {
    async fn send_request(&mut self, path: &str, options: RequestOptions) -> Result<ApiResponse>;
}

#[async_trait]
impl<T: Transport> RequestChannel for ItsiConnection<T> {
    async fn send_request(&mut self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        Ok(ItsiConnection::send_request(self, path, options).await)
    }
}

#[async_trait]
impl<C: RequestChannel + ?Sized> RequestChannel for &mut C {
    async fn send_request(&mut self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        (**self).send_request(path, options).await
    }
}

/// Ordered query parameters. Null and empty-string values are dropped when
/// encoded; arrays expand into repeated keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Value)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.push((key.into(), value.into()));
    }

    /// Append every entry of `other` whose value is not null.
    pub fn extend_non_null(&mut self, other: Params) {
        self.0.extend(other.0.into_iter().filter(|(_, value)| !value.is_null()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// URL-encoded query string, `None` when nothing survives filtering.
    pub fn encode(&self) -> Option<String> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (key, value) in &self.0 {
            for rendered in expand(value) {
                serializer.append_pair(key, &rendered);
                any = true;
            }
        }
        any.then(|| serializer.finish())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

/// Request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    #[default]
    None,
}

/// One request to send through [`ItsiRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: HttpMethod,
    pub path: String,
    pub params: Params,
    pub payload: Payload,
    pub use_form: bool,
    pub headers: Headers,
}

impl Call {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            payload: Payload::None,
            use_form: false,
            headers: Headers::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Ask for JSON output explicitly, ahead of any other parameter.
    pub fn json_output(mut self) -> Self {
        self.params.0.insert(0, ("output_mode".to_string(), Value::from("json")));
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push(key, value);
        self
    }

    /// Add parameters, skipping null values.
    pub fn params(mut self, params: Params) -> Self {
        self.params.extend_non_null(params);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.payload = Payload::Json(body);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn form(mut self, enabled: bool) -> Self {
        self.use_form = enabled;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn target(&self) -> String {
        match self.params.encode() {
            Some(query) => {
                let separator = if self.path.contains('?') { '&' } else { '?' };
                format!("{}{separator}{query}", self.path)
            }
            None => self.path.clone(),
        }
    }

    fn into_options(self) -> (String, RequestOptions) {
        let target = self.target();
        let mut headers = Headers::new();
        let body = match self.payload {
            Payload::Json(Value::Object(fields)) if self.use_form => {
                headers.insert(
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                );
                headers.insert("Accept".to_string(), "application/json".to_string());
                form_body(&fields)
            }
            Payload::Json(Value::Null) | Payload::None => String::new(),
            Payload::Json(Value::String(text)) | Payload::Text(text) => text,
            Payload::Json(value) => value.to_string(),
        };

        let options = RequestOptions::new(self.method).body(body).headers(headers).headers(self.headers);
        (target, options)
    }
}

/// Parsed reply: status plus JSON data, with response headers attached
/// under [`RESPONSE_HEADERS_KEY`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub data: Value,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Successful strict response.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub status: u16,
    pub headers: Headers,
    pub body: Value,
}

/// Request helper bound to one channel.
#[derive(Debug)]
pub struct ItsiRequest<C> {
    channel: C,
}

impl<C: RequestChannel> ItsiRequest<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Send `call` and parse the reply. Never fails.
    #[instrument(skip_all, fields(method = %call.method, path = %call.path))]
    pub async fn request(&mut self, call: Call) -> ApiReply {
        match self.exchange(call).await {
            Ok(response) => {
                let mut data = parse_response_body(&response.body);
                attach_headers(&mut data, response.headers);
                ApiReply { status: response.status, data }
            }
            Err(err) => {
                warn!(error = %err, "request failed");
                let (status, data) = classify_failure(&err.to_string());
                ApiReply { status, data }
            }
        }
    }

    /// Strict request: 404 yields `None`, any other non-2xx is an error.
    ///
    /// # Errors
    /// Returns `ItsiError::Auth` for 401/403, `ItsiError::Api` for other
    /// non-2xx statuses, and whatever the channel fails with.
    #[instrument(skip_all, fields(method = %call.method, path = %call.path))]
    pub async fn fetch(&mut self, call: Call) -> Result<Option<Fetched>> {
        let response = self.exchange(call).await?;
        if response.status == 404 {
            debug!("resource not found");
            return Ok(None);
        }

        let body = parse_response_body(&response.body);
        if !response.is_success() {
            return Err(ItsiError::from_status(response.status, body));
        }
        Ok(Some(Fetched { status: response.status, headers: response.headers, body }))
    }

    pub async fn get(&mut self, path: &str, params: Params) -> ApiReply {
        self.request(Call::get(path).params(params)).await
    }

    pub async fn post(&mut self, path: &str, params: Params, payload: Payload, use_form: bool) -> ApiReply {
        self.request(Call::post(path).params(params).payload(payload).form(use_form)).await
    }

    pub async fn delete(&mut self, path: &str, params: Params) -> ApiReply {
        self.request(Call::delete(path).params(params)).await
    }

    /// GET with `output_mode=json` plus every non-null query parameter.
    pub async fn get_by_path(&mut self, path: &str, query: Params) -> ApiReply {
        self.request(Call::get(path).json_output().params(query)).await
    }

    /// DELETE with `output_mode=json`.
    pub async fn delete_by_path(&mut self, path: &str) -> ApiReply {
        self.request(Call::delete(path).json_output()).await
    }

    /// POST with `output_mode=json` plus every non-null query parameter.
    pub async fn create_update(
        &mut self,
        path: &str,
        data: Payload,
        query: Params,
        use_form: bool,
    ) -> ApiReply {
        self.request(Call::post(path).json_output().params(query).payload(data).form(use_form)).await
    }

    async fn exchange(&mut self, call: Call) -> Result<ApiResponse> {
        let (target, options) = call.into_options();
        debug!(target = %target, "sending request");
        self.channel.send_request(&target, options).await
    }
}

/// Parse a response body into a JSON object.
///
/// Empty bodies give `{}`, arrays are wrapped as `{"results": [...]}`, other
/// JSON scalars and non-JSON text as `{"raw_response": ...}`.
pub fn parse_response_body(body: &str) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => json!({ "results": items }),
        Ok(object @ Value::Object(_)) => object,
        Ok(scalar) => json!({ "raw_response": scalar }),
        Err(_) => json!({ "raw_response": body }),
    }
}

/// Map a failure message onto a status and error object.
pub fn classify_failure(message: &str) -> (u16, Value) {
    if message.contains("401") || message.contains("Unauthorized") {
        (401, json!({ "error": "Authentication failed" }))
    } else if message.contains("404") || message.contains("Not Found") {
        (404, json!({ "error": "Resource not found" }))
    } else {
        (500, json!({ "error": message }))
    }
}

fn attach_headers(data: &mut Value, headers: Headers) {
    let headers: Map<String, Value> =
        headers.into_iter().map(|(name, value)| (name, Value::String(value))).collect();
    match data {
        Value::Object(fields) => {
            fields.insert(RESPONSE_HEADERS_KEY.to_string(), Value::Object(headers));
        }
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("results".to_string(), other.take());
            wrapped.insert(RESPONSE_HEADERS_KEY.to_string(), Value::Object(headers));
            *other = Value::Object(wrapped);
        }
    }
}

fn form_body(fields: &Map<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        for rendered in expand(value) {
            serializer.append_pair(key, &rendered);
        }
    }
    serializer.finish()
}

/// Render a parameter value; arrays expand to one entry per element.
fn expand(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(render).collect(),
        other => render(other).into_iter().collect(),
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use itsi_core::testing::ScriptedTransport;
    use itsi_domain::AuthOptions;

    use super::*;

    fn request() -> (ItsiRequest<ItsiConnection<ScriptedTransport>>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let connection = ItsiConnection::new(transport.clone(), AuthOptions::with_token("tok"));
        (ItsiRequest::new(connection), transport)
    }

    struct FailingChannel(ItsiError);

    #[async_trait]
    impl RequestChannel for FailingChannel {
        async fn send_request(&mut self, _path: &str, _options: RequestOptions) -> Result<ApiResponse> {
            Err(self.0.clone())
        }
    }

    #[test]
    fn parses_every_body_shape() {
        assert_eq!(parse_response_body(""), json!({}));
        assert_eq!(parse_response_body("[1,2]"), json!({"results": [1, 2]}));
        assert_eq!(parse_response_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_response_body("42"), json!({"raw_response": 42}));
        assert_eq!(parse_response_body("<html/>"), json!({"raw_response": "<html/>"}));
    }

    #[test]
    fn classifies_failure_messages() {
        assert_eq!(classify_failure("HTTP 401 Unauthorized").0, 401);
        assert_eq!(classify_failure("Unauthorized").1, json!({"error": "Authentication failed"}));
        assert_eq!(classify_failure("404 Not Found").1, json!({"error": "Resource not found"}));
        assert_eq!(classify_failure("boom"), (500, json!({"error": "boom"})));
    }

    #[test]
    fn query_drops_null_and_empty_values() {
        let params: Params = vec![
            ("count", json!(0)),
            ("filter", json!("")),
            ("offset", Value::Null),
            ("fields", json!(["a", "b"])),
            ("flag", json!(false)),
            ("search", json!("title=a b")),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            params.encode().as_deref(),
            Some("count=0&fields=a&fields=b&flag=false&search=title%3Da+b")
        );
        assert_eq!(Params::new().with("x", Value::Null).encode(), None);
    }

    #[test]
    fn form_encoding_applies_to_objects_only() {
        let (target, options) = Call::post("/x").json(json!({"n": 1, "name": "a b"})).form(true).into_options();
        assert_eq!(target, "/x");
        assert_eq!(options.body, "n=1&name=a+b");
        assert_eq!(
            options.headers.get("Content-Type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );

        let (_, options) = Call::post("/x").json(json!([1, 2])).form(true).into_options();
        assert_eq!(options.body, "[1,2]");
        assert!(options.headers.is_empty());

        let (_, options) = Call::post("/x").payload(Payload::Text("raw".into())).into_options();
        assert_eq!(options.body, "raw");
    }

    #[tokio::test]
    async fn request_attaches_response_headers() {
        let (mut request, transport) = request();
        transport.push_json(200, &json!([{"_key": "a"}]));

        let reply = request.get("/things", Params::new().with("count", 5)).await;

        assert_eq!(reply.status, 200);
        assert_eq!(reply.data["results"][0]["_key"], "a");
        assert_eq!(reply.data[RESPONSE_HEADERS_KEY]["Content-Type"], "application/json");
        assert_eq!(transport.calls()[0].path, "/things?count=5&output_mode=json");
    }

    #[tokio::test]
    async fn by_path_helpers_default_to_json_output() {
        let (mut request, transport) = request();
        transport.push_json(200, &json!({}));
        transport.push_json(200, &json!({}));
        transport.push_json(201, &json!({"_key": "new"}));

        request.get_by_path("/a", Params::new().with("fields", "title").with("skip", Value::Null)).await;
        request.delete_by_path("/b").await;
        let created = request
            .create_update("/c", Payload::Json(json!({"title": "T"})), Params::new(), false)
            .await;

        let calls = transport.calls();
        assert_eq!(calls[0].path, "/a?output_mode=json&fields=title");
        assert_eq!(calls[1].path, "/b?output_mode=json");
        assert_eq!(calls[1].method, HttpMethod::Delete);
        assert_eq!(calls[2].path, "/c?output_mode=json");
        assert_eq!(calls[2].body, r#"{"title":"T"}"#);
        assert_eq!(created.status, 201);
        assert_eq!(created.data["_key"], "new");
    }

    #[tokio::test]
    async fn fetch_maps_statuses() {
        let (mut request, transport) = request();
        transport.push_text(404, "");
        transport.push_json(500, &json!({"messages": [{"text": "boom"}]}));
        transport.push_json(200, &json!({"title": "X"}));

        assert_eq!(request.fetch(Call::get("/missing")).await.unwrap(), None);

        let err = request.fetch(Call::get("/broken")).await.unwrap_err();
        assert!(matches!(err, ItsiError::Api { status: 500, .. }));

        let fetched = request.fetch(Call::get("/ok")).await.unwrap().unwrap();
        assert_eq!(fetched.body, json!({"title": "X"}));
        assert!(fetched.body.get(RESPONSE_HEADERS_KEY).is_none());
    }

    #[tokio::test]
    async fn channel_failures_are_classified() {
        let mut request =
            ItsiRequest::new(FailingChannel(ItsiError::Transport { status: 401, message: "Unauthorized".into() }));
        let reply = request.get("/x", Params::new()).await;
        assert_eq!(reply, ApiReply { status: 401, data: json!({"error": "Authentication failed"}) });

        let mut request = ItsiRequest::new(FailingChannel(ItsiError::Internal("disk on fire".into())));
        let reply = request.get("/x", Params::new()).await;
        assert_eq!(reply.status, 500);
        assert_eq!(reply.data["error"], "Internal error: disk on fire");
    }
}
