//! Test doubles for the transport and resource-store ports
//!
//! Available to downstream crates through the `test-utils` feature.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use itsi_domain::{Headers, HttpMethod, ItsiError, Result};
use serde_json::Value;

use crate::reconcile::ports::{Lookup, ResourceRef, ResourceStore};
use crate::reconcile::schema::{ResourceSchema, UpdateMode};
use crate::transport::ports::{HeaderSource, RawResponse, ResponseMeta, Transport, TransportError};

type ReplyQueue = Arc<Mutex<VecDeque<ScriptedReply>>>;
type CallLog = Arc<Mutex<Vec<RecordedCall>>>;

/// One scripted transport outcome
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Response { status: u16, headers: Headers, body: String },
    Error(TransportError),
}

/// A captured `send` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub path: String,
    pub method: HttpMethod,
    pub body: String,
    pub headers: Headers,
}

impl RecordedCall {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Transport that replays a queue of scripted outcomes and records every
/// call. An exhausted queue answers with a transport error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    replies: ReplyQueue,
    calls: CallLog,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, headers: Headers, body: impl Into<String>) -> &Self {
        // SAFETY: Mutex poisoning is acceptable in test mocks - a panicking
        // test fails anyway
        self.replies.lock().unwrap().push_back(ScriptedReply::Response {
            status,
            headers,
            body: body.into(),
        });
        self
    }

    pub fn push_text(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push_response(status, Headers::new(), body)
    }

    pub fn push_json(&self, status: u16, body: &Value) -> &Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type".into(), "application/json".into());
        self.push_response(status, headers, body.to_string())
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.replies.lock().unwrap().push_back(ScriptedReply::Error(error));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        path: &str,
        body: &str,
        method: HttpMethod,
        headers: &Headers,
    ) -> std::result::Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            method,
            body: body.to_string(),
            headers: headers.clone(),
        });

        match self.replies.lock().unwrap().pop_front() {
            Some(ScriptedReply::Response { status, headers, body }) => {
                Ok(RawResponse::MetaAndStream {
                    meta: ResponseMeta {
                        status: Some(status),
                        headers: HeaderSource::Map(headers),
                        ..ResponseMeta::default()
                    },
                    body: Box::new(Cursor::new(body.into_bytes())),
                })
            }
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(TransportError::new(format!("no scripted reply for {method} {path}"))),
        }
    }
}

/// Call recorded by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get(String),
    FindByTitle(String),
    Create(Value),
    Update { id: String, payload: Value },
    Delete(String),
}

/// In-memory resource store keyed by `_key`
#[derive(Debug, Clone)]
pub struct MemoryStore {
    schema: &'static ResourceSchema,
    documents: BTreeMap<String, Value>,
    calls: Vec<StoreCall>,
    next_id: usize,
}

impl MemoryStore {
    pub fn new(schema: &'static ResourceSchema) -> Self {
        Self { schema, documents: BTreeMap::new(), calls: Vec::new(), next_id: 1 }
    }

    /// Seed a document; `_key` is set to `key`.
    pub fn with_document(mut self, key: &str, mut document: Value) -> Self {
        if let Some(object) = document.as_object_mut() {
            object.insert("_key".into(), Value::from(key));
        }
        self.documents.insert(key.to_string(), document);
        self
    }

    pub fn document(&self, key: &str) -> Option<&Value> {
        self.documents.get(key)
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Number of create, update and delete calls
    pub fn mutation_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                matches!(call, StoreCall::Create(_) | StoreCall::Update { .. } | StoreCall::Delete(_))
            })
            .count()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn schema(&self) -> &'static ResourceSchema {
        self.schema
    }

    async fn get(&mut self, id: &str) -> Result<Option<Value>> {
        self.calls.push(StoreCall::Get(id.to_string()));
        Ok(self.documents.get(id).cloned())
    }

    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>> {
        self.calls.push(StoreCall::FindByTitle(title.to_string()));
        Ok(self
            .documents
            .values()
            .filter(|doc| doc.get("title").and_then(Value::as_str) == Some(title))
            .cloned()
            .collect())
    }

    async fn create(&mut self, desired: &Value) -> Result<Value> {
        self.calls.push(StoreCall::Create(desired.clone()));
        let key = format!("key-{}", self.next_id);
        self.next_id += 1;

        let mut document = desired.clone();
        if let Some(object) = document.as_object_mut() {
            object.insert("_key".into(), Value::from(key.clone()));
        }
        self.documents.insert(key.clone(), document);
        Ok(serde_json::json!({ "_key": key }))
    }

    async fn update(
        &mut self,
        reference: &ResourceRef,
        payload: Value,
        _current: &Value,
    ) -> Result<Value> {
        self.calls.push(StoreCall::Update { id: reference.id.clone(), payload: payload.clone() });
        let Some(document) = self.documents.get_mut(&reference.id) else {
            return Err(ItsiError::NotFound(format!("{} '{}'", self.schema.kind, reference.id)));
        };

        match (self.schema.update_mode, payload) {
            (UpdateMode::Sparse, Value::Object(fields)) => {
                if let Some(object) = document.as_object_mut() {
                    for (field, value) in fields {
                        if value.is_null() {
                            object.remove(&field);
                        } else {
                            object.insert(field, value);
                        }
                    }
                }
            }
            (_, payload) => *document = payload,
        }
        Ok(serde_json::json!({ "_key": reference.id }))
    }

    async fn delete(&mut self, reference: &ResourceRef) -> Result<Value> {
        self.calls.push(StoreCall::Delete(reference.id.clone()));
        match self.documents.remove(&reference.id) {
            Some(_) => Ok(Value::Object(serde_json::Map::new())),
            None => Err(ItsiError::NotFound(format!("{} '{}'", self.schema.kind, reference.id))),
        }
    }

    fn identify(&self, document: &Value, _lookup: &Lookup) -> Option<ResourceRef> {
        document.get("_key").and_then(Value::as_str).map(ResourceRef::key)
    }
}
