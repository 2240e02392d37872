//! ITSI resource adapters
//!
//! One [`ResourceStore`](itsi_core::ResourceStore) per resource kind, each
//! owning its endpoint paths, declarative schema and payload quirks, plus
//! the read-only info queries for that kind.

pub mod aggregation_policy;
pub mod correlation_search;
pub mod episode;
pub mod service;

pub use aggregation_policy::{AggregationPolicyStore, AGGREGATION_POLICY};
pub use correlation_search::{CorrelationSearchStore, CORRELATION_SEARCH};
pub use episode::{EpisodeStore, EPISODE};
pub use service::{ServiceStore, SERVICE};

use itsi_domain::{ItsiError, Result};
use serde_json::Value;
use url::form_urlencoded;

use crate::request::{Fetched, Params};

/// Options shared by the list queries. Each adapter maps them onto the
/// parameter names its endpoint understands and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub fields: Vec<String>,
    pub filter: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort_key: Option<String>,
    pub sort_dir: Option<u8>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort(mut self, key: impl Into<String>, descending: bool) -> Self {
        self.sort_key = Some(key.into());
        self.sort_dir = Some(u8::from(!descending));
        self
    }

    /// Comma-joined field list with duplicates removed, `None` when empty.
    pub fn fields_param(&self) -> Option<String> {
        join_fields(&self.fields)
    }

    /// Limit as a parameter value; zero means no limit.
    fn limit_param(&self) -> Value {
        self.limit.filter(|limit| *limit > 0).map_or(Value::Null, Value::from)
    }
}

/// Flatten a list response into its entries.
///
/// Accepts an `entry` list (or single entry), a `results` list, a bare list
/// or a single non-empty object.
pub fn normalize_to_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.clone(),
        Value::Object(object) if object.is_empty() => Vec::new(),
        Value::Object(object) => match (object.get("entry"), object.get("results")) {
            (Some(Value::Array(entries)), _) => entries.clone(),
            (Some(entry @ Value::Object(_)), _) => vec![entry.clone()],
            (_, Some(Value::Array(results))) => results.clone(),
            _ => vec![data.clone()],
        },
        _ => Vec::new(),
    }
}

/// Encode a path segment with `+` for spaces.
pub(crate) fn quote_plus(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Encode a path segment with `%20` for spaces.
pub(crate) fn quote_path(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Items of a bare-list reply. The request layer wraps top-level arrays
/// under `results`; anything else yields no items.
pub(crate) fn list_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut wrapped) => match wrapped.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

pub(crate) fn join_fields(fields: &[String]) -> Option<String> {
    let mut unique: Vec<&str> = Vec::new();
    for field in fields {
        if !unique.contains(&field.as_str()) {
            unique.push(field);
        }
    }
    (!unique.is_empty()).then(|| unique.join(","))
}

pub(crate) fn fields_params(fields: &[String]) -> Params {
    Params::new().with("fields", join_fields(fields).map_or(Value::Null, Value::from))
}

/// Body of a mutation that must hit an existing resource.
pub(crate) fn require_found(fetched: Option<Fetched>, kind: &str, id: &str) -> Result<Value> {
    fetched
        .map(|fetched| fetched.body)
        .ok_or_else(|| ItsiError::NotFound(format!("{kind} '{id}' not found")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn normalizes_every_list_shape() {
        assert_eq!(normalize_to_list(&json!({"entry": [{"a": 1}, {"a": 2}]})).len(), 2);
        assert_eq!(normalize_to_list(&json!({"entry": {"a": 1}})), vec![json!({"a": 1})]);
        assert_eq!(normalize_to_list(&json!({"results": [1, 2, 3]})).len(), 3);
        assert_eq!(normalize_to_list(&json!([{"a": 1}])), vec![json!({"a": 1})]);
        assert_eq!(normalize_to_list(&json!({"title": "x"})), vec![json!({"title": "x"})]);
        assert!(normalize_to_list(&json!("text")).is_empty());
        assert!(normalize_to_list(&json!({})).is_empty());
    }

    #[test]
    fn list_items_unwraps_results_only() {
        assert_eq!(list_items(json!({"results": [1, 2]})), vec![json!(1), json!(2)]);
        assert_eq!(list_items(json!([3])), vec![json!(3)]);
        assert!(list_items(json!({"entry": [1]})).is_empty());
    }

    #[test]
    fn path_segments_encode_spaces_differently() {
        assert_eq!(quote_plus("My Search/1"), "My+Search%2F1");
        assert_eq!(quote_path("My Search/1"), "My%20Search%2F1");
    }

    #[test]
    fn fields_are_deduplicated() {
        let options = ListOptions::new().fields(["title", "_key", "title"]);
        assert_eq!(options.fields_param().as_deref(), Some("title,_key"));
        assert_eq!(ListOptions::new().fields_param(), None);
    }

    #[test]
    fn zero_limit_is_not_sent() {
        assert_eq!(ListOptions::new().limit(0).limit_param(), Value::Null);
        assert_eq!(ListOptions::new().limit(25).limit_param(), json!(25));
    }
}
