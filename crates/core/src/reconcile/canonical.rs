//! Canonicalizer
//!
//! Projects desired parameters and server documents onto the same flat,
//! comparison-ready shape.

use serde_json::{Map, Value};

use itsi_domain::CanonicalResource;

use super::schema::{ExtraFields, FieldRule, ResourceSchema};

const ENTRY_KEY: &str = "entry";
const CONTENT_KEY: &str = "content";
const META_KEY: &str = "_meta";

/// A document split into its comparable content and envelope metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub content: Map<String, Value>,
    pub meta: Map<String, Value>,
}

impl Envelope {
    /// Look a key up in the content first, then in the metadata.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.content.get(key).or_else(|| self.meta.get(key))
    }

    /// Content with metadata nested under `_meta`.
    pub fn into_flat(self) -> Value {
        let mut flat = self.content;
        flat.insert(META_KEY.to_string(), Value::Object(self.meta));
        Value::Object(flat)
    }

    /// Content with metadata merged in at the top level. Content keys win.
    pub fn into_merged(self) -> Value {
        let mut merged = self.meta;
        merged.extend(self.content);
        Value::Object(merged)
    }
}

/// Unwrap `entry[0].content`, `entry.content` or `content` envelopes.
///
/// Sibling keys of the envelope land in `meta`. An already-flat document
/// is returned as content, with any `_meta` object moved to `meta`. Non-object
/// documents and empty entry lists yield an empty envelope.
pub fn unwrap_envelope(document: &Value) -> Envelope {
    let Some(object) = document.as_object() else {
        return Envelope::default();
    };

    if let Some(entry) = object.get(ENTRY_KEY) {
        let inner = match entry {
            Value::Array(entries) => entries.first(),
            Value::Object(_) => Some(entry),
            _ => None,
        };
        let mut envelope = inner.map(unwrap_envelope).unwrap_or_default();
        absorb_siblings(&mut envelope.meta, object, ENTRY_KEY);
        return envelope;
    }

    if let Some(Value::Object(content)) = object.get(CONTENT_KEY) {
        let mut envelope = Envelope { content: content.clone(), meta: Map::new() };
        absorb_siblings(&mut envelope.meta, object, CONTENT_KEY);
        return envelope;
    }

    let mut content = object.clone();
    let meta = match content.remove(META_KEY) {
        Some(Value::Object(meta)) => meta,
        _ => Map::new(),
    };
    Envelope { content, meta }
}

fn absorb_siblings(meta: &mut Map<String, Value>, object: &Map<String, Value>, wrapper: &str) {
    for (key, value) in object {
        if key != wrapper && !meta.contains_key(key) {
            meta.insert(key.clone(), value.clone());
        }
    }
}

/// Canonicalize `document` against `schema`.
pub fn canonicalize(document: &Value, schema: &ResourceSchema) -> CanonicalResource {
    let Envelope { content, meta } = unwrap_envelope(document);
    let mut canonical = CanonicalResource::new();
    canonical.meta = meta.into_iter().collect();

    for spec in schema.fields {
        let value = match spec.rule {
            FieldRule::TimeWindow { short } => content.get(spec.name).or_else(|| content.get(short)),
            _ => content.get(spec.name),
        };
        if let Some(value) = value {
            canonical.insert(spec.name, canonical_value(spec.rule, value));
        }
    }

    for (key, value) in &content {
        if key.starts_with('_') {
            canonical.meta.insert(key.clone(), value.clone());
            continue;
        }
        let keep = match schema.extra_fields {
            ExtraFields::Ignore => false,
            ExtraFields::Open | ExtraFields::Managed(_) => !schema.is_known(key),
        };
        if keep {
            canonical.insert(key.clone(), value.clone());
        }
    }

    canonical
}

fn canonical_value(rule: FieldRule, value: &Value) -> Value {
    match rule {
        FieldRule::BoolInt => match bool_like(value) {
            Some(flag) => Value::from(i64::from(flag)),
            None => value.clone(),
        },
        FieldRule::BoolString => match bool_like(value) {
            Some(flag) => Value::from(if flag { "1" } else { "0" }),
            None => value.clone(),
        },
        FieldRule::Structural => parse_embedded_json(value),
        // A bare list is shorthand for the tag key alone
        FieldRule::TagSet { key, .. } if value.is_array() => {
            let mut wrapped = Map::new();
            wrapped.insert(key.to_string(), value.clone());
            Value::Object(wrapped)
        }
        FieldRule::Verbatim
        | FieldRule::TimeWindow { .. }
        | FieldRule::TagSet { .. }
        | FieldRule::CreateOnly => value.clone(),
    }
}

/// Interpret a boolean-like value. Unrecognized values yield `None`.
pub fn bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_embedded_json(value: &Value) -> Value {
    if let Value::String(text) = value {
        if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
    }
    value.clone()
}
