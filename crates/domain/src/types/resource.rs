//! Reconciliation data model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat, comparison-ready projection of a resource document.
///
/// `fields` holds the comparable attributes; `meta` keeps envelope siblings
/// (`name`, `id`, `links`, `acl`) that never take part in a diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResource {
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl CanonicalResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Copy of this resource with `patch` applied on top. A `null` patch
    /// value removes the field.
    pub fn with_patch(&self, patch: &Patch) -> Self {
        let mut next = self.clone();
        for (field, value) in patch.iter() {
            if value.is_null() {
                next.fields.remove(field);
            } else {
                next.fields.insert(field.clone(), value.clone());
            }
        }
        next
    }

    /// Comparable fields as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl FromIterator<(String, Value)> for CanonicalResource {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect(), meta: BTreeMap::new() }
    }
}

/// Minimal set of field changes. A `null` value marks a field for removal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(BTreeMap<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>())
    }
}

impl FromIterator<(String, Value)> for Patch {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One human-readable diff line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.before, self.after)
    }
}

/// What the reconciler did (or would do in dry-run mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    NoChange,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChange => "no_change",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one reconciliation. Created per invocation, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub changed: bool,
    pub operation: Operation,
    pub before: CanonicalResource,
    pub after: CanonicalResource,
    pub diff: Patch,
    pub changes: Vec<FieldChange>,
    /// Parsed server response for applied mutations; `None` for no-ops and
    /// dry runs.
    pub response: Option<Value>,
}

impl ReconcileResult {
    /// Result for a reconciliation that found nothing to do.
    pub fn unchanged(current: CanonicalResource) -> Self {
        Self {
            changed: false,
            operation: Operation::NoChange,
            before: current.clone(),
            after: current,
            diff: Patch::new(),
            changes: Vec::new(),
            response: None,
        }
    }

    /// Diff lines rendered as `field: before -> after`.
    pub fn change_lines(&self) -> Vec<String> {
        self.changes.iter().map(ToString::to_string).collect()
    }
}
