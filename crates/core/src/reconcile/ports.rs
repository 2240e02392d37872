//! Port interfaces for resource reconciliation
//!
//! A `ResourceStore` is the per-resource-kind adapter the reconciler drives.
//! Stores own their endpoint paths and payload quirks; the reconciler owns
//! the discover, diff and apply cycle.

use async_trait::async_trait;
use itsi_domain::Result;
use serde_json::Value;

use super::schema::ResourceSchema;

/// How the caller identifies the target resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Stable identifier (`_key`, id)
    Id(String),
    /// Secondary key; may match zero, one or many resources
    Title(String),
    /// No identifier supplied
    Unkeyed,
}

impl Lookup {
    /// Build a lookup from optional parts. An identifier wins over a title;
    /// empty strings count as missing.
    pub fn from_parts(id: Option<&str>, title: Option<&str>) -> Self {
        match (id.filter(|v| !v.is_empty()), title.filter(|v| !v.is_empty())) {
            (Some(id), _) => Self::Id(id.to_string()),
            (None, Some(title)) => Self::Title(title.to_string()),
            (None, None) => Self::Unkeyed,
        }
    }

    pub fn is_keyed(&self) -> bool {
        !matches!(self, Self::Unkeyed)
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id '{id}'"),
            Self::Title(title) => write!(f, "title '{title}'"),
            Self::Unkeyed => f.write_str("no identifier"),
        }
    }
}

/// Kind of identifier a [`ResourceRef`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Key,
    Name,
}

/// Handle on an existing resource, as produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
    pub kind: RefKind,
}

impl ResourceRef {
    pub fn key(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: RefKind::Key }
    }

    pub fn name(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: RefKind::Name }
    }
}

/// Discovery outcome. A 404 is `Absent`, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    Absent,
    Found { reference: ResourceRef, document: Value },
    Ambiguous(usize),
}

/// Trait for reading and mutating one resource kind on the server
#[async_trait]
pub trait ResourceStore: Send {
    /// Declarative schema of this resource kind
    fn schema(&self) -> &'static ResourceSchema;

    /// Fetch by stable identifier; `Ok(None)` when the server answers 404
    async fn get(&mut self, id: &str) -> Result<Option<Value>>;

    /// All documents whose title matches exactly
    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>>;

    /// Complete the desired document ahead of a create, e.g. fill the name
    /// from the lookup or resolve references. Runs in dry-run mode too and
    /// must not change server state.
    async fn prepare_create(&mut self, _lookup: &Lookup, desired: &Value) -> Result<Value> {
        Ok(desired.clone())
    }

    /// Create from the caller's desired document
    async fn create(&mut self, desired: &Value) -> Result<Value>;

    /// Send an update payload built by the reconciler. `current` is the
    /// discovered document. A 404 here is a hard error.
    async fn update(&mut self, reference: &ResourceRef, payload: Value, current: &Value)
        -> Result<Value>;

    /// Delete an existing resource. A 404 here is a hard error.
    async fn delete(&mut self, reference: &ResourceRef) -> Result<Value>;

    /// Derive the handle for a discovered document.
    fn identify(&self, document: &Value, lookup: &Lookup) -> Option<ResourceRef>;

    /// Resolve `lookup` against the server.
    async fn discover(&mut self, lookup: &Lookup) -> Result<Discovery> {
        match lookup {
            Lookup::Id(id) => Ok(match self.get(id).await? {
                Some(document) => {
                    let reference =
                        self.identify(&document, lookup).unwrap_or_else(|| ResourceRef::key(id));
                    Discovery::Found { reference, document }
                }
                None => Discovery::Absent,
            }),
            Lookup::Title(title) => {
                let mut matches = self.find_by_title(title).await?;
                match matches.len() {
                    0 => Ok(Discovery::Absent),
                    1 => {
                        let document = matches.remove(0);
                        let reference = self
                            .identify(&document, lookup)
                            .unwrap_or_else(|| ResourceRef::name(title));
                        Ok(Discovery::Found { reference, document })
                    }
                    count => Ok(Discovery::Ambiguous(count)),
                }
            }
            Lookup::Unkeyed => Ok(Discovery::Absent),
        }
    }
}
