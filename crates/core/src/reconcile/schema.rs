//! Declarative per-resource schemas
//!
//! Each resource kind declares its comparable fields and how each one is
//! normalized. The canonicalizer and differencer are generic over these
//! tables.

/// Normalization and comparison rule for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Copied as-is, compared loosely (`"5"` equals `5`).
    Verbatim,
    /// Boolean-like flag stored as integer `0`/`1`.
    BoolInt,
    /// Boolean-like flag stored as string `"0"`/`"1"`.
    BoolString,
    /// Time window stored under a namespaced key (the field name) that also
    /// accepts a short alias. `null` and `""` compare equal.
    TimeWindow { short: &'static str },
    /// Nested value compared by deep structural equality. JSON-encoded
    /// strings are parsed first.
    Structural,
    /// Object holding a `key` list compared as an unordered set. Keys listed
    /// in `ignore` never take part in the comparison.
    TagSet { key: &'static str, ignore: &'static [&'static str] },
    /// Accepted on create, never compared afterwards.
    CreateOnly,
}

/// One schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: FieldRule,
}

impl FieldSpec {
    pub const fn verbatim(name: &'static str) -> Self {
        Self { name, rule: FieldRule::Verbatim }
    }

    pub const fn bool_int(name: &'static str) -> Self {
        Self { name, rule: FieldRule::BoolInt }
    }

    pub const fn bool_string(name: &'static str) -> Self {
        Self { name, rule: FieldRule::BoolString }
    }

    pub const fn time_window(name: &'static str, short: &'static str) -> Self {
        Self { name, rule: FieldRule::TimeWindow { short } }
    }

    pub const fn structural(name: &'static str) -> Self {
        Self { name, rule: FieldRule::Structural }
    }

    pub const fn tag_set(
        name: &'static str,
        key: &'static str,
        ignore: &'static [&'static str],
    ) -> Self {
        Self { name, rule: FieldRule::TagSet { key, ignore } }
    }

    pub const fn create_only(name: &'static str) -> Self {
        Self { name, rule: FieldRule::CreateOnly }
    }
}

/// When a missing resource may be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    /// Create whenever discovery finds nothing.
    Always,
    /// Create only when no identifier was supplied; a missing identified
    /// resource is an error.
    UnlessKeyed,
    /// The resource kind is update-only.
    Never,
}

/// Shape of the update request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only the changed fields.
    Sparse,
    /// The current document merged with the patch, `key_field` set to the
    /// resource identifier and `strip` fields removed.
    FullDocument { key_field: &'static str, strip: &'static [&'static str] },
}

/// Treatment of fields outside the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFields {
    /// Dropped during canonicalization.
    Ignore,
    /// Kept and compared loosely. Never slated for removal.
    Open,
    /// Kept and compared; keys present on the server but missing from the
    /// desired state are nulled in the patch. Listed keys are server-managed
    /// and never compared.
    Managed(&'static [&'static str]),
}

/// Everything the reconciler needs to know about one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Human-readable kind, used in logs and error messages
    pub kind: &'static str,
    pub fields: &'static [FieldSpec],
    /// Fields a create request cannot do without
    pub create_required: &'static [&'static str],
    pub create_policy: CreatePolicy,
    /// Whether discovery by title is permitted
    pub title_lookup: bool,
    pub update_mode: UpdateMode,
    pub extra_fields: ExtraFields,
}

impl ResourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Schema field owning `key`, matching short time-window aliases too.
    pub fn field_for_key(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| {
            spec.name == key || matches!(spec.rule, FieldRule::TimeWindow { short } if short == key)
        })
    }

    /// True when `key` belongs to the schema or to the managed set.
    pub fn is_known(&self, key: &str) -> bool {
        if self.field_for_key(key).is_some() {
            return true;
        }
        matches!(self.extra_fields, ExtraFields::Managed(managed) if managed.contains(&key))
    }

    /// Required create fields for which `has_field` answers false.
    pub fn missing_required(&self, has_field: impl Fn(&str) -> bool) -> Vec<&'static str> {
        self.create_required.iter().copied().filter(|name| !has_field(name)).collect()
    }
}
