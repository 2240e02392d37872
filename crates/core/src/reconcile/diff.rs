//! Differencer and patch builder

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use itsi_domain::{CanonicalResource, FieldChange, Patch};

use super::schema::{ExtraFields, FieldRule, ResourceSchema};

/// Compute the minimal patch taking `current` to `desired`.
///
/// Only keys the desired state declares are compared. Under
/// [`ExtraFields::Managed`] unmanaged keys present on the server but not
/// declared are additionally set to `null`.
pub fn diff(
    desired: &CanonicalResource,
    current: &CanonicalResource,
    schema: &ResourceSchema,
) -> Patch {
    let mut patch = Patch::new();

    for (field, wanted) in desired.iter() {
        let have = current.get(field).unwrap_or(&Value::Null);
        let rule = schema.field_for_key(field).map_or(FieldRule::Verbatim, |spec| spec.rule);
        if !field_equal(rule, wanted, have) {
            patch.insert(field.clone(), wanted.clone());
        }
    }

    if let ExtraFields::Managed(_) = schema.extra_fields {
        for (field, have) in current.iter() {
            if desired.contains(field)
                || schema.is_known(field)
                || field.starts_with('_')
                || have.is_null()
            {
                continue;
            }
            patch.insert(field.clone(), Value::Null);
        }
    }

    patch
}

/// Render `patch` as `field: before -> after` changes against `current`.
pub fn describe_changes(patch: &Patch, current: &CanonicalResource) -> Vec<FieldChange> {
    patch
        .iter()
        .map(|(field, after)| FieldChange {
            field: field.clone(),
            before: current.get(field).cloned().unwrap_or(Value::Null),
            after: after.clone(),
        })
        .collect()
}

fn field_equal(rule: FieldRule, wanted: &Value, have: &Value) -> bool {
    match rule {
        FieldRule::CreateOnly => true,
        FieldRule::Structural => wanted == have,
        FieldRule::TimeWindow { .. } => (is_blank(wanted) && is_blank(have)) || loose_eq(wanted, have),
        FieldRule::TagSet { key, ignore } => tag_sets_equal(wanted, have, key, ignore),
        FieldRule::Verbatim | FieldRule::BoolInt | FieldRule::BoolString => loose_eq(wanted, have),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// Equality that treats scalars with the same textual form as equal.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (scalar_text(left), scalar_text(right)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn tag_sets_equal(wanted: &Value, have: &Value, key: &str, ignore: &[&str]) -> bool {
    let empty = Map::new();
    let wanted = wanted.as_object().unwrap_or(&empty);
    let have = have.as_object().unwrap_or(&empty);

    if wanted.is_empty() && have.is_empty() {
        return true;
    }
    if tag_set(wanted.get(key)) != tag_set(have.get(key)) {
        return false;
    }

    wanted
        .keys()
        .chain(have.keys())
        .filter(|name| name.as_str() != key && !ignore.contains(&name.as_str()))
        .all(|name| wanted.get(name) == have.get(name))
}

fn tag_set(tags: Option<&Value>) -> BTreeSet<String> {
    match tags {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| scalar_text(item).unwrap_or_else(|| item.to_string()))
            .collect(),
        _ => BTreeSet::new(),
    }
}
