//! Reconciliation orchestrator - core business logic
//!
//! Drives `Discover -> Diff -> Apply` for presence and
//! `Discover -> Delete` for absence over any [`ResourceStore`].

use itsi_domain::{CanonicalResource, ItsiError, Operation, Patch, ReconcileResult, Result};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::canonical::{canonicalize, unwrap_envelope};
use super::diff::{describe_changes, diff};
use super::ports::{Discovery, Lookup, ResourceRef, ResourceStore};
use super::schema::{CreatePolicy, ResourceSchema, UpdateMode};

/// Whether mutations are sent or only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Apply,
    /// Discover and diff, but never create, update or delete
    DryRun,
}

impl Mode {
    pub fn is_dry_run(self) -> bool {
        matches!(self, Self::DryRun)
    }
}

/// Idempotent reconciler for one resource kind
pub struct Reconciler<S> {
    store: S,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Bring the resource identified by `lookup` to the `desired` state.
    ///
    /// Only fields present in `desired` are compared. Running twice with the
    /// same input reports `changed == false` the second time.
    ///
    /// # Errors
    /// Validation failures are raised before any network call. A missing
    /// resource that may not be created yields `NotFound`; several title
    /// matches yield `Ambiguous`. Mutation failures propagate unchanged.
    #[instrument(skip_all, fields(lookup = %lookup, ?mode))]
    pub async fn ensure_present(
        &mut self,
        lookup: &Lookup,
        desired: &Value,
        mode: Mode,
    ) -> Result<ReconcileResult> {
        let schema = self.store.schema();
        if !desired.is_object() {
            return Err(ItsiError::Validation(format!(
                "desired state for {} must be an object",
                schema.kind
            )));
        }
        check_lookup(schema, lookup)?;
        if !lookup.is_keyed() {
            if schema.create_policy == CreatePolicy::Never {
                return Err(ItsiError::Validation(format!(
                    "{} requires an identifier",
                    schema.kind
                )));
            }
            require_create_fields(schema, desired)?;
        }

        match self.store.discover(lookup).await? {
            Discovery::Ambiguous(count) => Err(ambiguous(schema, lookup, count)),
            Discovery::Absent => self.create(schema, lookup, desired, mode).await,
            Discovery::Found { reference, document } => {
                self.update(schema, &reference, &document, desired, mode).await
            }
        }
    }

    /// Make sure the resource identified by `lookup` does not exist.
    ///
    /// An already-absent resource yields `changed == false` and no delete
    /// request.
    ///
    /// # Errors
    /// `Validation` when no identifier is given, `Ambiguous` when a title
    /// matches several resources, and any delete failure.
    #[instrument(skip_all, fields(lookup = %lookup, ?mode))]
    pub async fn ensure_absent(&mut self, lookup: &Lookup, mode: Mode) -> Result<ReconcileResult> {
        let schema = self.store.schema();
        if !lookup.is_keyed() {
            return Err(ItsiError::Validation(format!(
                "deleting a {} requires an identifier",
                schema.kind
            )));
        }
        check_lookup(schema, lookup)?;

        let (reference, document) = match self.store.discover(lookup).await? {
            Discovery::Ambiguous(count) => return Err(ambiguous(schema, lookup, count)),
            Discovery::Absent => {
                debug!(kind = schema.kind, "already absent");
                return Ok(ReconcileResult::unchanged(CanonicalResource::new()));
            }
            Discovery::Found { reference, document } => (reference, document),
        };

        let before = canonicalize(&document, schema);
        let response = if mode.is_dry_run() {
            None
        } else {
            Some(self.store.delete(&reference).await?)
        };
        info!(kind = schema.kind, id = %reference.id, dry_run = mode.is_dry_run(), "deleted");

        Ok(ReconcileResult {
            changed: true,
            operation: Operation::Delete,
            before,
            after: CanonicalResource::new(),
            diff: Patch::new(),
            changes: Vec::new(),
            response,
        })
    }

    async fn create(
        &mut self,
        schema: &'static ResourceSchema,
        lookup: &Lookup,
        desired: &Value,
        mode: Mode,
    ) -> Result<ReconcileResult> {
        let may_create = match schema.create_policy {
            CreatePolicy::Always => true,
            CreatePolicy::UnlessKeyed => !matches!(lookup, Lookup::Id(_)),
            CreatePolicy::Never => false,
        };
        if !may_create {
            return Err(ItsiError::NotFound(format!("{} with {lookup} not found", schema.kind)));
        }
        let desired = self.store.prepare_create(lookup, desired).await?;
        require_create_fields(schema, &desired)?;

        let after = canonicalize(&desired, schema);
        let patch: Patch = after.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let changes = describe_changes(&patch, &CanonicalResource::new());

        let response = if mode.is_dry_run() {
            None
        } else {
            Some(self.store.create(&desired).await?)
        };
        info!(kind = schema.kind, fields = patch.len(), dry_run = mode.is_dry_run(), "created");

        Ok(ReconcileResult {
            changed: true,
            operation: Operation::Create,
            before: CanonicalResource::new(),
            after,
            diff: patch,
            changes,
            response,
        })
    }

    async fn update(
        &mut self,
        schema: &'static ResourceSchema,
        reference: &ResourceRef,
        document: &Value,
        desired: &Value,
        mode: Mode,
    ) -> Result<ReconcileResult> {
        let before = canonicalize(document, schema);
        let wanted = canonicalize(desired, schema);
        let patch = diff(&wanted, &before, schema);

        if patch.is_empty() {
            debug!(kind = schema.kind, id = %reference.id, "no change");
            return Ok(ReconcileResult::unchanged(before));
        }

        let after = before.with_patch(&patch);
        let changes = describe_changes(&patch, &before);
        let response = if mode.is_dry_run() {
            None
        } else {
            let payload = update_payload(schema.update_mode, &patch, document, reference);
            Some(self.store.update(reference, payload, document).await?)
        };
        info!(
            kind = schema.kind,
            id = %reference.id,
            fields = patch.len(),
            dry_run = mode.is_dry_run(),
            "updated"
        );

        Ok(ReconcileResult {
            changed: true,
            operation: Operation::Update,
            before,
            after,
            diff: patch,
            changes,
            response,
        })
    }
}

fn check_lookup(schema: &ResourceSchema, lookup: &Lookup) -> Result<()> {
    if matches!(lookup, Lookup::Title(_)) && !schema.title_lookup {
        return Err(ItsiError::Validation(format!(
            "{} cannot be looked up by title; supply its identifier",
            schema.kind
        )));
    }
    Ok(())
}

fn require_create_fields(schema: &ResourceSchema, desired: &Value) -> Result<()> {
    let missing = schema.missing_required(|name| match desired.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    });
    if missing.is_empty() {
        return Ok(());
    }
    Err(ItsiError::Validation(format!(
        "creating a {} requires: {}",
        schema.kind,
        missing.join(", ")
    )))
}

fn ambiguous(schema: &ResourceSchema, lookup: &Lookup, count: usize) -> ItsiError {
    ItsiError::Ambiguous(format!(
        "{count} {} resources match {lookup}; use the identifier instead",
        schema.kind
    ))
}

fn update_payload(
    mode: UpdateMode,
    patch: &Patch,
    document: &Value,
    reference: &ResourceRef,
) -> Value {
    match mode {
        UpdateMode::Sparse => patch.to_value(),
        UpdateMode::FullDocument { key_field, strip } => {
            let mut payload = unwrap_envelope(document).content;
            for (field, value) in patch.iter() {
                payload.insert(field.clone(), value.clone());
            }
            payload.insert(key_field.to_string(), Value::from(reference.id.clone()));
            for field in strip {
                payload.remove(*field);
            }
            Value::Object(payload)
        }
    }
}
