//! ITSI services (itoa interface)
//!
//! Services are updated as whole documents: the interface drops fields that
//! a partial update leaves out, so the current document is merged with the
//! patch and resent without its system fields.

use async_trait::async_trait;
use itsi_core::reconcile::canonical::bool_like;
use itsi_core::{
    unwrap_envelope, CreatePolicy, ExtraFields, FieldSpec, Lookup, ResourceRef, ResourceSchema,
    ResourceStore, UpdateMode,
};
use itsi_domain::{ItsiError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use super::{fields_params, list_items, normalize_to_list, quote_plus, require_found, ListOptions};
use crate::request::{Call, ItsiRequest, RequestChannel};

pub const SERVICE_PATH: &str = "servicesNS/nobody/SA-ITOA/itoa_interface/service";
pub const TEMPLATE_PATH: &str = "servicesNS/nobody/SA-ITOA/itoa_interface/base_service_template";

const TEMPLATE_FIELD: &str = "base_service_template_id";

/// Fields the caller manages explicitly plus server-maintained ones. None of
/// them take part in the extra-field comparison.
const MANAGED_FIELDS: &[&str] = &[
    "title",
    "enabled",
    "description",
    "sec_grp",
    "service_tags",
    "entity_rules",
    TEMPLATE_FIELD,
    "kpis",
    "permissions",
    "object_type",
    "mod_source",
    "mod_timestamp",
    "_version",
    "identifying_name",
    "is_healthscore_calculate_by_entity_enabled",
    "serviceTemplateId",
];

/// Read-only fields removed from a full-document update.
const SYSTEM_FIELDS: &[&str] = &[
    "_user",
    "_version",
    "mod_source",
    "mod_timestamp",
    "object_type",
    "permissions",
    "kpis",
    "identifying_name",
    "is_healthscore_calculate_by_entity_enabled",
];

static UUID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .ok()
});

pub static SERVICE: ResourceSchema = ResourceSchema {
    kind: "service",
    fields: &[
        FieldSpec::verbatim("title"),
        FieldSpec::verbatim("description"),
        FieldSpec::verbatim("sec_grp"),
        FieldSpec::bool_int("enabled"),
        FieldSpec::tag_set("service_tags", "tags", &["template_tags"]),
        FieldSpec::structural("entity_rules"),
        FieldSpec::create_only(TEMPLATE_FIELD),
    ],
    create_required: &["title"],
    create_policy: CreatePolicy::Always,
    title_lookup: true,
    update_mode: UpdateMode::FullDocument { key_field: "_key", strip: SYSTEM_FIELDS },
    extra_fields: ExtraFields::Managed(MANAGED_FIELDS),
};

/// Server-side filter for service listings. Keys already present in `raw`
/// win over the simple options.
pub fn service_filter(
    title: Option<&str>,
    enabled: Option<bool>,
    sec_grp: Option<&str>,
    raw: Option<&Map<String, Value>>,
) -> Option<String> {
    let mut filter = raw.cloned().unwrap_or_default();
    if let Some(title) = title {
        filter.entry("title").or_insert_with(|| Value::from(title));
    }
    if let Some(enabled) = enabled {
        filter.entry("enabled").or_insert_with(|| Value::from(i64::from(enabled)));
    }
    if let Some(sec_grp) = sec_grp {
        filter.entry("sec_grp").or_insert_with(|| Value::from(sec_grp));
    }
    (!filter.is_empty()).then(|| Value::Object(filter).to_string())
}

fn looks_like_uuid(value: &str) -> bool {
    UUID_PATTERN.as_ref().is_some_and(|pattern| pattern.is_match(value))
}

fn title_filter(title: &str) -> String {
    json!({ "title": title }).to_string()
}

fn titled(body: &Value, title: &str) -> Vec<Value> {
    normalize_to_list(body)
        .into_iter()
        .filter(|item| item.get("title").and_then(Value::as_str) == Some(title))
        .collect()
}

#[derive(Debug)]
pub struct ServiceStore<C> {
    request: ItsiRequest<C>,
}

impl<C: RequestChannel> ServiceStore<C> {
    pub fn new(request: ItsiRequest<C>) -> Self {
        Self { request }
    }

    pub fn request_mut(&mut self) -> &mut ItsiRequest<C> {
        &mut self.request
    }

    pub fn into_request(self) -> ItsiRequest<C> {
        self.request
    }

    /// One service document by `_key`.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn get_info(&mut self, key: &str, fields: &[String]) -> Result<Option<Value>> {
        let call = Call::get(item_path(key)).params(fields_params(fields));
        Ok(self.request.fetch(call).await?.map(|fetched| fetched.body))
    }

    /// Services listed with `fields`, `filter`, `limit` (sent as `count`)
    /// and `offset`. Returns `{"items": [...]}`, plus `paging` when the
    /// server answers with the `{items, size}` shape.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn list(&mut self, options: &ListOptions) -> Result<Value> {
        let params = fields_params(&options.fields)
            .with("filter", options.filter.clone().map_or(Value::Null, Value::from))
            .with("count", options.limit.map_or(Value::Null, Value::from))
            .with("offset", options.offset.map_or(Value::Null, Value::from));
        let body = match self.request.fetch(Call::get(SERVICE_PATH).params(params)).await? {
            Some(fetched) => fetched.body,
            None => Value::Null,
        };

        let paged = body.get("items").is_some() && body.get("size").is_some();
        if paged {
            return Ok(json!({
                "items": body["items"].clone(),
                "paging": {"size": body["size"].clone(), "items": body["items"].clone()},
            }));
        }
        Ok(json!({ "items": list_items(body) }))
    }

    async fn resolve_template(&mut self, reference: &str) -> Result<String> {
        if looks_like_uuid(reference) {
            return Ok(reference.to_string());
        }

        let call = Call::get(TEMPLATE_PATH).param("filter", title_filter(reference));
        let body = self.request.fetch(call).await?.map(|fetched| fetched.body).unwrap_or_default();
        let matches = titled(&body, reference);
        if matches.len() > 1 {
            return Err(ItsiError::Validation(format!(
                "{} service templates are titled '{reference}'; use the template _key",
                matches.len()
            )));
        }
        let key = matches.first().and_then(|template| template.get("_key")).and_then(Value::as_str);
        match key {
            Some(key) => {
                debug!(template = reference, key, "resolved service template");
                Ok(key.to_string())
            }
            None => Err(ItsiError::Validation(format!(
                "service template '{reference}' was not found; use the template _key"
            ))),
        }
    }
}

#[async_trait]
impl<C: RequestChannel> ResourceStore for ServiceStore<C> {
    fn schema(&self) -> &'static ResourceSchema {
        &SERVICE
    }

    async fn get(&mut self, id: &str) -> Result<Option<Value>> {
        Ok(self.request.fetch(Call::get(item_path(id))).await?.map(|fetched| fetched.body))
    }

    /// Exact title matches, each refetched by `_key` since the filtered
    /// listing may carry partial documents.
    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>> {
        let call = Call::get(SERVICE_PATH).param("filter", title_filter(title));
        let body = match self.request.fetch(call).await? {
            Some(fetched) => fetched.body,
            None => return Ok(Vec::new()),
        };

        let mut documents = Vec::new();
        for partial in titled(&body, title) {
            let full = match partial.get("_key").and_then(Value::as_str) {
                Some(key) => self.get(key).await?,
                None => None,
            };
            documents.push(full.unwrap_or(partial));
        }
        Ok(documents)
    }

    async fn prepare_create(&mut self, lookup: &Lookup, desired: &Value) -> Result<Value> {
        let mut desired = desired.as_object().cloned().unwrap_or_default();
        if let Lookup::Title(title) = lookup {
            desired.entry("title").or_insert_with(|| Value::from(title.clone()));
        }
        if let Some(flag) = desired.get("enabled").and_then(bool_like) {
            desired.insert("enabled".to_string(), Value::from(i64::from(flag)));
        }
        if let Some(tags @ Value::Array(_)) = desired.get("service_tags").cloned() {
            desired.insert("service_tags".to_string(), json!({ "tags": tags }));
        }

        let template = desired.get(TEMPLATE_FIELD).and_then(Value::as_str).map(str::to_string);
        if let Some(template) = template.filter(|template| !template.is_empty()) {
            if desired.get("entity_rules").is_some_and(|rules| !rules.is_null()) {
                return Err(ItsiError::Validation(format!(
                    "{TEMPLATE_FIELD} and entity_rules cannot be combined"
                )));
            }
            let key = self.resolve_template(&template).await?;
            desired.insert(TEMPLATE_FIELD.to_string(), Value::from(key));
        }
        Ok(Value::Object(desired))
    }

    async fn create(&mut self, desired: &Value) -> Result<Value> {
        let fetched = self.request.fetch(Call::post(SERVICE_PATH).json(desired.clone())).await?;
        require_found(fetched, SERVICE.kind, SERVICE_PATH)
    }

    async fn update(
        &mut self,
        reference: &ResourceRef,
        payload: Value,
        _current: &Value,
    ) -> Result<Value> {
        let call = Call::post(item_path(&reference.id)).json(payload);
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, SERVICE.kind, &reference.id)
    }

    async fn delete(&mut self, reference: &ResourceRef) -> Result<Value> {
        let fetched = self.request.fetch(Call::delete(item_path(&reference.id))).await?;
        require_found(fetched, SERVICE.kind, &reference.id)
    }

    fn identify(&self, document: &Value, lookup: &Lookup) -> Option<ResourceRef> {
        match (unwrap_envelope(document).lookup("_key").and_then(Value::as_str), lookup) {
            (Some(key), _) => Some(ResourceRef::key(key)),
            (None, Lookup::Id(id)) => Some(ResourceRef::key(id)),
            (None, _) => {
                warn!("service document carries no _key");
                None
            }
        }
    }
}

fn item_path(key: &str) -> String {
    format!("{SERVICE_PATH}/{}", quote_plus(key))
}

#[cfg(test)]
mod tests {
    use itsi_core::testing::ScriptedTransport;
    use itsi_core::{Mode, Reconciler};
    use itsi_domain::{AuthOptions, HttpMethod, Operation};

    use super::*;
    use crate::connection::ItsiConnection;

    type Store = ServiceStore<ItsiConnection<ScriptedTransport>>;

    const TEMPLATE_KEY: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn store() -> (Store, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let connection = ItsiConnection::new(transport.clone(), AuthOptions::with_token("tok"));
        (ServiceStore::new(ItsiRequest::new(connection)), transport)
    }

    fn sent_body(transport: &ScriptedTransport, index: usize) -> Value {
        serde_json::from_str(&transport.calls()[index].body).unwrap()
    }

    fn web() -> Value {
        json!({
            "_key": "svc1",
            "_version": "4.19",
            "title": "Web",
            "enabled": 1,
            "service_tags": {"tags": ["a", "b"], "template_tags": ["t"]},
            "kpis": [{"title": "health"}],
            "mod_timestamp": "2026-01-01",
        })
    }

    #[test]
    fn filter_prefers_raw_keys() {
        let raw = json!({"title": "Raw"});
        let filter = service_filter(Some("Web"), Some(true), Some("default"), raw.as_object());
        let parsed: Value = serde_json::from_str(&filter.unwrap()).unwrap();
        assert_eq!(parsed, json!({"title": "Raw", "enabled": 1, "sec_grp": "default"}));
        assert_eq!(service_filter(None, None, None, None), None);
    }

    #[test]
    fn recognises_uuid_keys() {
        assert!(looks_like_uuid(TEMPLATE_KEY));
        assert!(!looks_like_uuid("My Template"));
    }

    #[tokio::test]
    async fn title_discovery_refetches_by_key() {
        let (store, transport) = store();
        transport.push_json(200, &json!([{"_key": "svc1", "title": "Web"}, {"_key": "x", "title": "Webby"}]));
        transport.push_json(200, &web());
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Title("Web".into()),
                &json!({"enabled": true, "service_tags": ["b", "a"]}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert!(!result.changed);
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].path,
            format!("/{SERVICE_PATH}?filter=%7B%22title%22%3A%22Web%22%7D&output_mode=json")
        );
        assert_eq!(calls[1].path, format!("/{SERVICE_PATH}/svc1?output_mode=json"));
    }

    #[tokio::test]
    async fn update_sends_full_document_without_system_fields() {
        let (store, transport) = store();
        transport.push_json(200, &web());
        transport.push_json(200, &json!({"_key": "svc1"}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(&Lookup::Id("svc1".into()), &json!({"description": "front"}), Mode::Apply)
            .await
            .unwrap();

        assert_eq!(result.operation, Operation::Update);
        let update = &transport.calls()[1];
        assert_eq!(update.method, HttpMethod::Post);
        assert_eq!(update.path, format!("/{SERVICE_PATH}/svc1"));
        let body = sent_body(&transport, 1);
        assert_eq!(body["_key"], "svc1");
        assert_eq!(body["title"], "Web");
        assert_eq!(body["description"], "front");
        assert_eq!(body["service_tags"]["template_tags"], json!(["t"]));
        assert!(body.get("kpis").is_none());
        assert!(body.get("_version").is_none());
        assert!(body.get("mod_timestamp").is_none());
    }

    #[tokio::test]
    async fn unmanaged_server_fields_are_nulled() {
        let (store, transport) = store();
        let mut current = web();
        current["custom"] = json!("old");
        transport.push_json(200, &current);
        transport.push_json(200, &json!({}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(&Lookup::Id("svc1".into()), &json!({"title": "Web"}), Mode::Apply)
            .await
            .unwrap();

        assert!(result.changed);
        assert_eq!(sent_body(&transport, 1)["custom"], Value::Null);
    }

    #[tokio::test]
    async fn create_resolves_template_title() {
        let (store, transport) = store();
        transport.push_json(200, &json!([]));
        transport.push_json(200, &json!([{"_key": TEMPLATE_KEY, "title": "Linux"}]));
        transport.push_json(200, &json!({"_key": "new"}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Title("Db".into()),
                &json!({"enabled": false, "base_service_template_id": "Linux", "service_tags": ["db"]}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert_eq!(result.operation, Operation::Create);
        let calls = transport.calls();
        assert!(calls[1].path.starts_with(&format!("/{TEMPLATE_PATH}?filter=")));
        assert_eq!(calls[2].path, format!("/{SERVICE_PATH}"));
        let body = sent_body(&transport, 2);
        assert_eq!(body["title"], "Db");
        assert_eq!(body["enabled"], 0);
        assert_eq!(body["service_tags"], json!({"tags": ["db"]}));
        assert_eq!(body[TEMPLATE_FIELD], TEMPLATE_KEY);
    }

    #[tokio::test]
    async fn dry_run_resolves_template_without_creating() {
        let (store, transport) = store();
        transport.push_json(200, &json!([]));
        transport.push_json(200, &json!([{"_key": TEMPLATE_KEY, "title": "Linux"}]));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Title("Db".into()),
                &json!({"base_service_template_id": "Linux"}),
                Mode::DryRun,
            )
            .await
            .unwrap();

        assert!(result.changed);
        assert!(result.response.is_none());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn ambiguous_template_title_is_rejected() {
        let (store, transport) = store();
        transport.push_json(200, &json!([]));
        transport.push_json(
            200,
            &json!([{"_key": "a", "title": "Linux"}, {"_key": "b", "title": "Linux"}]),
        );
        let mut reconciler = Reconciler::new(store);

        let err = reconciler
            .ensure_present(
                &Lookup::Title("Db".into()),
                &json!({"base_service_template_id": "Linux"}),
                Mode::Apply,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ItsiError::Validation(_)));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn template_with_entity_rules_is_rejected() {
        let (store, transport) = store();
        transport.push_json(200, &json!([]));
        let mut reconciler = Reconciler::new(store);

        let err = reconciler
            .ensure_present(
                &Lookup::Title("Db".into()),
                &json!({"base_service_template_id": TEMPLATE_KEY, "entity_rules": []}),
                Mode::Apply,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ItsiError::Validation(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn ambiguous_title_is_an_error() {
        let (store, transport) = store();
        transport.push_json(200, &json!([{"title": "Web"}, {"title": "Web"}]));
        let mut reconciler = Reconciler::new(store);

        let err = reconciler.ensure_absent(&Lookup::Title("Web".into()), Mode::Apply).await.unwrap_err();

        assert!(matches!(err, ItsiError::Ambiguous(_)));
    }

    #[tokio::test]
    async fn delete_by_key() {
        let (store, transport) = store();
        transport.push_json(200, &web());
        transport.push_json(200, &json!({}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler.ensure_absent(&Lookup::Id("svc1".into()), Mode::Apply).await.unwrap();

        assert_eq!(result.operation, Operation::Delete);
        let delete = &transport.calls()[1];
        assert_eq!(delete.method, HttpMethod::Delete);
        assert_eq!(delete.path, format!("/{SERVICE_PATH}/svc1"));
    }

    #[tokio::test]
    async fn list_recognises_paging_shape() {
        let (mut store, transport) = store();
        transport.push_json(200, &json!({"items": [{"title": "Web"}], "size": 1}));

        let listed = store
            .list(&ListOptions::new().fields(["title", "title"]).limit(5).offset(10))
            .await
            .unwrap();

        assert_eq!(listed["items"][0]["title"], "Web");
        assert_eq!(listed["paging"]["size"], 1);
        assert_eq!(
            transport.calls()[0].path,
            format!("/{SERVICE_PATH}?fields=title&count=5&offset=10&output_mode=json")
        );
    }
}
