//! Notable event aggregation policies

use async_trait::async_trait;
use itsi_core::{
    unwrap_envelope, CreatePolicy, ExtraFields, FieldSpec, Lookup, ResourceRef, ResourceSchema,
    ResourceStore, UpdateMode,
};
use itsi_domain::Result;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::{fields_params, normalize_to_list, quote_plus, require_found, ListOptions};
use crate::request::{Call, ItsiRequest, Params, RequestChannel};

pub const AGGREGATION_POLICY_PATH: &str =
    "servicesNS/nobody/SA-ITOA/event_management_interface/notable_event_aggregation_policy";

pub static AGGREGATION_POLICY: ResourceSchema = ResourceSchema {
    kind: "aggregation_policy",
    fields: &[
        FieldSpec::verbatim("title"),
        FieldSpec::verbatim("description"),
        FieldSpec::verbatim("priority"),
        FieldSpec::verbatim("split_by_field"),
        FieldSpec::verbatim("group_severity"),
        FieldSpec::verbatim("group_status"),
        FieldSpec::verbatim("group_assignee"),
        FieldSpec::verbatim("group_title"),
        FieldSpec::verbatim("group_description"),
        FieldSpec::structural("filter_criteria"),
        FieldSpec::structural("breaking_criteria"),
        FieldSpec::structural("rules"),
        FieldSpec::bool_int("disabled"),
    ],
    create_required: &["title"],
    create_policy: CreatePolicy::UnlessKeyed,
    // Titles are not unique; mutations need the `_key`.
    title_lookup: false,
    update_mode: UpdateMode::Sparse,
    extra_fields: ExtraFields::Ignore,
};

/// Fields the event management interface wants on every create and update,
/// with the value used when neither the caller nor the server has one.
fn required_defaults() -> [(&'static str, Value); 5] {
    [
        ("title", Value::from("Unnamed Policy")),
        ("filter_criteria", empty_criteria()),
        ("breaking_criteria", empty_criteria()),
        ("group_severity", Value::from("normal")),
        ("rules", json!([])),
    ]
}

fn empty_criteria() -> Value {
    json!({"condition": "AND", "items": []})
}

#[derive(Debug)]
pub struct AggregationPolicyStore<C> {
    request: ItsiRequest<C>,
}

impl<C: RequestChannel> AggregationPolicyStore<C> {
    pub fn new(request: ItsiRequest<C>) -> Self {
        Self { request }
    }

    pub fn request_mut(&mut self) -> &mut ItsiRequest<C> {
        &mut self.request
    }

    pub fn into_request(self) -> ItsiRequest<C> {
        self.request
    }

    /// One policy by `_key`, flattened.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn get_info(&mut self, key: &str, fields: &[String]) -> Result<Option<Value>> {
        let call = Call::get(item_path(key)).json_output().params(fields_params(fields));
        Ok(self.request.fetch(call).await?.map(|fetched| flatten(&fetched.body)))
    }

    /// Every policy whose title matches exactly, as
    /// `{"aggregation_policies": [...]}`.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn find_info_by_title(&mut self, title: &str, fields: &[String]) -> Result<Value> {
        let policies = self.titled(title, fields).await?;
        Ok(json!({ "aggregation_policies": policies }))
    }

    /// All policies as `{"aggregation_policies": [...]}`. Honours `fields`,
    /// `filter` (sent as `filter_data`) and `limit`.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn list(&mut self, options: &ListOptions) -> Result<Value> {
        let params = fields_params(&options.fields)
            .with("filter_data", options.filter.clone().map_or(Value::Null, Value::from))
            .with("limit", options.limit_param());
        let policies = self.list_flat(params).await?;
        debug!(count = policies.len(), "listed aggregation policies");
        Ok(json!({ "aggregation_policies": policies }))
    }

    async fn list_flat(&mut self, params: Params) -> Result<Vec<Value>> {
        let call = Call::get(AGGREGATION_POLICY_PATH).json_output().params(params);
        Ok(match self.request.fetch(call).await? {
            Some(fetched) => normalize_to_list(&fetched.body).iter().map(flatten).collect(),
            None => Vec::new(),
        })
    }

    async fn titled(&mut self, title: &str, fields: &[String]) -> Result<Vec<Value>> {
        let policies = self.list_flat(fields_params(fields)).await?;
        Ok(policies
            .into_iter()
            .filter(|policy| policy.get("title").and_then(Value::as_str) == Some(title))
            .collect())
    }
}

#[async_trait]
impl<C: RequestChannel> ResourceStore for AggregationPolicyStore<C> {
    fn schema(&self) -> &'static ResourceSchema {
        &AGGREGATION_POLICY
    }

    async fn get(&mut self, id: &str) -> Result<Option<Value>> {
        let call = Call::get(item_path(id)).json_output();
        Ok(self.request.fetch(call).await?.map(|fetched| fetched.body))
    }

    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>> {
        self.titled(title, &[]).await
    }

    async fn create(&mut self, desired: &Value) -> Result<Value> {
        let mut payload = Map::new();
        for (field, default) in required_defaults() {
            let value = desired.get(field).cloned().unwrap_or(default);
            payload.insert(field.to_string(), value);
        }
        if let Some(extra) = desired.as_object() {
            for (key, value) in extra {
                payload.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let call = Call::post(AGGREGATION_POLICY_PATH).json_output().json(Value::Object(payload));
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, AGGREGATION_POLICY.kind, AGGREGATION_POLICY_PATH)
    }

    async fn update(
        &mut self,
        reference: &ResourceRef,
        payload: Value,
        current: &Value,
    ) -> Result<Value> {
        let current = unwrap_envelope(current).into_merged();
        let mut body = Map::new();
        for (field, default) in required_defaults() {
            let value = payload
                .get(field)
                .or_else(|| current.get(field))
                .cloned()
                .unwrap_or(default);
            body.insert(field.to_string(), value);
        }
        if let Value::Object(patch) = payload {
            for (key, value) in patch {
                body.entry(key).or_insert(value);
            }
        }

        let call = Call::post(item_path(&reference.id))
            .json_output()
            .param("is_partial_data", "1")
            .json(Value::Object(body));
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, AGGREGATION_POLICY.kind, &reference.id)
    }

    async fn delete(&mut self, reference: &ResourceRef) -> Result<Value> {
        let call = Call::delete(item_path(&reference.id)).json_output();
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, AGGREGATION_POLICY.kind, &reference.id)
    }

    fn identify(&self, document: &Value, lookup: &Lookup) -> Option<ResourceRef> {
        let envelope = unwrap_envelope(document);
        match envelope.lookup("_key").and_then(Value::as_str) {
            Some(key) => Some(ResourceRef::key(key)),
            None => match lookup {
                Lookup::Id(id) => Some(ResourceRef::key(id)),
                Lookup::Title(_) | Lookup::Unkeyed => None,
            },
        }
    }
}

fn item_path(key: &str) -> String {
    format!("{AGGREGATION_POLICY_PATH}/{}", quote_plus(key))
}

fn flatten(document: &Value) -> Value {
    unwrap_envelope(document).into_merged()
}
