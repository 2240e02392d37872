//! Correlation searches (event management interface)

use async_trait::async_trait;
use itsi_core::reconcile::canonical::bool_like;
use itsi_core::{
    unwrap_envelope, CreatePolicy, ExtraFields, FieldSpec, Lookup, RefKind, ResourceRef,
    ResourceSchema, ResourceStore, UpdateMode,
};
use itsi_domain::{ItsiError, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::{fields_params, normalize_to_list, quote_path, quote_plus, require_found, ListOptions};
use crate::request::{Call, ItsiRequest, Params, RequestChannel};

pub const CORRELATION_SEARCH_PATH: &str =
    "servicesNS/nobody/SA-ITOA/event_management_interface/correlation_search";

const EARLIEST: (&str, &str) = ("dispatch.earliest_time", "earliest_time");
const LATEST: (&str, &str) = ("dispatch.latest_time", "latest_time");

pub static CORRELATION_SEARCH: ResourceSchema = ResourceSchema {
    kind: "correlation_search",
    fields: &[
        FieldSpec::verbatim("search"),
        FieldSpec::verbatim("description"),
        FieldSpec::verbatim("cron_schedule"),
        FieldSpec::verbatim("actions"),
        FieldSpec::bool_string("disabled"),
        FieldSpec::time_window(EARLIEST.0, EARLIEST.1),
        FieldSpec::time_window(LATEST.0, LATEST.1),
    ],
    create_required: &["search"],
    create_policy: CreatePolicy::Always,
    title_lookup: true,
    update_mode: UpdateMode::Sparse,
    extra_fields: ExtraFields::Ignore,
};

/// Correlation searches, addressed by name (`%20` path encoding) or by id
/// (`+` path encoding).
#[derive(Debug)]
pub struct CorrelationSearchStore<C> {
    request: ItsiRequest<C>,
}

impl<C: RequestChannel> CorrelationSearchStore<C> {
    pub fn new(request: ItsiRequest<C>) -> Self {
        Self { request }
    }

    pub fn request_mut(&mut self) -> &mut ItsiRequest<C> {
        &mut self.request
    }

    pub fn into_request(self) -> ItsiRequest<C> {
        self.request
    }

    /// One search, flattened with its envelope under `_meta`.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn get_info(&mut self, lookup: &Lookup, fields: &[String]) -> Result<Option<Value>> {
        let reference = match lookup {
            Lookup::Id(id) => ResourceRef::key(id),
            Lookup::Title(name) => ResourceRef::name(name),
            Lookup::Unkeyed => {
                return Err(ItsiError::Validation(
                    "a correlation search id or name is required".to_string(),
                ))
            }
        };
        let call = Call::get(item_path(&reference)).json_output().params(fields_params(fields));
        let fetched = self.request.fetch(call).await?;
        Ok(fetched.map(|fetched| unwrap_envelope(&fetched.body).into_flat()))
    }

    /// All searches as `{"correlation_searches": [...]}`. Honours `fields`,
    /// `filter` (sent as `filter_data`) and `limit` (sent as `count`).
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn list(&mut self, options: &ListOptions) -> Result<Value> {
        let params = fields_params(&options.fields)
            .with("filter_data", options.filter.clone().map_or(Value::Null, Value::from))
            .with("count", options.limit_param());
        let call = Call::get(CORRELATION_SEARCH_PATH).json_output().params(params);

        let entries = match self.request.fetch(call).await? {
            Some(fetched) => normalize_to_list(&fetched.body),
            None => Vec::new(),
        };
        let searches: Vec<Value> =
            entries.iter().map(|entry| unwrap_envelope(entry).into_flat()).collect();
        debug!(count = searches.len(), "listed correlation searches");
        Ok(json!({ "correlation_searches": searches }))
    }

    async fn fetch_item(&mut self, reference: &ResourceRef) -> Result<Option<Value>> {
        let call = Call::get(item_path(reference)).json_output();
        Ok(self.request.fetch(call).await?.map(|fetched| fetched.body))
    }
}

#[async_trait]
impl<C: RequestChannel> ResourceStore for CorrelationSearchStore<C> {
    fn schema(&self) -> &'static ResourceSchema {
        &CORRELATION_SEARCH
    }

    async fn get(&mut self, id: &str) -> Result<Option<Value>> {
        self.fetch_item(&ResourceRef::key(id)).await
    }

    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>> {
        Ok(self.fetch_item(&ResourceRef::name(title)).await?.into_iter().collect())
    }

    async fn prepare_create(&mut self, lookup: &Lookup, desired: &Value) -> Result<Value> {
        let mut desired = desired.clone();
        if let (Some(fields), Lookup::Id(name) | Lookup::Title(name)) = (desired.as_object_mut(), lookup) {
            fields.entry("name").or_insert_with(|| Value::from(name.clone()));
        }
        Ok(desired)
    }

    async fn create(&mut self, desired: &Value) -> Result<Value> {
        let mut payload = desired.as_object().cloned().unwrap_or_default();
        for (dispatch, short) in [EARLIEST, LATEST] {
            let value = payload.get(dispatch).or_else(|| payload.get(short)).cloned();
            if let Some(value) = value {
                payload.insert(short.to_string(), value.clone());
                payload.insert(dispatch.to_string(), value);
            }
        }

        let call = Call::post(CORRELATION_SEARCH_PATH).json_output().json(Value::Object(payload));
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, CORRELATION_SEARCH.kind, CORRELATION_SEARCH_PATH)
    }

    async fn update(
        &mut self,
        reference: &ResourceRef,
        payload: Value,
        current: &Value,
    ) -> Result<Value> {
        let mut body = Map::new();
        body.insert("name".to_string(), Value::from(reference.id.clone()));
        if let Value::Object(patch) = payload {
            body.extend(patch);
        }
        for (dispatch, short) in [EARLIEST, LATEST] {
            if let Some(value) = body.get(dispatch).cloned() {
                body.insert(short.to_string(), value);
            }
        }

        let scheduled = unwrap_envelope(current).lookup("is_scheduled").and_then(bool_like);
        if body.contains_key("cron_schedule") && scheduled != Some(true) {
            debug!(id = %reference.id, "scheduling search with a new cron schedule");
            body.insert("is_scheduled".to_string(), Value::from("1"));
        }

        let call = Call::post(format!("{CORRELATION_SEARCH_PATH}/{}", quote_plus(&reference.id)))
            .json_output()
            .params(Params::new().with("is_partial_data", "1"))
            .json(Value::Object(body));
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, CORRELATION_SEARCH.kind, &reference.id)
    }

    async fn delete(&mut self, reference: &ResourceRef) -> Result<Value> {
        let call = Call::delete(item_path(reference)).json_output();
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, CORRELATION_SEARCH.kind, &reference.id)
    }

    fn identify(&self, _document: &Value, lookup: &Lookup) -> Option<ResourceRef> {
        match lookup {
            Lookup::Id(id) => Some(ResourceRef::key(id)),
            Lookup::Title(name) => Some(ResourceRef::name(name)),
            Lookup::Unkeyed => None,
        }
    }
}

fn item_path(reference: &ResourceRef) -> String {
    let segment = match reference.kind {
        RefKind::Key => quote_plus(&reference.id),
        RefKind::Name => quote_path(&reference.id),
    };
    format!("{CORRELATION_SEARCH_PATH}/{segment}")
}

#[cfg(test)]
mod tests {
    use itsi_core::testing::ScriptedTransport;
    use itsi_core::{Mode, Reconciler};
    use itsi_domain::{AuthOptions, HttpMethod, Operation};

    use super::*;
    use crate::connection::ItsiConnection;

    type Store = CorrelationSearchStore<ItsiConnection<ScriptedTransport>>;

    fn store() -> (Store, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let connection = ItsiConnection::new(transport.clone(), AuthOptions::with_token("tok"));
        (CorrelationSearchStore::new(ItsiRequest::new(connection)), transport)
    }

    fn entry(content: Value) -> Value {
        json!({"entry": [{"name": "Disk Full", "content": content}]})
    }

    fn body_of(call: &itsi_core::testing::RecordedCall) -> Value {
        serde_json::from_str(&call.body).unwrap()
    }

    #[tokio::test]
    async fn creates_missing_search_by_name() {
        let (store, transport) = store();
        transport.push_text(404, "");
        transport.push_json(200, &json!({"name": "Disk Full"}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Title("Disk Full".into()),
                &json!({"search": "index=os", "earliest_time": "-15m", "disabled": false}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert!(result.changed);
        assert_eq!(result.operation, Operation::Create);
        let calls = transport.calls();
        assert_eq!(calls[0].path, format!("/{CORRELATION_SEARCH_PATH}/Disk%20Full?output_mode=json"));
        assert_eq!(calls[1].method, HttpMethod::Post);
        assert_eq!(calls[1].path, format!("/{CORRELATION_SEARCH_PATH}?output_mode=json"));
        let body = body_of(&calls[1]);
        assert_eq!(body["name"], "Disk Full");
        assert_eq!(body["earliest_time"], "-15m");
        assert_eq!(body["dispatch.earliest_time"], "-15m");
    }

    #[tokio::test]
    async fn create_without_search_is_rejected_before_sending() {
        let (store, transport) = store();
        transport.push_text(404, "");
        let mut reconciler = Reconciler::new(store);

        let err = reconciler
            .ensure_present(&Lookup::Title("New".into()), &json!({"description": "x"}), Mode::Apply)
            .await
            .unwrap_err();

        assert!(matches!(err, ItsiError::Validation(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn unchanged_search_sends_nothing() {
        let (store, transport) = store();
        transport.push_json(
            200,
            &entry(json!({"search": "index=os", "disabled": "0", "dispatch.earliest_time": "-15m"})),
        );
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Title("Disk Full".into()),
                &json!({"search": "index=os", "disabled": false, "earliest_time": "-15m"}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert!(!result.changed);
        assert!(result.diff.is_empty());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn update_posts_partial_data_and_schedules() {
        let (store, transport) = store();
        transport.push_json(200, &entry(json!({"search": "index=os", "is_scheduled": "0"})));
        transport.push_json(200, &json!({}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Id("abc 1".into()),
                &json!({"cron_schedule": "*/5 * * * *", "dispatch.latest_time": "now"}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert_eq!(result.operation, Operation::Update);
        let calls = transport.calls();
        assert_eq!(calls[0].path, format!("/{CORRELATION_SEARCH_PATH}/abc+1?output_mode=json"));
        assert_eq!(
            calls[1].path,
            format!("/{CORRELATION_SEARCH_PATH}/abc+1?output_mode=json&is_partial_data=1")
        );
        let body = body_of(&calls[1]);
        assert_eq!(body["name"], "abc 1");
        assert_eq!(body["is_scheduled"], "1");
        assert_eq!(body["latest_time"], "now");
        assert_eq!(body["dispatch.latest_time"], "now");
        assert!(body.get("search").is_none());
    }

    #[tokio::test]
    async fn delete_by_name_uses_percent_encoding() {
        let (store, transport) = store();
        transport.push_json(200, &entry(json!({"search": "x"})));
        transport.push_text(200, "");
        let mut reconciler = Reconciler::new(store);

        let result =
            reconciler.ensure_absent(&Lookup::Title("Disk Full".into()), Mode::Apply).await.unwrap();

        assert_eq!(result.operation, Operation::Delete);
        let delete = &transport.calls()[1];
        assert_eq!(delete.method, HttpMethod::Delete);
        assert_eq!(delete.path, format!("/{CORRELATION_SEARCH_PATH}/Disk%20Full?output_mode=json"));
    }

    #[tokio::test]
    async fn list_flattens_entries() {
        let (mut store, transport) = store();
        transport.push_json(
            200,
            &json!({"entry": [
                {"name": "a", "content": {"search": "s1"}},
                {"name": "b", "content": {"search": "s2"}},
            ]}),
        );

        let listed = store
            .list(&ListOptions::new().fields(["search"]).filter(r#"{"disabled":0}"#).limit(10))
            .await
            .unwrap();

        let searches = listed["correlation_searches"].as_array().unwrap();
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[1]["search"], "s2");
        assert_eq!(searches[1]["_meta"]["name"], "b");
        assert_eq!(
            transport.calls()[0].path,
            format!(
                "/{CORRELATION_SEARCH_PATH}?output_mode=json&fields=search&filter_data=%7B%22disabled%22%3A0%7D&count=10"
            )
        );
    }

    #[tokio::test]
    async fn get_info_returns_none_when_missing() {
        let (mut store, transport) = store();
        transport.push_text(404, "");

        let found = store.get_info(&Lookup::Id("gone".into()), &[]).await.unwrap();

        assert!(found.is_none());
    }
}
