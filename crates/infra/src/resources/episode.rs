//! Notable event groups (episodes)
//!
//! Episodes are created by the rules engine, never by clients. Only partial
//! updates of existing episodes and read queries are supported.

use async_trait::async_trait;
use itsi_core::{
    CreatePolicy, ExtraFields, FieldSpec, Lookup, ResourceRef, ResourceSchema, ResourceStore,
    UpdateMode,
};
use itsi_domain::{ItsiError, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::{fields_params, list_items, quote_plus, require_found, ListOptions};
use crate::request::{Call, ItsiRequest, RequestChannel};

pub const EPISODE_PATH: &str =
    "servicesNS/nobody/SA-ITOA/event_management_interface/notable_event_group";

pub static EPISODE: ResourceSchema = ResourceSchema {
    kind: "episode",
    fields: &[
        FieldSpec::verbatim("severity"),
        FieldSpec::verbatim("status"),
        FieldSpec::verbatim("owner"),
        FieldSpec::verbatim("instruction"),
    ],
    create_required: &[],
    create_policy: CreatePolicy::Never,
    title_lookup: false,
    update_mode: UpdateMode::Sparse,
    extra_fields: ExtraFields::Open,
};

/// Fields to change on an episode. Unset and null values are left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeUpdate {
    pub severity: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub instruction: Option<String>,
    pub fields: Map<String, Value>,
}

impl EpisodeUpdate {
    /// Desired document for the reconciler.
    ///
    /// # Errors
    /// `Validation` when no field is set.
    pub fn into_desired(self) -> Result<Value> {
        let mut desired = Map::new();
        let named = [
            ("severity", self.severity),
            ("status", self.status),
            ("owner", self.owner),
            ("instruction", self.instruction),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                desired.insert(name.to_string(), Value::from(value));
            }
        }
        desired.extend(self.fields.into_iter().filter(|(_, value)| !value.is_null()));

        if desired.is_empty() {
            return Err(ItsiError::Validation(
                "at least one of severity, status, owner, instruction or fields is required"
                    .to_string(),
            ));
        }
        Ok(Value::Object(desired))
    }
}

#[derive(Debug)]
pub struct EpisodeStore<C> {
    request: ItsiRequest<C>,
}

impl<C: RequestChannel> EpisodeStore<C> {
    pub fn new(request: ItsiRequest<C>) -> Self {
        Self { request }
    }

    pub fn request_mut(&mut self) -> &mut ItsiRequest<C> {
        &mut self.request
    }

    pub fn into_request(self) -> ItsiRequest<C> {
        self.request
    }

    /// `{"episodes": [episode]}`, empty when the episode does not exist.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn get_info(&mut self, id: &str) -> Result<Value> {
        let episodes: Vec<Value> = self.get(id).await?.into_iter().filter(Value::is_object).collect();
        Ok(json!({ "episodes": episodes }))
    }

    /// `{"episodes": [...]}` from the list endpoint. `limit` is sent only
    /// when positive; `offset` goes out as `skip`.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn list(&mut self, options: &ListOptions) -> Result<Value> {
        let params = fields_params(&options.fields)
            .with("limit", options.limit_param())
            .with("skip", options.offset.map_or(Value::Null, Value::from))
            .with("filter_data", options.filter.clone().map_or(Value::Null, Value::from))
            .with("sort_key", options.sort_key.clone().map_or(Value::Null, Value::from))
            .with("sort_dir", options.sort_dir.map_or(Value::Null, Value::from));
        let call = Call::get(format!("{EPISODE_PATH}/")).params(params);

        let episodes = match self.request.fetch(call).await? {
            Some(fetched) => list_items(fetched.body),
            None => Vec::new(),
        };
        debug!(count = episodes.len(), "listed episodes");
        Ok(json!({ "episodes": episodes }))
    }

    /// `{"count": n}`. Unreadable counts are reported as zero.
    ///
    /// # Errors
    /// Any non-2xx status other than 404.
    #[instrument(skip(self))]
    pub async fn count(&mut self, filter: Option<&str>) -> Result<Value> {
        let call = Call::get(format!("{EPISODE_PATH}/count")).param("filter_data", filter.map_or(Value::Null, Value::from));
        let count = match self.request.fetch(call).await? {
            Some(fetched) => fetched.body.get("count").and_then(parse_count).unwrap_or(0),
            None => 0,
        };
        Ok(json!({ "count": count }))
    }
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl<C: RequestChannel> ResourceStore for EpisodeStore<C> {
    fn schema(&self) -> &'static ResourceSchema {
        &EPISODE
    }

    async fn get(&mut self, id: &str) -> Result<Option<Value>> {
        Ok(self.request.fetch(Call::get(item_path(id))).await?.map(|fetched| fetched.body))
    }

    async fn find_by_title(&mut self, title: &str) -> Result<Vec<Value>> {
        Err(ItsiError::Validation(format!(
            "episodes cannot be looked up by title '{title}'; supply the episode id"
        )))
    }

    async fn create(&mut self, _desired: &Value) -> Result<Value> {
        Err(ItsiError::Validation("episodes cannot be created".to_string()))
    }

    async fn update(
        &mut self,
        reference: &ResourceRef,
        payload: Value,
        _current: &Value,
    ) -> Result<Value> {
        let call = Call::post(item_path(&reference.id)).param("is_partial_data", "1").json(payload);
        let fetched = self.request.fetch(call).await?;
        require_found(fetched, EPISODE.kind, &reference.id)
    }

    async fn delete(&mut self, _reference: &ResourceRef) -> Result<Value> {
        Err(ItsiError::Validation("episodes cannot be deleted".to_string()))
    }

    fn identify(&self, _document: &Value, lookup: &Lookup) -> Option<ResourceRef> {
        match lookup {
            Lookup::Id(id) => Some(ResourceRef::key(id)),
            Lookup::Title(_) | Lookup::Unkeyed => None,
        }
    }
}

fn item_path(id: &str) -> String {
    format!("{EPISODE_PATH}/{}", quote_plus(id))
}

#[cfg(test)]
mod tests {
    use itsi_core::testing::ScriptedTransport;
    use itsi_core::{Mode, Reconciler};
    use itsi_domain::{AuthOptions, HttpMethod, Operation};

    use super::*;
    use crate::connection::ItsiConnection;

    type Store = EpisodeStore<ItsiConnection<ScriptedTransport>>;

    fn store() -> (Store, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let connection = ItsiConnection::new(transport.clone(), AuthOptions::with_token("tok"));
        (EpisodeStore::new(ItsiRequest::new(connection)), transport)
    }

    #[test]
    fn empty_update_is_rejected() {
        let err = EpisodeUpdate::default().into_desired().unwrap_err();
        assert!(matches!(err, ItsiError::Validation(_)));

        let mut fields = Map::new();
        fields.insert("note".into(), Value::Null);
        let only_nulls = EpisodeUpdate { fields, ..EpisodeUpdate::default() };
        assert!(only_nulls.into_desired().is_err());
    }

    #[test]
    fn update_merges_named_and_extra_fields() {
        let mut fields = Map::new();
        fields.insert("custom".into(), json!("x"));
        let update = EpisodeUpdate {
            status: Some("2".into()),
            owner: Some("admin".into()),
            fields,
            ..EpisodeUpdate::default()
        };

        assert_eq!(update.into_desired().unwrap(), json!({"status": "2", "owner": "admin", "custom": "x"}));
    }

    #[tokio::test]
    async fn changed_fields_post_partial_data() {
        let (store, transport) = store();
        transport.push_json(200, &json!({"_key": "ep1", "status": "1", "owner": "admin", "title": "t"}));
        transport.push_json(200, &json!({"success": true}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(
                &Lookup::Id("ep1".into()),
                &json!({"status": "2", "owner": "admin", "custom": "x"}),
                Mode::Apply,
            )
            .await
            .unwrap();

        assert_eq!(result.operation, Operation::Update);
        let update = &transport.calls()[1];
        assert_eq!(update.method, HttpMethod::Post);
        assert_eq!(update.path, format!("/{EPISODE_PATH}/ep1?is_partial_data=1"));
        let body: Value = serde_json::from_str(&update.body).unwrap();
        assert_eq!(body, json!({"status": "2", "custom": "x"}));
    }

    #[tokio::test]
    async fn matching_fields_send_nothing() {
        let (store, transport) = store();
        transport.push_json(200, &json!({"_key": "ep1", "severity": "4"}));
        let mut reconciler = Reconciler::new(store);

        let result = reconciler
            .ensure_present(&Lookup::Id("ep1".into()), &json!({"severity": 4}), Mode::Apply)
            .await
            .unwrap();

        assert!(!result.changed);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_episode_is_not_found() {
        let (store, transport) = store();
        transport.push_text(404, "");
        let mut reconciler = Reconciler::new(store);

        let err = reconciler
            .ensure_present(&Lookup::Id("gone".into()), &json!({"status": "2"}), Mode::Apply)
            .await
            .unwrap_err();

        assert!(matches!(err, ItsiError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_passes_paging_and_sorting() {
        let (mut store, transport) = store();
        transport.push_json(200, &json!([{"_key": "ep1"}, {"_key": "ep2"}]));

        let listed = store
            .list(&ListOptions::new().limit(20).offset(0).sort("mod_time", true).filter(r#"{"status":"2"}"#))
            .await
            .unwrap();

        assert_eq!(listed["episodes"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            transport.calls()[0].path,
            format!(
                "/{EPISODE_PATH}/?limit=20&skip=0&filter_data=%7B%22status%22%3A%222%22%7D&sort_key=mod_time&sort_dir=0&output_mode=json"
            )
        );
    }

    #[tokio::test]
    async fn count_reads_string_and_number() {
        let (mut store, transport) = store();
        transport.push_json(200, &json!({"count": "17"}));
        transport.push_json(200, &json!({"count": 3}));
        transport.push_json(200, &json!({"total": 3}));

        assert_eq!(store.count(Some(r#"{"status":"2"}"#)).await.unwrap(), json!({"count": 17}));
        assert_eq!(store.count(None).await.unwrap(), json!({"count": 3}));
        assert_eq!(store.count(None).await.unwrap(), json!({"count": 0}));
        assert_eq!(transport.calls()[1].path, format!("/{EPISODE_PATH}/count?output_mode=json"));
    }

    #[tokio::test]
    async fn get_info_wraps_single_episode() {
        let (mut store, transport) = store();
        transport.push_json(200, &json!({"_key": "ep1"}));
        transport.push_text(404, "");

        assert_eq!(store.get_info("ep1").await.unwrap()["episodes"][0]["_key"], "ep1");
        assert_eq!(store.get_info("ep2").await.unwrap(), json!({"episodes": []}));
    }
}
