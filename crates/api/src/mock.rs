//! In-memory implementation of the collaborator traits, for tests and the CLI.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::{Map, Value};
use tracing::debug;

use crudkit_core::merge::deep_merge;
use crudkit_core::value::{key_string, loose_eq};

use crate::filter::matches_filters;
use crate::{ApiError, ApiResult, LoadQuery, ModelSchema, ModelService, Page, PageInfo, SchemaProvider, SortOrder};

/// Simple in-memory mock implementation. Records are kept per model; failures
/// and latency can be injected per model.
#[derive(Default)]
pub struct MockApi {
    pub schemas: HashMap<String, ModelSchema>,
    records: Mutex<HashMap<String, Vec<Value>>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_filtered_loads: Mutex<HashSet<String>>,
    load_delays: Mutex<HashMap<String, Duration>>,
    next_upsert_error: Mutex<Option<ApiError>>,
    calls: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
}

impl MockApi {
    pub fn new() -> Self { Self { next_id: AtomicU64::new(1), ..Self::default() } }

    /// Build from a fixture document: `{ "schemas": {model: schemaDoc}, "records": {model: [..]} }`.
    pub fn from_fixture(doc: &Value) -> anyhow::Result<Self> {
        let mut api = Self::new();
        if let Some(schemas) = doc.get("schemas") {
            let schemas = schemas.as_object().ok_or_else(|| anyhow!("fixture schemas must be an object"))?;
            for (model, sdoc) in schemas {
                api.insert_schema_doc(model, sdoc)?;
            }
        }
        if let Some(records) = doc.get("records") {
            let records = records.as_object().ok_or_else(|| anyhow!("fixture records must be an object"))?;
            for (model, rows) in records {
                let rows = rows.as_array().cloned().with_context(|| format!("records of {} must be a list", model))?;
                api = api.with_records(model, rows);
            }
        }
        Ok(api)
    }

    pub fn insert_schema_doc(&mut self, model: &str, doc: &Value) -> anyhow::Result<()> {
        let schema = crudkit_schema::parse_model_schema(model, doc)?;
        self.schemas.insert(model.to_string(), schema);
        Ok(())
    }

    pub fn with_records(self, model: &str, rows: Vec<Value>) -> Self {
        let max_id = rows.iter().filter_map(|r| r.get("id").and_then(|v| v.as_u64())).max().unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        self.lock_records().insert(model.to_string(), rows);
        self
    }

    /// `load_models` and `distinct_values` for `model` fail with 503.
    pub fn fail_loads_for(&self, model: &str) { lock(&self.failing_loads).insert(model.to_string()); }

    /// Only filtered `load_models` calls for `model` fail; plain page loads succeed.
    pub fn fail_filtered_loads_for(&self, model: &str) { lock(&self.failing_filtered_loads).insert(model.to_string()); }

    pub fn delay_loads_for(&self, model: &str, delay: Duration) { lock(&self.load_delays).insert(model.to_string(), delay); }

    /// The next `upsert` fails with `err` instead of storing anything.
    pub fn fail_next_upsert(&self, err: ApiError) { *lock(&self.next_upsert_error) = Some(err); }

    pub fn records(&self, model: &str) -> Vec<Value> { self.lock_records().get(model).cloned().unwrap_or_default() }

    /// Recorded `(operation, model)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, String)> { lock(&self.calls).clone() }

    pub fn call_count(&self, op: &str, model: &str) -> usize {
        lock(&self.calls).iter().filter(|(o, m)| o == op && m == model).count()
    }

    fn record_call(&self, op: &str, model: &str) {
        debug!(op, model, "mock: call");
        lock(&self.calls).push((op.to_string(), model.to_string()));
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> { lock(&self.records) }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

fn project(record: &Value, fields: &[String]) -> Value {
    if fields.is_empty() { return record.clone(); }
    match record {
        Value::Object(m) => Value::Object(fields.iter().filter_map(|f| m.get(f).map(|v| (f.clone(), v.clone()))).collect()),
        other => other.clone(),
    }
}

fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => key_string(a).cmp(&key_string(b)),
    }
}

#[async_trait::async_trait]
impl ModelService for MockApi {
    async fn load_models(&self, model: &str, query: LoadQuery) -> ApiResult<Page> {
        self.record_call("load", model);
        let delay = lock(&self.load_delays).get(model).copied();
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        if lock(&self.failing_loads).contains(model) {
            return Err(ApiError::new(503, format!("loading {} failed", model)));
        }
        if !query.filters.is_empty() && lock(&self.failing_filtered_loads).contains(model) {
            return Err(ApiError::new(503, format!("filtered load of {} failed", model)));
        }
        let mut rows: Vec<Value> = self
            .lock_records()
            .get(model)
            .map(|rows| rows.iter().filter(|r| matches_filters(r, &query.filters)).cloned().collect())
            .unwrap_or_default();
        if let Some(sorter) = &query.sorter {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&sorter.field).unwrap_or(&Value::Null), b.get(&sorter.field).unwrap_or(&Value::Null));
                if sorter.order == SortOrder::Desc { ord.reverse() } else { ord }
            });
        }
        let total = rows.len();
        let size = query.pagination.size.max(1);
        let page = query.pagination.page.max(1);
        let items = rows.iter().skip((page - 1).saturating_mul(size)).take(size).map(|r| project(r, &query.fields)).collect();
        Ok(Page { items, pagination: PageInfo { page, size, total } })
    }

    async fn upsert(&self, model: &str, body: Map<String, Value>) -> ApiResult<Value> {
        self.record_call("upsert", model);
        if let Some(err) = lock(&self.next_upsert_error).take() {
            return Err(err);
        }
        let mut records = self.lock_records();
        let rows = records.entry(model.to_string()).or_default();
        let id = body.get("id").filter(|v| !v.is_null()).cloned();
        if let Some(id) = id {
            if let Some(existing) = rows.iter_mut().find(|r| r.get("id").map(|v| loose_eq(v, &id)).unwrap_or(false)) {
                *existing = deep_merge(existing, &Value::Object(body));
                return Ok(existing.clone());
            }
            return Err(ApiError::not_found(format!("{} {} not found", model, key_string(&id))));
        }
        let mut entity = body;
        entity.insert("id".to_string(), Value::from(self.next_id.fetch_add(1, Ordering::SeqCst)));
        let entity = Value::Object(entity);
        rows.push(entity.clone());
        Ok(entity)
    }

    async fn remove(&self, model: &str, record: &Value) -> ApiResult<()> {
        self.record_call("remove", model);
        let id = record.get("id").cloned().ok_or_else(|| ApiError::new(400, "record has no id"))?;
        let mut records = self.lock_records();
        let rows = records.get_mut(model).ok_or_else(|| ApiError::not_found(format!("model {}", model)))?;
        let before = rows.len();
        rows.retain(|r| !r.get("id").map(|v| loose_eq(v, &id)).unwrap_or(false));
        if rows.len() == before { return Err(ApiError::not_found(format!("{} {} not found", model, key_string(&id)))); }
        Ok(())
    }

    async fn fetch(&self, model: &str, id: &Value) -> ApiResult<Value> {
        self.record_call("fetch", model);
        self.lock_records()
            .get(model)
            .and_then(|rows| rows.iter().find(|r| r.get("id").map(|v| loose_eq(v, id)).unwrap_or(false)).cloned())
            .ok_or_else(|| ApiError::not_found(format!("{} {} not found", model, key_string(id))))
    }

    async fn distinct_values(&self, model: &str, field: &str) -> ApiResult<Vec<Value>> {
        self.record_call("distinct", model);
        if lock(&self.failing_loads).contains(model) {
            return Err(ApiError::new(503, format!("distinct values of {}.{} failed", model, field)));
        }
        let records = self.lock_records();
        let mut out: Vec<Value> = Vec::new();
        for r in records.get(model).map(|v| v.as_slice()).unwrap_or(&[]) {
            let v = r.get(field).cloned().unwrap_or(Value::Null);
            if !out.contains(&v) { out.push(v); }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SchemaProvider for MockApi {
    async fn form_schema(&self, model: &str) -> ApiResult<ModelSchema> {
        self.record_call("schema", model);
        self.schemas.get(model).cloned().ok_or_else(|| ApiError::not_found(format!("no schema for {}", model)))
    }
}
