//! Schema cache: schemas are fetched once per model and then served synchronously.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tracing::info;

use crate::{ApiResult, ModelSchema, SchemaProvider};

type SchemaMap = FxHashMap<String, Arc<ModelSchema>>;

pub struct SchemaCache {
    provider: Arc<dyn SchemaProvider>,
    map: ArcSwap<SchemaMap>,
}

impl SchemaCache {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self { provider, map: ArcSwap::from_pointee(SchemaMap::default()) }
    }

    /// Cached schema, if it was loaded before.
    pub fn cached(&self, model: &str) -> Option<Arc<ModelSchema>> { self.map.load().get(model).cloned() }

    /// Cached schema or a fresh load through the provider.
    pub async fn get(&self, model: &str) -> ApiResult<Arc<ModelSchema>> {
        if let Some(s) = self.cached(model) { return Ok(s); }
        let t0 = Instant::now();
        let schema = Arc::new(self.provider.form_schema(model).await?);
        let key = model.to_string();
        self.map.rcu(|cur| {
            let mut next = SchemaMap::clone(cur);
            next.entry(key.clone()).or_insert_with(|| Arc::clone(&schema));
            next
        });
        counter!("schema_loads_total", 1u64);
        histogram!("schema_load_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(model = %model, fields = schema.fields.len(), took_ms = %t0.elapsed().as_millis(), "schema: loaded");
        // A concurrent load may have won the race; serve whatever is stored.
        Ok(self.cached(model).unwrap_or(schema))
    }

    pub fn invalidate(&self, model: &str) {
        self.map.rcu(|cur| {
            let mut next = SchemaMap::clone(cur);
            next.remove(model);
            next
        });
    }
}
