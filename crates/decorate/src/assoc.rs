//! Async stages: association option loading and search binding attachment.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::counter;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crudkit_api::{ApiResult, LoadQuery, ModelService, Pagination};
use crudkit_core::value::key_string;
use crudkit_core::{unique_items, AssociationBinding, EngineConfig, FieldDescriptor, FieldSet, ForeignOpt, SelectItem};

use crate::AsyncStage;

/// Fields whose options come from another model.
fn relation_source(f: &FieldDescriptor) -> Option<&ForeignOpt> {
    if f.is_hidden() { return None; }
    f.foreign_opt()
}

/// Currently selected values of a relation field.
fn selected_values(v: &Value) -> Vec<Value> {
    match v {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter(|i| !i.is_null()).cloned().collect(),
        single => vec![single.clone()],
    }
}

/// Loads one page of related records per relation field and replaces
/// `select_items` with it. Selected values missing from that page are fetched
/// with an `$in` query so their labels can be shown; earlier options survive
/// only while selected.
pub struct LoadAssociationOptions {
    api: Arc<dyn ModelService>,
    config: EngineConfig,
}

impl LoadAssociationOptions {
    pub fn new(api: Arc<dyn ModelService>, config: EngineConfig) -> Self { Self { api, config } }

    async fn load_field(&self, field: &FieldDescriptor, opt: &ForeignOpt) -> ApiResult<Vec<SelectItem>> {
        let assoc = &opt.association;
        let query = LoadQuery {
            pagination: Pagination { page: 1, size: self.config.options_page_size },
            fields: assoc.select_fields(),
            ..LoadQuery::default()
        };
        let page = self.api.load_models(&opt.model_name, query).await?;
        let loaded: Vec<SelectItem> = page.items.iter().filter_map(|r| SelectItem::from_record(r, assoc)).collect();

        let selected_keys: Vec<String> = selected_values(&field.value).iter().map(key_string).collect();
        let kept: Vec<SelectItem> = field.select_items.iter().filter(|i| selected_keys.contains(&key_string(&i.value))).cloned().collect();
        let missing: Vec<Value> = selected_values(&field.value)
            .into_iter()
            .filter(|v| {
                let k = key_string(v);
                !loaded.iter().chain(kept.iter()).any(|i| key_string(&i.value) == k)
            })
            .collect();
        let mut selected = Vec::new();
        if !missing.is_empty() {
            let size = missing.len();
            let mut filters = Map::new();
            filters.insert(assoc.value.clone(), json!({ "$in": missing }));
            let query = LoadQuery {
                filters,
                pagination: Pagination { page: 1, size },
                fields: assoc.select_fields(),
                ..LoadQuery::default()
            };
            match self.api.load_models(&opt.model_name, query).await {
                Ok(page) => selected = page.items.iter().filter_map(|r| SelectItem::from_record(r, assoc)).collect(),
                Err(e) => warn!(field = %field.name, model = %opt.model_name, missing = size, error = %e, "decorate: selected options unavailable"),
            }
        }
        Ok(unique_items(&[&loaded[..], &selected[..], &kept[..]]))
    }
}

#[async_trait::async_trait]
impl AsyncStage for LoadAssociationOptions {
    fn name(&self) -> &'static str { "load_association_options" }

    async fn apply(&self, fields: FieldSet) -> FieldSet {
        if !fields.iter().any(|f| relation_source(f).is_some()) { return fields; }
        let targets: Vec<(&FieldDescriptor, &ForeignOpt)> = fields.iter().filter_map(|f| relation_source(f).map(|o| (f, o))).collect();
        let t0 = Instant::now();
        let results = join_all(targets.iter().map(|(f, opt)| async move {
            let res = self.load_field(f, opt).await;
            (f.name.clone(), opt.model_name.clone(), res)
        }))
        .await;
        debug!(fields = results.len(), took_ms = %t0.elapsed().as_millis(), "decorate: association options loaded");

        let mut loaded: Vec<(String, Vec<SelectItem>)> = Vec::with_capacity(results.len());
        for (name, model, res) in results {
            match res {
                Ok(items) => loaded.push((name, items)),
                Err(e) => {
                    counter!("decorate_assoc_load_failures_total", 1u64);
                    warn!(field = %name, model = %model, status = e.status, error = %e, "decorate: association options unavailable");
                    loaded.push((name, Vec::new()));
                }
            }
        }
        fields.map(|f| {
            let (_, items) = loaded.iter().find(|(n, _)| *n == f.name)?;
            if *items == f.select_items { return None; }
            Some(FieldDescriptor { select_items: items.clone(), ..f.clone() })
        })
    }
}

/// Attaches the remote search binding used by select widgets.
pub struct AttachAssociationDescriptors {
    config: EngineConfig,
}

impl AttachAssociationDescriptors {
    pub fn new(config: EngineConfig) -> Self { Self { config } }

    pub fn binding_for(&self, opt: &ForeignOpt) -> AssociationBinding {
        AssociationBinding {
            model_name: opt.model_name.clone(),
            label_field: opt.association.name.clone(),
            value_field: opt.association.value.clone(),
            fields: opt.association.fields.clone(),
            debounce_ms: self.config.search_debounce_ms,
        }
    }
}

#[async_trait::async_trait]
impl AsyncStage for AttachAssociationDescriptors {
    fn name(&self) -> &'static str { "attach_association_descriptors" }

    async fn apply(&self, fields: FieldSet) -> FieldSet {
        fields.map(|f| {
            let binding = self.binding_for(relation_source(f)?);
            if f.options.binding.as_ref() == Some(&binding) { return None; }
            let mut next = f.clone();
            next.options.binding = Some(binding);
            Some(next)
        })
    }
}
