//! crudkit decoration pipeline.
//!
//! A raw field set from the schema goes through two phases before it is
//! rendered. The sync phase is a pipe of pure stages and re-runs on every
//! change. The async phase loads remote option sets; its stages are awaited
//! one after another, and only changes matching [`needs_async`] re-run it.
//! Decoration never fails: a stage that cannot do its job leaves the field
//! with an empty option set and logs a warning.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info};

use crudkit_api::ModelService;
use crudkit_core::{EngineConfig, FieldChange, FieldDescriptor, FieldSet, FieldType};

pub mod assoc;
pub mod search;
pub mod stages;

pub use assoc::{AttachAssociationDescriptors, LoadAssociationOptions};
pub use search::search_options;
pub use stages::{AttachEnumData, NormalizeTypes, ParseJsonDefaults, ResolveVisibility};

/// Pure transform over the whole field set.
pub trait SyncStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, fields: &FieldSet) -> FieldSet;
}

/// Transform that may suspend on collaborators.
#[async_trait::async_trait]
pub trait AsyncStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, fields: FieldSet) -> FieldSet;
}

#[derive(Default)]
pub struct Pipeline {
    sync: Vec<Box<dyn SyncStage>>,
    asynch: Vec<Box<dyn AsyncStage>>,
}

impl Pipeline {
    pub fn new() -> Self { Self::default() }

    /// Visibility, JSON defaults, enum data, normalisation; then association
    /// options and search bindings.
    pub fn standard(api: Arc<dyn ModelService>, config: EngineConfig) -> Self {
        Self::new()
            .with_sync(ResolveVisibility)
            .with_sync(ParseJsonDefaults)
            .with_sync(AttachEnumData)
            .with_sync(NormalizeTypes)
            .with_async(LoadAssociationOptions::new(api, config.clone()))
            .with_async(AttachAssociationDescriptors::new(config))
    }

    pub fn with_sync(mut self, stage: impl SyncStage + 'static) -> Self { self.sync.push(Box::new(stage)); self }

    pub fn with_async(mut self, stage: impl AsyncStage + 'static) -> Self { self.asynch.push(Box::new(stage)); self }

    pub fn sync_stage_names(&self) -> Vec<&'static str> { self.sync.iter().map(|s| s.name()).collect() }

    pub fn async_stage_names(&self) -> Vec<&'static str> { self.asynch.iter().map(|s| s.name()).collect() }

    pub fn run_sync(&self, fields: &FieldSet) -> FieldSet {
        self.sync.iter().fold(fields.clone(), |acc, stage| {
            let next = stage.apply(&acc);
            debug!(stage = stage.name(), "decorate: sync stage done");
            next
        })
    }

    /// Async stages strictly in sequence; a later stage sees the earlier one's output.
    pub async fn run_async(&self, fields: FieldSet) -> FieldSet {
        let t0 = Instant::now();
        let mut cur = fields;
        for stage in &self.asynch {
            let ts = Instant::now();
            cur = stage.apply(cur).await;
            debug!(stage = stage.name(), took_ms = %ts.elapsed().as_millis(), "decorate: async stage done");
        }
        counter!("decorate_async_runs_total", 1u64);
        histogram!("decorate_async_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(fields = cur.len(), took_ms = %t0.elapsed().as_millis(), "decorate: async pass complete");
        cur
    }

    pub async fn run(&self, fields: &FieldSet) -> FieldSet {
        let synced = self.run_sync(fields);
        self.run_async(synced).await
    }
}

/// Whether a field's changes should refresh remote option sets.
pub fn triggers_async(field: &FieldDescriptor) -> bool {
    field.field_type.is_enum()
        || field.field_type.is_relation()
        || (field.field_type == FieldType::Select && !field.options.foreign_opts.is_empty())
        || field.options.selectable
}

/// Async re-run predicate for a batch of edits. Error-only changes never qualify.
pub fn needs_async(changes: &[FieldChange], fields: &FieldSet) -> bool {
    changes
        .iter()
        .filter(|c| c.value.is_some())
        .filter_map(|c| fields.get(&c.name))
        .any(triggers_async)
}
