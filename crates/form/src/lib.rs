//! crudkit form orchestrator.
//!
//! One [`FormOrchestrator`] owns the field set of one open form. It moves
//! through `Initializing → Loading (edit only) → Updating → Done`, and back
//! through `Updating` whenever an edit needs remote option sets refreshed.
//!
//! Async decoration is guarded by monotonic request tokens: a ticket handed
//! out by [`FormOrchestrator::begin_decoration`] is only honoured if no newer
//! ticket was issued in the meantime, so a slow response cannot overwrite
//! newer state.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crudkit_api::{ApiError, EventBus, ModelEvent, ModelEventKind, ModelService, SchemaCache};
use crudkit_core::{CoreError, EngineConfig, FieldChange, FieldDescriptor, FieldOptions, FieldSet, SelectItem};
use crudkit_decorate::{needs_async, Pipeline};
use crudkit_widgets::{DispatchTable, WidgetSpec};

pub mod validate;

pub use validate::validate_field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormState {
    Initializing,
    Loading,
    Updating,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FormMode {
    Insert,
    Edit { id: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("validation failed for: {}", .fields.join(", "))]
    Invalid { fields: Vec<String> },
    #[error("server rejected submission (status {status}) for: {}", .fields.join(", "))]
    Rejected { status: u16, fields: Vec<String> },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("form is closed")]
    Closed,
}

pub type FormResult<T> = Result<T, FormError>;

/// Snapshot handed out for an async decoration pass.
#[derive(Debug, Clone)]
pub struct DecorationTicket {
    pub token: u64,
    pub fields: FieldSet,
}

type CloseCallback = Box<dyn FnMut(&Value) + Send>;

pub struct FormOrchestrator {
    model: String,
    mode: FormMode,
    state: FormState,
    fields: FieldSet,
    api: Arc<dyn ModelService>,
    pipeline: Arc<Pipeline>,
    config: EngineConfig,
    bus: EventBus,
    latest_token: u64,
    has_errors: bool,
    closed: bool,
    on_close: Option<CloseCallback>,
}

impl FormOrchestrator {
    /// A form over `fields` using the standard decoration pipeline and the process-wide bus.
    pub fn new(model: impl Into<String>, fields: FieldSet, api: Arc<dyn ModelService>, mode: FormMode) -> Self {
        let config = EngineConfig::default();
        let pipeline = Arc::new(Pipeline::standard(api.clone(), config.clone()));
        Self {
            model: model.into(),
            mode,
            state: FormState::Initializing,
            fields,
            api,
            pipeline,
            config,
            bus: EventBus::global().clone(),
            latest_token: 0,
            has_errors: false,
            closed: false,
            on_close: None,
        }
    }

    /// Fetch the schema through `cache`, build the form and run [`init`](Self::init).
    pub async fn open(cache: &SchemaCache, api: Arc<dyn ModelService>, model: &str, mode: FormMode) -> FormResult<Self> {
        let schema = cache.get(model).await?;
        let mut form = Self::new(model, schema.fields.clone(), api, mode);
        form.init().await?;
        Ok(form)
    }

    /// Also rebuilds the standard pipeline with the new tunables.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.pipeline = Arc::new(Pipeline::standard(self.api.clone(), config.clone()));
        self.config = config;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Arc<Pipeline>) -> Self { self.pipeline = pipeline; self }

    pub fn with_bus(mut self, bus: EventBus) -> Self { self.bus = bus; self }

    /// Called with the stored entity when an insert-mode form closes after a successful submit.
    pub fn on_close(mut self, f: impl FnMut(&Value) + Send + 'static) -> Self { self.on_close = Some(Box::new(f)); self }

    pub fn model(&self) -> &str { &self.model }
    pub fn mode(&self) -> &FormMode { &self.mode }
    pub fn state(&self) -> FormState { self.state }
    pub fn fields(&self) -> &FieldSet { &self.fields }
    pub fn has_errors(&self) -> bool { self.has_errors }
    pub fn is_closed(&self) -> bool { self.closed }
    pub fn pipeline(&self) -> Arc<Pipeline> { Arc::clone(&self.pipeline) }
    pub fn latest_token(&self) -> u64 { self.latest_token }

    /// Load server values (edit mode) and run the first full decoration pass.
    pub async fn init(&mut self) -> FormResult<()> {
        let t0 = Instant::now();
        self.state = FormState::Initializing;
        if let FormMode::Edit { id } = &self.mode {
            self.state = FormState::Loading;
            let record = match self.api.fetch(&self.model, id).await {
                Ok(r) => r,
                Err(e) => {
                    error!(model = %self.model, error = %e, "form: loading record failed");
                    self.state = FormState::Done;
                    return Err(e.into());
                }
            };
            if let Some(obj) = record.as_object() {
                self.fields = crudkit_schema::apply_record(&self.fields, obj);
            }
        }
        self.fields = self.pipeline.run_sync(&self.fields);
        let ticket = self.begin_decoration();
        let decorated = self.pipeline.run_async(ticket.fields.clone()).await;
        self.complete_decoration(&ticket, decorated);
        info!(model = %self.model, mode = ?self.mode, fields = self.fields.len(), took_ms = %t0.elapsed().as_millis(), "form: ready");
        Ok(())
    }

    /// Merge user edits and re-run the sync stages. Returns a ticket when the
    /// edits call for an async pass; the caller runs it and hands the result
    /// to [`complete_decoration`](Self::complete_decoration).
    ///
    /// Edits to unknown, hidden, readonly or display-only fields are dropped.
    pub fn apply_changes(&mut self, changes: &[FieldChange]) -> FormResult<Option<DecorationTicket>> {
        if self.closed { return Err(FormError::Closed); }
        let accepted: Vec<FieldChange> = changes
            .iter()
            .filter(|c| match self.fields.get(&c.name) {
                Some(f) if f.is_editable() => true,
                Some(_) => {
                    debug!(field = %c.name, "form: edit to non-editable field ignored");
                    false
                }
                None => {
                    warn!(field = %c.name, model = %self.model, "form: edit to unknown field ignored");
                    false
                }
            })
            .cloned()
            .collect();
        if accepted.is_empty() { return Ok(None); }

        let mut next = self.fields.clone();
        for c in &accepted {
            // A new value without explicit errors clears the field's old ones.
            let change = match (&c.value, &c.errors) {
                (Some(_), None) => FieldChange { errors: Some(Vec::new()), ..c.clone() },
                _ => c.clone(),
            };
            next = next.apply_change(&change)?;
        }
        self.fields = self.pipeline.run_sync(&next);
        self.has_errors = self.fields.has_errors();
        if needs_async(&accepted, &self.fields) { Ok(Some(self.begin_decoration())) } else { Ok(None) }
    }

    /// Apply edits and, if needed, run the async pass to completion. Returns
    /// whether an async pass ran.
    pub async fn on_field_change(&mut self, changes: &[FieldChange]) -> FormResult<bool> {
        let Some(ticket) = self.apply_changes(changes)? else { return Ok(false) };
        let decorated = self.pipeline.run_async(ticket.fields.clone()).await;
        self.complete_decoration(&ticket, decorated);
        Ok(true)
    }

    /// Issue a new decoration token; every earlier ticket becomes stale.
    pub fn begin_decoration(&mut self) -> DecorationTicket {
        self.latest_token += 1;
        self.state = FormState::Updating;
        debug!(model = %self.model, token = self.latest_token, "form: decoration started");
        DecorationTicket { token: self.latest_token, fields: self.fields.clone() }
    }

    /// Merge the option sets and search bindings of an async pass. Stale
    /// tickets are discarded and `false` is returned. Values are never taken
    /// from `decorated`, so edits made while the pass ran survive.
    pub fn complete_decoration(&mut self, ticket: &DecorationTicket, decorated: FieldSet) -> bool {
        if ticket.token != self.latest_token {
            debug!(model = %self.model, token = ticket.token, latest = self.latest_token, "form: stale decoration discarded");
            return false;
        }
        self.fields = self.fields.map(|f| {
            let d = decorated.get(&f.name)?;
            if d.select_items == f.select_items && d.options.binding == f.options.binding { return None; }
            Some(FieldDescriptor {
                select_items: d.select_items.clone(),
                options: FieldOptions { binding: d.options.binding.clone(), ..f.options.clone() },
                ..f.clone()
            })
        });
        self.state = FormState::Done;
        true
    }

    /// Validate, upsert, and publish the outcome.
    pub async fn on_submit(&mut self) -> FormResult<Value> {
        if self.closed { return Err(FormError::Closed); }
        let t0 = Instant::now();
        let mut invalid = Vec::new();
        let mut checked = self.fields.clear_errors();
        for f in self.fields.iter() {
            let errs = validate_field(f);
            if errs.is_empty() { continue; }
            invalid.push(f.name.clone());
            checked = checked.apply_change(&FieldChange { name: f.name.clone(), value: None, errors: Some(errs) })?;
        }
        self.fields = checked;
        if !invalid.is_empty() {
            self.has_errors = true;
            counter!("form_submit_rejected_total", 1u64);
            info!(model = %self.model, fields = ?invalid, "form: client validation failed");
            return Err(FormError::Invalid { fields: invalid });
        }

        let mut body = self.fields.values();
        let kind = match &self.mode {
            FormMode::Insert => ModelEventKind::Insert,
            FormMode::Edit { id } => {
                body.insert("id".to_string(), id.clone());
                ModelEventKind::Update
            }
        };
        counter!("form_submit_total", 1u64);
        match self.api.upsert(&self.model, body).await {
            Ok(entity) => {
                self.has_errors = false;
                self.state = FormState::Done;
                let delivered = self.bus.publish(ModelEvent::new(kind, self.model.clone(), entity.clone()));
                info!(model = %self.model, kind = kind.as_str(), delivered, took_ms = %t0.elapsed().as_millis(), "form: submitted");
                match self.mode {
                    FormMode::Insert => {
                        self.closed = true;
                        if let Some(cb) = self.on_close.as_mut() { cb(&entity); }
                    }
                    FormMode::Edit { .. } => {
                        if let Some(obj) = entity.as_object() {
                            self.fields = self.pipeline.run_sync(&crudkit_schema::apply_record(&self.fields, obj));
                        }
                    }
                }
                Ok(entity)
            }
            Err(e) if e.is_validation() => {
                let fields = self.apply_server_errors(&e)?;
                self.has_errors = true;
                counter!("form_submit_rejected_total", 1u64);
                warn!(model = %self.model, status = e.status, fields = ?fields, "form: server rejected submission");
                Err(FormError::Rejected { status: e.status, fields })
            }
            Err(e) => {
                error!(model = %self.model, status = e.status, error = %e, "form: submit failed");
                Err(e.into())
            }
        }
    }

    /// Attach server field errors; a dotted path falls back to its top-level field.
    fn apply_server_errors(&mut self, e: &ApiError) -> FormResult<Vec<String>> {
        let mut touched: Vec<String> = Vec::new();
        let mut next = self.fields.clone();
        for fe in &e.field_errors {
            let target = if next.contains(&fe.field) {
                Some(fe.field.clone())
            } else {
                fe.field.split('.').next().filter(|head| next.contains(head)).map(|s| s.to_string())
            };
            let Some(name) = target else {
                warn!(field = %fe.field, messages = ?fe.messages, "form: server error for unknown field");
                continue;
            };
            let mut errs: Vec<String> = next.get(&name).map(|f| f.errors.iter().cloned().collect()).unwrap_or_default();
            errs.extend(fe.messages.iter().cloned());
            next = next.apply_change(&FieldChange { name: name.clone(), value: None, errors: Some(errs) })?;
            if !touched.contains(&name) { touched.push(name); }
        }
        self.fields = next;
        Ok(touched)
    }

    /// Option search for one select field.
    pub async fn search_options(&self, field: &str, query: &str) -> FormResult<Vec<SelectItem>> {
        let f = self.fields.get(field).ok_or_else(|| CoreError::UnknownField(field.to_string()))?;
        Ok(crudkit_decorate::search_options(self.api.as_ref(), &self.config, f, query).await)
    }

    pub fn widgets(&self, table: &DispatchTable) -> Vec<WidgetSpec> { table.render_form(&self.fields) }

    /// Values the next submit would send.
    pub fn values(&self) -> serde_json::Map<String, Value> { self.fields.values() }
}
