//! A table bound to one model that refreshes on model events.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crudkit_api::{ApiResult, EventBus, LoadQuery, ModelEvent, ModelEventKind, ModelService, Page, Pagination, Sorter, Subscription};
use crudkit_core::columns::{build_columns, ColumnMeta, ColumnSpec};

use crate::cells::{load_related, render_row, Cell, RelatedRecords};
use crate::filters::{filters_to_query, load_list_filters};

pub struct TableView {
    model: String,
    metas: Vec<ColumnMeta>,
    columns: Vec<ColumnSpec>,
    api: Arc<dyn ModelService>,
    bus: EventBus,
    events: Subscription,
    active_filters: Map<String, Value>,
    sorter: Option<Sorter>,
    pagination: Pagination,
    page: Page,
    related: RelatedRecords,
}

impl TableView {
    /// Subscribes to `bus`; dropping the view unsubscribes.
    pub fn new(model: impl Into<String>, metas: Vec<ColumnMeta>, api: Arc<dyn ModelService>, bus: EventBus) -> Self {
        let columns = build_columns(&metas);
        let events = bus.subscribe();
        Self {
            model: model.into(),
            metas,
            columns,
            api,
            bus,
            events,
            active_filters: Map::new(),
            sorter: None,
            pagination: Pagination::default(),
            page: Page::default(),
            related: RelatedRecords::default(),
        }
    }

    pub fn model(&self) -> &str { &self.model }
    pub fn columns(&self) -> &[ColumnSpec] { &self.columns }
    pub fn page(&self) -> &Page { &self.page }
    pub fn items(&self) -> &[Value] { &self.page.items }

    pub fn set_filters(&mut self, active: Map<String, Value>) {
        self.active_filters = active;
        self.pagination.page = 1;
    }

    pub fn set_sorter(&mut self, sorter: Option<Sorter>) { self.sorter = sorter; }

    pub fn set_pagination(&mut self, pagination: Pagination) { self.pagination = pagination; }

    /// Query the next load would send.
    pub fn query(&self) -> LoadQuery {
        LoadQuery {
            filters: filters_to_query(&self.columns, &self.active_filters),
            sorter: self.sorter.clone(),
            pagination: self.pagination,
            relations: self.metas.iter().filter(|m| m.relation.is_some()).map(|m| m.name.clone()).collect(),
            fields: Vec::new(),
        }
    }

    /// Fill list filters with distinct values.
    pub async fn load_filters(&mut self) {
        let columns = std::mem::take(&mut self.columns);
        self.columns = load_list_filters(self.api.as_ref(), &self.model, columns).await;
    }

    /// Load the current page and the related records its relation columns reference.
    pub async fn load(&mut self) -> ApiResult<&Page> {
        let t0 = Instant::now();
        let page = self.api.load_models(&self.model, self.query()).await?;
        self.related = load_related(self.api.as_ref(), &self.metas, &page.items).await;
        info!(model = %self.model, items = page.items.len(), total = page.pagination.total, took_ms = %t0.elapsed().as_millis(), "table: page loaded");
        self.page = page;
        // Events caused by our own load are stale now.
        self.events.drain();
        Ok(&self.page)
    }

    /// Whether an insert/update/delete of this model was published since the last load.
    pub fn needs_refresh(&mut self) -> bool {
        let model = self.model.clone();
        let relevant = self.events.drain().into_iter().filter(|ev| ev.model_name == model).count();
        if relevant > 0 { debug!(model = %model, events = relevant, "table: refresh needed"); }
        relevant > 0
    }

    /// Reload if [`needs_refresh`](Self::needs_refresh); returns whether it did.
    pub async fn refresh_if_needed(&mut self) -> ApiResult<bool> {
        if !self.needs_refresh() { return Ok(false); }
        self.load().await?;
        Ok(true)
    }

    /// Remove a record and announce it with `MODEL_DELETE`.
    pub async fn remove(&mut self, record: &Value) -> ApiResult<()> {
        self.api.remove(&self.model, record).await?;
        self.bus.publish(ModelEvent::new(ModelEventKind::Delete, self.model.clone(), record.clone()));
        Ok(())
    }

    pub fn rows(&self) -> Vec<Vec<Cell>> {
        self.page.items.iter().map(|r| render_row(&self.columns, r, &self.related)).collect()
    }
}
