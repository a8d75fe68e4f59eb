//! Cell rendering, including relation label resolution.

use chrono::{DateTime, NaiveDate};
use futures::future::join_all;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crudkit_api::{LoadQuery, ModelService, Pagination};
use crudkit_core::columns::{CellRenderer, ColumnMeta, ColumnSpec};
use crudkit_core::value::{display_text, key_string};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Cell {
    Text { text: String },
    Bool { value: Option<bool> },
    Assets { urls: Vec<String>, multiple: bool },
    /// `preview` carries the full related record when the column asks for it.
    Relation { label: String, value: Value, preview: Option<Value> },
}

/// Related records per relation column, keyed by the value accessor.
#[derive(Debug, Clone, Default)]
pub struct RelatedRecords {
    by_column: FxHashMap<String, FxHashMap<String, Value>>,
}

impl RelatedRecords {
    pub fn insert(&mut self, column: &str, key: &Value, record: Value) {
        self.by_column.entry(column.to_string()).or_default().insert(key_string(key), record);
    }

    pub fn get(&self, column: &str, key: &Value) -> Option<&Value> {
        self.by_column.get(column).and_then(|m| m.get(&key_string(key)))
    }

    pub fn len(&self) -> usize { self.by_column.values().map(|m| m.len()).sum() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

fn foreign_keys(items: &[Value], column: &str, value_field: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut push = |v: &Value| {
        let key = match v {
            Value::Object(m) => m.get(value_field).cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        if !key.is_null() && !out.iter().any(|k| key_string(k) == key_string(&key)) { out.push(key); }
    };
    for item in items {
        match item.get(column) {
            Some(Value::Array(vs)) => vs.iter().for_each(&mut push),
            Some(v) => push(v),
            None => {}
        }
    }
    out
}

/// Fetch the related records referenced by `items` for every relation column,
/// one `$in` query per column. Columns whose lookup fails render raw keys.
pub async fn load_related(api: &dyn ModelService, metas: &[ColumnMeta], items: &[Value]) -> RelatedRecords {
    let lookups: Vec<(&ColumnMeta, Vec<Value>)> = metas
        .iter()
        .filter_map(|m| {
            let rel = m.relation.as_ref()?;
            let keys = foreign_keys(items, &m.name, &rel.value);
            (!keys.is_empty()).then_some((m, keys))
        })
        .collect();
    let results = join_all(lookups.iter().map(|(m, keys)| async move {
        let rel = m.relation.as_ref()?;
        let size = keys.len();
        let mut filters = Map::new();
        filters.insert(rel.value.clone(), json!({ "$in": keys }));
        let query = LoadQuery { filters, pagination: Pagination { page: 1, size }, ..LoadQuery::default() };
        Some(api.load_models(&rel.model_name, query).await)
    }))
    .await;

    let mut related = RelatedRecords::default();
    for ((meta, _), res) in lookups.iter().zip(results) {
        let Some(rel) = meta.relation.as_ref() else { continue };
        match res {
            Some(Ok(page)) => {
                for record in page.items {
                    if let Some(key) = record.get(&rel.value).cloned() {
                        related.insert(&meta.name, &key, record);
                    }
                }
            }
            Some(Err(e)) => warn!(column = %meta.name, model = %rel.model_name, error = %e, "table: related records unavailable"),
            None => {}
        }
    }
    related
}

fn asset_urls(v: &Value) -> Vec<String> {
    match v {
        Value::Array(a) => a.iter().flat_map(asset_urls).collect(),
        Value::Object(m) => m.get("url").and_then(|u| u.as_str()).map(|s| vec![s.to_string()]).unwrap_or_default(),
        Value::String(s) if !s.is_empty() => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        _ => Vec::new(),
    }
}

fn format_date(v: &Value, with_time: bool) -> String {
    let Some(s) = v.as_str() else { return display_text(v) };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return if with_time { dt.format("%Y-%m-%d %H:%M").to_string() } else { dt.format("%Y-%m-%d").to_string() };
    }
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(d) => d.format("%Y-%m-%d").to_string(),
        Err(_) => s.to_string(),
    }
}

fn relation_cell(col: &ColumnSpec, raw: &Value, name: &str, value: &str, preview: bool, related: &RelatedRecords) -> Cell {
    let resolve = |v: &Value| -> (String, Value, Option<Value>) {
        match v {
            Value::Object(m) => {
                let key = m.get(value).cloned().unwrap_or(Value::Null);
                let label = m.get(name).map(display_text).unwrap_or_else(|| key_string(&key));
                (label, key, preview.then(|| v.clone()))
            }
            key => match related.get(&col.key, key) {
                Some(rec) => {
                    let label = rec.get(name).map(display_text).unwrap_or_else(|| key_string(key));
                    (label, key.clone(), preview.then(|| rec.clone()))
                }
                None => (key_string(key), key.clone(), None),
            },
        }
    };
    match raw {
        Value::Array(items) => {
            let resolved: Vec<_> = items.iter().map(resolve).collect();
            let label = resolved.iter().map(|(l, _, _)| l.as_str()).collect::<Vec<_>>().join(", ");
            let value = Value::Array(resolved.iter().map(|(_, k, _)| k.clone()).collect());
            let previews: Vec<Value> = resolved.into_iter().filter_map(|(_, _, p)| p).collect();
            let preview = (!previews.is_empty()).then_some(Value::Array(previews));
            Cell::Relation { label, value, preview }
        }
        Value::Null => Cell::Relation { label: String::new(), value: Value::Null, preview: None },
        v => {
            let (label, value, preview) = resolve(v);
            Cell::Relation { label, value, preview }
        }
    }
}

/// Render one cell of `record` for `col`.
pub fn render_cell(col: &ColumnSpec, record: &Value, related: &RelatedRecords) -> Cell {
    let raw = record.get(&col.data_index).unwrap_or(&Value::Null);
    match &col.render {
        CellRenderer::Text => Cell::Text { text: display_text(raw) },
        CellRenderer::Boolean => Cell::Bool { value: raw.as_bool() },
        CellRenderer::Date => Cell::Text { text: format_date(raw, false) },
        CellRenderer::DateTime => Cell::Text { text: format_date(raw, true) },
        CellRenderer::Image { multiple } | CellRenderer::File { multiple } => Cell::Assets { urls: asset_urls(raw), multiple: *multiple },
        CellRenderer::Json => Cell::Text { text: if raw.is_null() { String::new() } else { raw.to_string() } },
        CellRenderer::Enum { labels } => {
            let k = key_string(raw);
            let text = labels.iter().find(|(key, _)| *key == k).map(|(_, l)| l.clone()).unwrap_or_else(|| display_text(raw));
            Cell::Text { text }
        }
        CellRenderer::Relation { name, value, preview } => relation_cell(col, raw, name, value, *preview, related),
    }
}

/// Render a full row in column order.
pub fn render_row(columns: &[ColumnSpec], record: &Value, related: &RelatedRecords) -> Vec<Cell> {
    columns.iter().map(|c| render_cell(c, record, related)).collect()
}
