//! Table column generation from schema column metadata.
//!
//! This module provides:
//! - Column metadata as delivered by the schema provider
//! - Column specs (title, data index, sorter, filter UI, cell renderer, width)
//! - `build_columns`, pinning `id` first and timestamps last

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::field::FieldType;
use crate::select::enum_items;

/// Filter condition declared by the schema for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    /// Substring search.
    Like,
    /// Tri-state boolean (true / false-or-null).
    Boolean,
    /// Discrete value set loaded from a distinct-value query.
    List,
}

/// How a relation column resolves a foreign key to a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRef {
    pub model_name: String,
    #[serde(default = "default_rel_name")]
    pub name: String,
    #[serde(default = "default_rel_value")]
    pub value: String,
    #[serde(default)]
    pub preview: bool,
}

fn default_rel_name() -> String { "name".to_string() }
fn default_rel_value() -> String { "id".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, title: None, sortable: false, condition: None, relation: None, enum_data: None, width: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub text: String,
    /// An array value means "any of these".
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterSpec {
    Like { placeholder: String },
    Boolean { options: Vec<FilterOption> },
    /// `loaded` is false until distinct values were fetched.
    List { options: Vec<FilterOption>, loaded: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CellRenderer {
    Text,
    Boolean,
    Date,
    DateTime,
    Image { multiple: bool },
    File { multiple: bool },
    Json,
    Enum { labels: Vec<(String, String)> },
    Relation { name: String, value: String, preview: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub key: String,
    pub title: String,
    pub data_index: String,
    pub sorter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
    pub render: CellRenderer,
    pub width: f32,
}

/// The two options of a boolean column filter.
pub fn boolean_filter() -> FilterSpec {
    FilterSpec::Boolean {
        options: vec![
            FilterOption { text: "true".to_string(), value: json!(true) },
            FilterOption { text: "false".to_string(), value: json!([false, null]) },
        ],
    }
}

fn renderer_for(meta: &ColumnMeta) -> CellRenderer {
    if let Some(rel) = &meta.relation {
        return CellRenderer::Relation { name: rel.name.clone(), value: rel.value.clone(), preview: rel.preview };
    }
    match &meta.field_type {
        FieldType::Checkbox | FieldType::Switch => CellRenderer::Boolean,
        FieldType::Date => CellRenderer::Date,
        FieldType::DateTime => CellRenderer::DateTime,
        FieldType::Image => CellRenderer::Image { multiple: false },
        FieldType::Images => CellRenderer::Image { multiple: true },
        FieldType::File | FieldType::Video => CellRenderer::File { multiple: false },
        FieldType::Files => CellRenderer::File { multiple: true },
        FieldType::SimpleJson | FieldType::Address => CellRenderer::Json,
        FieldType::Enum | FieldType::EnumFilter => {
            let labels = meta
                .enum_data
                .as_ref()
                .map(|d| enum_items(d).into_iter().map(|i| (crate::value::key_string(&i.value), i.label)).collect())
                .unwrap_or_default();
            CellRenderer::Enum { labels }
        }
        _ => CellRenderer::Text,
    }
}

fn filter_for(meta: &ColumnMeta) -> Option<FilterSpec> {
    match meta.condition? {
        ConditionType::Like => Some(FilterSpec::Like { placeholder: format!("Search {}", meta.title.as_deref().unwrap_or(&meta.name)) }),
        ConditionType::Boolean => Some(boolean_filter()),
        ConditionType::List => Some(FilterSpec::List { options: Vec::new(), loaded: false }),
    }
}

fn default_width(meta: &ColumnMeta) -> f32 {
    if meta.name == "id" { return 80.0; }
    if meta.relation.is_some() { return 160.0; }
    match meta.field_type {
        FieldType::Checkbox | FieldType::Switch => 80.0,
        FieldType::Date => 120.0,
        FieldType::DateTime => 170.0,
        FieldType::Image | FieldType::Images | FieldType::Video => 100.0,
        FieldType::Enum | FieldType::EnumFilter => 120.0,
        _ => 200.0,
    }
}

/// Column definition for one metadata entry.
pub fn column_for(meta: &ColumnMeta) -> ColumnSpec {
    ColumnSpec {
        key: meta.name.clone(),
        title: meta.title.clone().unwrap_or_else(|| meta.name.clone()),
        data_index: meta.name.clone(),
        sorter: meta.sortable,
        filter: filter_for(meta),
        render: renderer_for(meta),
        width: meta.width.unwrap_or_else(|| default_width(meta)),
    }
}

fn is_timestamp(name: &str) -> bool { matches!(name, "createdAt" | "updatedAt") }

/// Full column set: `id` first, schema order in between, `createdAt`/`updatedAt` last.
/// Columns for types that never show in tables (passwords, hidden inputs, rich text) are skipped.
pub fn build_columns(metas: &[ColumnMeta]) -> Vec<ColumnSpec> {
    let shown = |m: &&ColumnMeta| !matches!(m.field_type, FieldType::Password | FieldType::Hidden | FieldType::RichText);
    let mut cols: Vec<ColumnSpec> = Vec::with_capacity(metas.len());
    cols.extend(metas.iter().filter(shown).filter(|m| m.name == "id").map(column_for));
    cols.extend(metas.iter().filter(shown).filter(|m| m.name != "id" && !is_timestamp(&m.name)).map(column_for));
    for ts in ["createdAt", "updatedAt"] {
        cols.extend(metas.iter().filter(shown).filter(|m| m.name == ts).map(column_for));
    }
    cols
}
