//! crudkit schema: turn server-supplied model metadata into field sets and column metadata.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crudkit_core::columns::{ColumnMeta, ConditionType, RelationRef};
use crudkit_core::{Accessible, FieldDescriptor, FieldSet, FieldType};

/// Everything the engine needs to know about one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    pub model_name: String,
    pub fields: FieldSet,
    pub columns: Vec<ColumnMeta>,
}

impl ModelSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> { self.columns.iter().find(|c| c.name == name) }
}

/// Accept identifiers made of alphanumerics, `_`, `-` and single dots (nested keys).
pub fn normalize_field_name(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s.starts_with('.') || s.ends_with('.') || s.contains("..") { return None; }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') { return None; }
    Some(s.to_string())
}

fn parse_field(name_hint: Option<&str>, raw: &Value) -> Result<Option<FieldDescriptor>> {
    let mut obj = raw.as_object().cloned().ok_or_else(|| anyhow!("field entry is not an object"))?;
    let raw_name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| name_hint.map(|s| s.to_string()))
        .unwrap_or_default();
    let name = match normalize_field_name(&raw_name) {
        Some(n) => n,
        None => {
            warn!(name = %raw_name, "schema: skipping field with invalid name");
            return Ok(None);
        }
    };
    obj.insert("name".into(), Value::String(name.clone()));
    if !obj.contains_key("type") {
        obj.insert("type".into(), Value::String("Input".into()));
    }
    let field: FieldDescriptor = serde_json::from_value(Value::Object(obj)).with_context(|| format!("parsing field {}", name))?;
    if let FieldType::Other(tag) = &field.field_type {
        debug!(field = %name, tag = %tag, "schema: unknown field type kept for diagnostics");
    }
    Ok(Some(field))
}

/// Parse the `fields` section: either an ordered list of descriptors or a
/// `{name: {type, options}}` map (map order is layout order).
pub fn parse_fields(v: &Value) -> Result<FieldSet> {
    let mut fields: Vec<FieldDescriptor> = Vec::new();
    match v {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if let Some(f) = parse_field(None, item).with_context(|| format!("fields[{}]", i))? { fields.push(f); }
            }
        }
        Value::Object(map) => {
            for (name, item) in map.iter() {
                if let Some(f) = parse_field(Some(name), item)? { fields.push(f); }
            }
        }
        _ => return Err(anyhow!("fields must be a list or an object")),
    }
    FieldSet::from_fields(fields).context("building field set")
}

fn infer_condition(t: &FieldType) -> Option<ConditionType> {
    match t {
        FieldType::Input | FieldType::TextArea => Some(ConditionType::Like),
        FieldType::Checkbox | FieldType::Switch => Some(ConditionType::Boolean),
        FieldType::Enum | FieldType::EnumFilter => Some(ConditionType::List),
        _ => None,
    }
}

fn sortable(t: &FieldType) -> bool {
    matches!(t, FieldType::Input | FieldType::InputNumber | FieldType::Date | FieldType::DateTime | FieldType::Checkbox | FieldType::Switch | FieldType::Enum)
}

/// Column metadata derived from form fields when the server sends none.
pub fn derive_columns(fields: &FieldSet) -> Vec<ColumnMeta> {
    fields
        .iter()
        .filter(|f| f.options.accessible != Accessible::Hidden)
        .map(|f| {
            let relation = f.foreign_opt().map(|fo| RelationRef {
                model_name: fo.model_name.clone(),
                name: fo.association.name.clone(),
                value: fo.association.value.clone(),
                preview: false,
            });
            ColumnMeta {
                name: f.name.clone(),
                field_type: f.field_type.clone(),
                title: f.options.label.clone(),
                sortable: sortable(&f.field_type),
                condition: infer_condition(&f.field_type),
                relation,
                enum_data: f.options.enum_data.clone(),
                width: None,
            }
        })
        .collect()
}

/// Parse a full model schema document: `{ fields, columns? }`.
pub fn parse_model_schema(model_name: &str, doc: &Value) -> Result<ModelSchema> {
    let fields_v = doc.get("fields").ok_or_else(|| anyhow!("schema for {} has no fields", model_name))?;
    let fields = parse_fields(fields_v).with_context(|| format!("schema for {}", model_name))?;
    let columns = match doc.get("columns") {
        Some(Value::Array(cols)) => {
            let mut out = Vec::with_capacity(cols.len());
            for (i, c) in cols.iter().enumerate() {
                let meta: ColumnMeta = serde_json::from_value(c.clone()).with_context(|| format!("columns[{}] of {}", i, model_name))?;
                out.push(meta);
            }
            out
        }
        Some(_) => return Err(anyhow!("columns for {} must be a list", model_name)),
        None => derive_columns(&fields),
    };
    Ok(ModelSchema { model_name: model_name.to_string(), fields, columns })
}

#[cfg(feature = "yaml")]
pub fn parse_model_schema_yaml(model_name: &str, yaml: &str) -> Result<ModelSchema> {
    let y: serde_yaml::Value = serde_yaml::from_str(yaml).context("parsing schema YAML")?;
    let doc = serde_json::to_value(y).context("converting YAML to JSON")?;
    parse_model_schema(model_name, &doc)
}

/// Populate field values from a server record (edit mode). Fields missing from
/// the record keep their current value.
pub fn apply_record(fields: &FieldSet, record: &Map<String, Value>) -> FieldSet {
    fields.map(|f| {
        let v = record.get(&f.name)?;
        if v == &f.value { return None; }
        Some(FieldDescriptor { value: v.clone(), ..f.clone() })
    })
}
