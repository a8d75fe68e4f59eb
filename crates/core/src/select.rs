//! Select options and order-preserving de-duplication across option lists.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::Association;
use crate::value::key_string;

/// One selectable option of a relation or enum field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: Value,
    pub label: String,
}

impl SelectItem {
    pub fn new(value: Value, label: impl Into<String>) -> Self {
        Self { id: None, key: None, value, label: label.into() }
    }

    /// Build an option from a related record using the association accessors.
    /// Records without the value accessor are skipped.
    pub fn from_record(record: &Value, assoc: &Association) -> Option<Self> {
        let value = record.get(&assoc.value).filter(|v| !v.is_null())?.clone();
        let label = match record.get(&assoc.name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => key_string(&value),
            Some(other) => other.to_string(),
        };
        let id = record.get("id").filter(|v| !v.is_null()).cloned();
        Some(Self { id, key: None, value, label })
    }
}

/// Expand enum data into options. Accepts `{value: label}`, `[[value, label]]`,
/// `[{value, label}]` (or `key`/`name` spellings) and plain `[value]` lists.
pub fn enum_items(data: &Value) -> Vec<SelectItem> {
    match data {
        Value::Object(m) => m
            .iter()
            .map(|(k, label)| {
                let text = match label {
                    Value::String(s) => s.clone(),
                    Value::Null => k.clone(),
                    other => other.to_string(),
                };
                SelectItem { id: None, key: Some(k.clone()), value: Value::String(k.clone()), label: text }
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Array(pair) => {
                    let value = pair.first()?.clone();
                    let label = pair.get(1).map(key_string).unwrap_or_else(|| key_string(&value));
                    Some(SelectItem { id: None, key: Some(key_string(&value)), value, label })
                }
                Value::Object(m) => {
                    let value = m.get("value").or_else(|| m.get("key")).filter(|v| !v.is_null())?.clone();
                    let label = m
                        .get("label")
                        .or_else(|| m.get("name"))
                        .map(key_string)
                        .unwrap_or_else(|| key_string(&value));
                    Some(SelectItem { id: None, key: Some(key_string(&value)), value, label })
                }
                Value::Null => None,
                scalar => Some(SelectItem { id: None, key: Some(key_string(scalar)), value: scalar.clone(), label: key_string(scalar) }),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Key used by [`unique_items`] to detect duplicates.
pub trait DedupKey {
    fn dedup_key(&self) -> String;
}

impl DedupKey for Value {
    /// `id`, then `key`, then the first key name of an object; first element of an
    /// array; otherwise the value itself.
    fn dedup_key(&self) -> String {
        match self {
            Value::Object(m) => {
                if let Some(id) = m.get("id").filter(|v| !v.is_null()) { return key_string(id); }
                if let Some(key) = m.get("key").filter(|v| !v.is_null()) { return key_string(key); }
                match m.keys().next() {
                    Some(first) => first.clone(),
                    None => self.to_string(),
                }
            }
            Value::Array(a) => match a.first() {
                Some(first) => key_string(first),
                None => self.to_string(),
            },
            other => key_string(other),
        }
    }
}

impl DedupKey for SelectItem {
    fn dedup_key(&self) -> String {
        if let Some(id) = &self.id { return key_string(id); }
        if let Some(key) = &self.key { return key.clone(); }
        key_string(&self.value)
    }
}

/// Concatenate `lists`, keeping the first occurrence of every dedup key.
pub fn unique_items<T: DedupKey + Clone>(lists: &[&[T]]) -> Vec<T> {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut out = Vec::new();
    for list in lists {
        for item in list.iter() {
            if seen.insert(item.dedup_key()) {
                out.push(item.clone());
            }
        }
    }
    out
}
