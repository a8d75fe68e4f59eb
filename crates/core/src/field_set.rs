//! Ordered, persistent field sets.
//!
//! A `FieldSet` is never mutated in place by callers: every update returns a new
//! set. Descriptors are held behind `Arc`, so untouched fields are shared
//! between the old and the new set.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::field::{FieldDescriptor, FieldType};
use crate::{CoreError, CoreResult};

/// A user edit (or validation result) for a single field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl FieldChange {
    pub fn value(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), value: Some(value), errors: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<Arc<FieldDescriptor>>,
    index: FxHashMap<String, usize>,
}

impl FieldSet {
    pub fn new() -> Self { Self::default() }

    /// Build a set in the given (layout) order. Names must be unique.
    pub fn from_fields<I: IntoIterator<Item = FieldDescriptor>>(fields: I) -> CoreResult<Self> {
        let mut out = Self::default();
        for f in fields {
            if out.index.contains_key(&f.name) {
                return Err(CoreError::DuplicateField(f.name));
            }
            out.index.insert(f.name.clone(), out.fields.len());
            out.fields.push(Arc::new(f));
        }
        Ok(out)
    }

    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
    pub fn contains(&self, name: &str) -> bool { self.index.contains_key(name) }
    pub fn position(&self, name: &str) -> Option<usize> { self.index.get(name).copied() }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| self.fields[i].as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ { self.fields.iter().map(|f| f.as_ref()) }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ { self.fields.iter().map(|f| f.name.as_str()) }

    /// Fields taking part in layout, in order.
    pub fn visible(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ { self.iter().filter(|f| !f.is_hidden()) }

    /// Current value of a field, `Null` when absent.
    pub fn value_of(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.get(name).map(|f| &f.value).unwrap_or(&NULL)
    }

    /// Like [`value_of`](Self::value_of), with untouched nulls falling back to `defaultValue`.
    pub fn effective_value_of(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.get(name).map(|f| f.effective_value()).unwrap_or(&NULL)
    }

    /// Copy-on-write update of one field.
    pub fn update<F>(&self, name: &str, f: F) -> CoreResult<FieldSet>
    where
        F: FnOnce(&mut FieldDescriptor),
    {
        let i = self.position(name).ok_or_else(|| CoreError::UnknownField(name.to_string()))?;
        let mut out = self.clone();
        let slot = Arc::make_mut(&mut out.fields[i]);
        f(slot);
        slot.name = name.to_string();
        Ok(out)
    }

    /// Rebuild the set, replacing only the fields for which `f` returns a new descriptor.
    pub fn map<F>(&self, mut f: F) -> FieldSet
    where
        F: FnMut(&FieldDescriptor) -> Option<FieldDescriptor>,
    {
        let fields = self
            .fields
            .iter()
            .map(|cur| match f(cur) {
                Some(mut next) => {
                    next.name = cur.name.clone();
                    Arc::new(next)
                }
                None => Arc::clone(cur),
            })
            .collect();
        FieldSet { fields, index: self.index.clone() }
    }

    /// Merge a change's `value`/`errors` into the named field.
    pub fn apply_change(&self, change: &FieldChange) -> CoreResult<FieldSet> {
        self.update(&change.name, |f| {
            if let Some(v) = &change.value {
                f.value = v.clone();
                f.touched = true;
            }
            if let Some(errs) = &change.errors { f.errors = errs.iter().cloned().collect(); }
        })
    }

    /// Whether `name` is the very same (shared) descriptor in both sets.
    pub fn shares_field(&self, other: &FieldSet, name: &str) -> bool {
        match (self.position(name), other.position(name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&self.fields[a], &other.fields[b]),
            _ => false,
        }
    }

    /// Values submitted to the server: hidden fields and display-only `Plain` fields are left out.
    pub fn values(&self) -> Map<String, Value> {
        self.iter()
            .filter(|f| !f.is_hidden() && f.field_type != FieldType::Plain)
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }

    pub fn has_errors(&self) -> bool { self.iter().any(|f| f.has_errors()) }

    pub fn clear_errors(&self) -> FieldSet {
        self.map(|f| if f.has_errors() { Some(FieldDescriptor { errors: Default::default(), ..f.clone() }) } else { None })
    }
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for FieldSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Vec::<FieldDescriptor>::deserialize(deserializer)?;
        FieldSet::from_fields(fields).map_err(serde::de::Error::custom)
    }
}
