//! Field descriptors: one form field's metadata, options and current value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::select::SelectItem;
use crate::value::{is_truthy, loose_eq};
use crate::CoreError;

/// Closed set of field type tags understood by the engine.
///
/// Tags the engine does not know are kept as `Other` so a schema with a newer
/// widget type still parses; dispatch renders a diagnostic for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Input,
    InputNumber,
    TextArea,
    Password,
    Checkbox,
    Switch,
    Date,
    DateTime,
    Image,
    Images,
    File,
    Files,
    Video,
    Select,
    Association,
    ManyToMany,
    Enum,
    EnumFilter,
    Address,
    RichText,
    SimpleJson,
    Hidden,
    Plain,
    Other(String),
}

/// Every known tag, in declaration order.
pub const KNOWN_TYPES: &[FieldType] = &[
    FieldType::Input,
    FieldType::InputNumber,
    FieldType::TextArea,
    FieldType::Password,
    FieldType::Checkbox,
    FieldType::Switch,
    FieldType::Date,
    FieldType::DateTime,
    FieldType::Image,
    FieldType::Images,
    FieldType::File,
    FieldType::Files,
    FieldType::Video,
    FieldType::Select,
    FieldType::Association,
    FieldType::ManyToMany,
    FieldType::Enum,
    FieldType::EnumFilter,
    FieldType::Address,
    FieldType::RichText,
    FieldType::SimpleJson,
    FieldType::Hidden,
    FieldType::Plain,
];

impl FieldType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "Input" | "String" | "input" => FieldType::Input,
            "InputNumber" | "Number" | "number" => FieldType::InputNumber,
            "TextArea" | "Text" | "textarea" => FieldType::TextArea,
            "Password" => FieldType::Password,
            "Checkbox" | "Boolean" => FieldType::Checkbox,
            "Switch" => FieldType::Switch,
            "Date" => FieldType::Date,
            "DateTime" => FieldType::DateTime,
            "Image" => FieldType::Image,
            "Images" => FieldType::Images,
            "File" => FieldType::File,
            "Files" => FieldType::Files,
            "Video" => FieldType::Video,
            "Select" => FieldType::Select,
            "Association" => FieldType::Association,
            "ManyToMany" => FieldType::ManyToMany,
            "Enum" => FieldType::Enum,
            "EnumFilter" => FieldType::EnumFilter,
            "Address" => FieldType::Address,
            "RichText" => FieldType::RichText,
            "SimpleJSON" | "SimpleJson" | "JSON" => FieldType::SimpleJson,
            "Hidden" => FieldType::Hidden,
            "Plain" => FieldType::Plain,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Input => "Input",
            FieldType::InputNumber => "InputNumber",
            FieldType::TextArea => "TextArea",
            FieldType::Password => "Password",
            FieldType::Checkbox => "Checkbox",
            FieldType::Switch => "Switch",
            FieldType::Date => "Date",
            FieldType::DateTime => "DateTime",
            FieldType::Image => "Image",
            FieldType::Images => "Images",
            FieldType::File => "File",
            FieldType::Files => "Files",
            FieldType::Video => "Video",
            FieldType::Select => "Select",
            FieldType::Association => "Association",
            FieldType::ManyToMany => "ManyToMany",
            FieldType::Enum => "Enum",
            FieldType::EnumFilter => "EnumFilter",
            FieldType::Address => "Address",
            FieldType::RichText => "RichText",
            FieldType::SimpleJson => "SimpleJSON",
            FieldType::Hidden => "Hidden",
            FieldType::Plain => "Plain",
            FieldType::Other(tag) => tag,
        }
    }

    pub fn is_relation(&self) -> bool { matches!(self, FieldType::Association | FieldType::ManyToMany) }

    pub fn is_enum(&self) -> bool { matches!(self, FieldType::Enum | FieldType::EnumFilter) }

    pub fn is_media(&self) -> bool {
        matches!(self, FieldType::Image | FieldType::Images | FieldType::File | FieldType::Files | FieldType::Video)
    }

    /// Media types holding a list of assets rather than a single one.
    pub fn is_multi_media(&self) -> bool { matches!(self, FieldType::Images | FieldType::Files) }

    /// Types whose value is structured and may arrive JSON-encoded in a string.
    pub fn holds_json(&self) -> bool {
        matches!(self, FieldType::SimpleJson | FieldType::Address | FieldType::RichText | FieldType::Images | FieldType::Files)
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self { FieldType::parse(&s) }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self { t.as_str().to_string() }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Per-field visibility/editability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessible {
    #[default]
    Normal,
    Readonly,
    Hidden,
}

/// Condition on another field's current value, used by `showWhen`/`hideWhen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRule {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truthy: bool,
}

impl VisibilityRule {
    /// With no explicit condition the rule matches a truthy value.
    pub fn matches(&self, value: &Value) -> bool {
        if let Some(expected) = &self.equals {
            return loose_eq(value, expected);
        }
        if let Some(set) = &self.one_of {
            return set.iter().any(|c| loose_eq(value, c));
        }
        is_truthy(value)
    }
}

/// Accessor pair describing how related records map to options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Field of the related record used as the display label.
    #[serde(default = "default_assoc_name")]
    pub name: String,
    /// Field of the related record stored as this field's value.
    #[serde(default = "default_assoc_value")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

fn default_assoc_name() -> String { "name".to_string() }
fn default_assoc_value() -> String { "id".to_string() }

impl Default for Association {
    fn default() -> Self { Self { name: default_assoc_name(), value: default_assoc_value(), fields: Vec::new() } }
}

impl Association {
    /// Fields to select when loading related records: value, label, then extras.
    pub fn select_fields(&self) -> Vec<String> {
        let mut out = vec![self.value.clone()];
        if self.name != self.value { out.push(self.name.clone()); }
        for f in &self.fields {
            if !out.contains(f) { out.push(f.clone()); }
        }
        out
    }
}

/// Remote option source for a relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignOpt {
    pub model_name: String,
    #[serde(default)]
    pub association: Association,
}

/// Search binding attached by decoration; select widgets use it for remote lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationBinding {
    pub model_name: String,
    pub label_field: String,
    pub value_field: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    pub debounce_ms: u64,
}

fn is_false(b: &bool) -> bool { !*b }

/// Open option bag. Known keys are typed; anything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Maximum length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Regular expression the (string) value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub accessible: Accessible,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Enum choices: `{value: label}`, `[[value, label]]` or `[{value, label}]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_data: Option<Value>,
    /// EnumFilter only: option value -> names of fields shown for that value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter_fields: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_when: Option<VisibilityRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_when: Option<VisibilityRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_opts: Vec<ForeignOpt>,
    /// Changing this field refreshes dependent option sets.
    #[serde(default, skip_serializing_if = "is_false")]
    pub selectable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<AssociationBinding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub options: FieldOptions,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub errors: SmallVec<[String; 2]>,
    /// Option set loaded by decoration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_items: Vec<SelectItem>,
    /// Set by visibility resolution: the field (or rule) that hid this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_by: Option<String>,
    /// Set once a user edit has supplied a value; `defaultValue` no longer applies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub touched: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: Value::Null,
            options: FieldOptions::default(),
            errors: SmallVec::new(),
            select_items: Vec::new(),
            hidden_by: None,
            touched: false,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self { self.value = value; self }

    pub fn with_options(mut self, options: FieldOptions) -> Self { self.options = options; self }

    /// Effective accessibility: hidden when a visibility rule hid the field.
    pub fn accessible(&self) -> Accessible {
        if self.hidden_by.is_some() { Accessible::Hidden } else { self.options.accessible }
    }

    pub fn is_hidden(&self) -> bool { self.accessible() == Accessible::Hidden }

    /// Value as decoration sees it: `defaultValue` stands in for a null the user never set.
    pub fn effective_value(&self) -> &Value {
        match (&self.value, &self.options.default_value) {
            (Value::Null, Some(d)) if !self.touched => d,
            (v, _) => v,
        }
    }

    pub fn is_readonly(&self) -> bool { self.accessible() == Accessible::Readonly }

    /// Whether user edits may be applied to this field.
    pub fn is_editable(&self) -> bool {
        self.accessible() == Accessible::Normal && !matches!(self.field_type, FieldType::Plain)
    }

    pub fn label(&self) -> &str { self.options.label.as_deref().unwrap_or(&self.name) }

    pub fn foreign_opt(&self) -> Option<&ForeignOpt> { self.options.foreign_opts.first() }

    pub fn has_errors(&self) -> bool { !self.errors.is_empty() }

    /// Structurally merge a JSON patch into the option bag, producing a new descriptor.
    pub fn merge_options(&self, patch: &Value) -> Result<FieldDescriptor, CoreError> {
        let invalid = |source| CoreError::InvalidOptions { field: self.name.clone(), source };
        let current = serde_json::to_value(&self.options).map_err(invalid)?;
        let merged = crate::merge::deep_merge(&current, patch);
        let options: FieldOptions = serde_json::from_value(merged).map_err(invalid)?;
        Ok(FieldDescriptor { options, ..self.clone() })
    }
}
