//! crudkit widget dispatch: map a field descriptor to a renderable widget spec.
//!
//! Dispatch is total. Every known type tag has a widget, unknown tags fall
//! back to host-registered builders and then to a `Diagnostic` widget that
//! shows the field's name, tag and options. Nothing here panics or errors.

#![forbid(unsafe_code)]

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crudkit_core::value::{display_text, key_string};
use crudkit_core::{enum_items, Accessible, AssociationBinding, EngineConfig, FieldDescriptor, FieldSet, FieldType, SelectItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    File,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    Single,
    Multiple,
}

/// Widget-independent part of every spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetFrame {
    pub name: String,
    pub label: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub value: Value,
    /// Whether the widget accepts user edits.
    pub editable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "widget", rename_all = "camelCase")]
pub enum WidgetKind {
    /// Hidden field: render nothing.
    Nothing,
    Static { text: String },
    StaticAsset { urls: Vec<String> },
    Gallery { urls: Vec<String> },
    #[serde(rename_all = "camelCase")]
    TextInput { max_length: Option<usize>, placeholder: Option<String>, password: bool },
    #[serde(rename_all = "camelCase")]
    TextArea { rows: u16, max_length: Option<usize> },
    NumberInput,
    Checkbox,
    Switch,
    #[serde(rename_all = "camelCase")]
    DatePicker { with_time: bool },
    Uploader { media: MediaKind, multiple: bool },
    Select { mode: SelectMode, items: Vec<SelectItem>, search: Option<AssociationBinding> },
    Address,
    RichText,
    JsonEditor,
    HiddenInput,
    Plain { text: String },
    #[serde(rename_all = "camelCase")]
    Diagnostic { type_tag: String, options: Value, reason: String },
}

impl WidgetKind {
    fn accepts_input(&self) -> bool {
        !matches!(
            self,
            WidgetKind::Nothing
                | WidgetKind::Static { .. }
                | WidgetKind::StaticAsset { .. }
                | WidgetKind::Gallery { .. }
                | WidgetKind::HiddenInput
                | WidgetKind::Plain { .. }
                | WidgetKind::Diagnostic { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSpec {
    #[serde(flatten)]
    pub frame: WidgetFrame,
    #[serde(flatten)]
    pub kind: WidgetKind,
}

impl WidgetSpec {
    pub fn is_diagnostic(&self) -> bool { matches!(self.kind, WidgetKind::Diagnostic { .. }) }
    pub fn renders_nothing(&self) -> bool { matches!(self.kind, WidgetKind::Nothing) }
}

/// Builder for a host-defined type tag.
pub type WidgetBuilder = Arc<dyn Fn(&FieldDescriptor, &EngineConfig) -> WidgetKind + Send + Sync>;

#[derive(Clone, Default)]
pub struct DispatchTable {
    config: EngineConfig,
    custom: FxHashMap<String, WidgetBuilder>,
}

impl DispatchTable {
    pub fn new(config: EngineConfig) -> Self { Self { config, custom: FxHashMap::default() } }

    pub fn config(&self) -> &EngineConfig { &self.config }

    /// Register a builder for a type tag the engine does not know.
    /// Built-in tags cannot be overridden.
    pub fn register(&mut self, tag: impl Into<String>, builder: WidgetBuilder) -> &mut Self {
        self.custom.insert(tag.into(), builder);
        self
    }

    pub fn dispatch(&self, field: &FieldDescriptor) -> WidgetSpec {
        let kind = match field.accessible() {
            Accessible::Hidden => WidgetKind::Nothing,
            Accessible::Readonly => readonly_kind(field),
            Accessible::Normal => self.editable_kind(field),
        };
        let frame = WidgetFrame {
            name: field.name.clone(),
            label: field.label().to_string(),
            required: field.options.required,
            tooltip: field.options.tooltip.clone(),
            help: field.options.help.clone(),
            errors: field.errors.iter().cloned().collect(),
            value: field.value.clone(),
            editable: field.is_editable() && kind.accepts_input(),
        };
        WidgetSpec { frame, kind }
    }

    /// Widgets for every field taking part in layout, in layout order.
    pub fn render_form(&self, fields: &FieldSet) -> Vec<WidgetSpec> {
        fields.visible().map(|f| self.dispatch(f)).collect()
    }

    fn editable_kind(&self, field: &FieldDescriptor) -> WidgetKind {
        let opts = &field.options;
        match &field.field_type {
            FieldType::Input => match opts.length {
                Some(len) if len > self.config.long_input_threshold => {
                    WidgetKind::TextArea { rows: self.config.textarea_rows, max_length: Some(len) }
                }
                _ => WidgetKind::TextInput { max_length: opts.length, placeholder: opts.placeholder.clone(), password: false },
            },
            FieldType::Password => WidgetKind::TextInput { max_length: opts.length, placeholder: opts.placeholder.clone(), password: true },
            FieldType::InputNumber => WidgetKind::NumberInput,
            FieldType::TextArea => WidgetKind::TextArea { rows: self.config.textarea_rows, max_length: opts.length },
            FieldType::Checkbox => WidgetKind::Checkbox,
            FieldType::Switch => WidgetKind::Switch,
            FieldType::Date => WidgetKind::DatePicker { with_time: false },
            FieldType::DateTime => WidgetKind::DatePicker { with_time: true },
            FieldType::Image => WidgetKind::Uploader { media: MediaKind::Image, multiple: false },
            FieldType::Images => WidgetKind::Uploader { media: MediaKind::Image, multiple: true },
            FieldType::File => WidgetKind::Uploader { media: MediaKind::File, multiple: false },
            FieldType::Files => WidgetKind::Uploader { media: MediaKind::File, multiple: true },
            FieldType::Video => WidgetKind::Uploader { media: MediaKind::Video, multiple: false },
            FieldType::Association => relation_select(field, SelectMode::Single),
            FieldType::ManyToMany => relation_select(field, SelectMode::Multiple),
            FieldType::Select => {
                if !opts.foreign_opts.is_empty() {
                    relation_select(field, if opts.multiple { SelectMode::Multiple } else { SelectMode::Single })
                } else {
                    enum_select(field)
                }
            }
            FieldType::Enum | FieldType::EnumFilter => enum_select(field),
            FieldType::Address => WidgetKind::Address,
            FieldType::RichText => WidgetKind::RichText,
            FieldType::SimpleJson => WidgetKind::JsonEditor,
            FieldType::Hidden => WidgetKind::HiddenInput,
            FieldType::Plain => WidgetKind::Plain { text: display_text(&field.value) },
            FieldType::Other(tag) => match self.custom.get(tag) {
                Some(builder) => builder(field, &self.config),
                None => {
                    debug!(field = %field.name, tag = %tag, "dispatch: no widget for type");
                    diagnostic(field, "not implemented")
                }
            },
        }
    }
}

fn diagnostic(field: &FieldDescriptor, reason: &str) -> WidgetKind {
    WidgetKind::Diagnostic {
        type_tag: field.field_type.as_str().to_string(),
        options: serde_json::to_value(&field.options).unwrap_or(Value::Null),
        reason: format!("{}: {}", field.name, reason),
    }
}

fn relation_select(field: &FieldDescriptor, mode: SelectMode) -> WidgetKind {
    if field.options.foreign_opts.is_empty() {
        return diagnostic(field, "relation field has no foreignOpts");
    }
    WidgetKind::Select { mode, items: field.select_items.clone(), search: field.options.binding.clone() }
}

fn enum_select(field: &FieldDescriptor) -> WidgetKind {
    let items = if field.select_items.is_empty() {
        field.options.enum_data.as_ref().map(enum_items).unwrap_or_default()
    } else {
        field.select_items.clone()
    };
    if items.is_empty() {
        let reason = if field.options.enum_data.is_none() { "enum field has no enumData" } else { "enumData yields no options" };
        return diagnostic(field, reason);
    }
    let mode = if field.options.multiple { SelectMode::Multiple } else { SelectMode::Single };
    WidgetKind::Select { mode, items, search: None }
}

fn asset_urls(v: &Value) -> Vec<String> {
    match v {
        Value::Array(a) => a.iter().flat_map(asset_urls).collect(),
        Value::Object(m) => m.get("url").or_else(|| m.get("uri")).and_then(|u| u.as_str()).map(|s| vec![s.to_string()]).unwrap_or_default(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Label(s) of the selected option(s), falling back to the raw value.
fn selected_labels(field: &FieldDescriptor) -> String {
    if field.select_items.is_empty() { return display_text(&field.value); }
    let label_of = |v: &Value| {
        field
            .select_items
            .iter()
            .find(|i| key_string(&i.value) == key_string(v))
            .map(|i| i.label.clone())
            .unwrap_or_else(|| display_text(v))
    };
    match &field.value {
        Value::Array(vs) => vs.iter().map(label_of).collect::<Vec<_>>().join(", "),
        v => label_of(v),
    }
}

fn readonly_kind(field: &FieldDescriptor) -> WidgetKind {
    match &field.field_type {
        FieldType::Images => WidgetKind::Gallery { urls: asset_urls(&field.value) },
        t if t.is_media() => WidgetKind::StaticAsset { urls: asset_urls(&field.value) },
        t if t.is_relation() || t.is_enum() || *t == FieldType::Select => WidgetKind::Static { text: selected_labels(field) },
        FieldType::SimpleJson | FieldType::Address => WidgetKind::Static {
            text: match &field.value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                v => serde_json::to_string_pretty(v).unwrap_or_default(),
            },
        },
        _ => WidgetKind::Static { text: display_text(&field.value) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudkit_core::field::KNOWN_TYPES;
    use crudkit_core::ForeignOpt;
    use serde_json::json;

    fn table() -> DispatchTable { DispatchTable::new(EngineConfig::default()) }

    #[test]
    fn every_known_type_dispatches_with_empty_options() {
        for t in KNOWN_TYPES {
            let spec = table().dispatch(&FieldDescriptor::new("f", t.clone()));
            assert!(!spec.renders_nothing(), "{} rendered nothing", t);
            assert_eq!(spec.frame.name, "f");
        }
    }

    #[test]
    fn unknown_type_yields_diagnostic() {
        let spec = table().dispatch(&FieldDescriptor::new("color", FieldType::Other("ColorPicker".into())));
        match spec.kind {
            WidgetKind::Diagnostic { type_tag, reason, .. } => {
                assert_eq!(type_tag, "ColorPicker");
                assert!(reason.contains("color"));
            }
            other => panic!("expected diagnostic, got {:?}", other),
        }
        assert!(!spec.frame.editable);
    }

    #[test]
    fn registered_builder_handles_custom_tag() {
        let mut t = table();
        t.register("ColorPicker", Arc::new(|_f: &FieldDescriptor, _c: &EngineConfig| WidgetKind::TextInput { max_length: Some(7), placeholder: Some("#rrggbb".into()), password: false }));
        let spec = t.dispatch(&FieldDescriptor::new("color", FieldType::Other("ColorPicker".into())));
        assert!(!spec.is_diagnostic());
        assert!(spec.frame.editable);
    }

    #[test]
    fn relation_without_foreign_opts_is_inline_diagnostic() {
        assert!(table().dispatch(&FieldDescriptor::new("author", FieldType::Association)).is_diagnostic());
        assert!(table().dispatch(&FieldDescriptor::new("kind", FieldType::EnumFilter)).is_diagnostic());

        let mut f = FieldDescriptor::new("tags", FieldType::ManyToMany);
        f.options.foreign_opts.push(ForeignOpt { model_name: "tag".into(), association: Default::default() });
        f.select_items.push(SelectItem::new(json!(1), "rust"));
        match table().dispatch(&f).kind {
            WidgetKind::Select { mode, items, .. } => {
                assert_eq!(mode, SelectMode::Multiple);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_enum_data_is_inline_diagnostic() {
        let mut f = FieldDescriptor::new("status", FieldType::Enum);
        f.options.enum_data = Some(json!("draft,live"));
        match table().dispatch(&f).kind {
            WidgetKind::Diagnostic { reason, .. } => assert!(reason.contains("no options")),
            other => panic!("expected diagnostic, got {:?}", other),
        }
        f.options.enum_data = Some(json!({"draft": "Draft"}));
        assert!(matches!(table().dispatch(&f).kind, WidgetKind::Select { .. }));
    }

    #[test]
    fn long_input_becomes_text_area() {
        let mut f = FieldDescriptor::new("summary", FieldType::Input);
        f.options.length = Some(500);
        assert!(matches!(table().dispatch(&f).kind, WidgetKind::TextArea { max_length: Some(500), .. }));
        f.options.length = Some(200);
        assert!(matches!(table().dispatch(&f).kind, WidgetKind::TextInput { .. }));
    }

    #[test]
    fn readonly_renders_static_and_is_never_editable() {
        for t in KNOWN_TYPES {
            let mut f = FieldDescriptor::new("f", t.clone()).with_value(json!("x"));
            f.options.accessible = Accessible::Readonly;
            let spec = table().dispatch(&f);
            assert!(!spec.frame.editable, "{} editable while readonly", t);
            assert!(matches!(spec.kind, WidgetKind::Static { .. } | WidgetKind::StaticAsset { .. } | WidgetKind::Gallery { .. }));
        }
        let mut gallery = FieldDescriptor::new("photos", FieldType::Images).with_value(json!(["a.png", {"url": "b.png"}]));
        gallery.options.accessible = Accessible::Readonly;
        assert_eq!(table().dispatch(&gallery).kind, WidgetKind::Gallery { urls: vec!["a.png".into(), "b.png".into()] });
    }

    #[test]
    fn readonly_enum_shows_label() {
        let mut f = FieldDescriptor::new("status", FieldType::Enum).with_value(json!("live"));
        f.options.accessible = Accessible::Readonly;
        f.options.enum_data = Some(json!({"draft": "Draft", "live": "Published"}));
        f.select_items = enum_items(f.options.enum_data.as_ref().unwrap());
        assert_eq!(table().dispatch(&f).kind, WidgetKind::Static { text: "Published".into() });
    }

    #[test]
    fn hidden_fields_render_nothing_and_leave_layout() {
        let mut secret = FieldDescriptor::new("secret", FieldType::Input);
        secret.options.accessible = Accessible::Hidden;
        assert!(table().dispatch(&secret).renders_nothing());
        let mut toggled = FieldDescriptor::new("extra", FieldType::Input);
        toggled.hidden_by = Some("kind".into());
        let fs = FieldSet::from_fields(vec![FieldDescriptor::new("title", FieldType::Input), secret, toggled]).unwrap();
        let names: Vec<_> = table().render_form(&fs).into_iter().map(|w| w.frame.name).collect();
        assert_eq!(names, vec!["title"]);
    }
}
