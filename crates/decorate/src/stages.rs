//! Synchronous decoration stages.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crudkit_core::value::{is_truthy, key_string};
use crudkit_core::{enum_items, FieldDescriptor, FieldSet, FieldType};

use crate::SyncStage;

/// Sets `hidden_by` from `showWhen`/`hideWhen` rules and EnumFilter `filterFields`.
///
/// A field listed under some EnumFilter option is hidden unless it is also
/// listed under the currently selected option. Rules are evaluated against
/// effective values, so a `defaultValue` that has not been applied yet
/// already counts.
pub struct ResolveVisibility;

impl SyncStage for ResolveVisibility {
    fn name(&self) -> &'static str { "resolve_visibility" }

    fn apply(&self, fields: &FieldSet) -> FieldSet {
        let mut revealed: HashSet<&str> = HashSet::new();
        let mut gated: HashMap<&str, &str> = HashMap::new();
        for filter in fields.iter().filter(|f| f.field_type == FieldType::EnumFilter) {
            let selected: Vec<String> = match filter.effective_value() {
                Value::Array(vs) => vs.iter().map(key_string).collect(),
                v => vec![key_string(v)],
            };
            for (option, names) in &filter.options.filter_fields {
                let active = selected.iter().any(|s| s == option);
                for name in names {
                    if active {
                        revealed.insert(name.as_str());
                    } else {
                        gated.entry(name.as_str()).or_insert(filter.name.as_str());
                    }
                }
            }
        }

        fields.map(|f| {
            let by_filter = gated.get(f.name.as_str()).filter(|_| !revealed.contains(f.name.as_str())).map(|s| s.to_string());
            let by_show = f.options.show_when.as_ref().filter(|r| !r.matches(fields.effective_value_of(&r.field))).map(|r| r.field.clone());
            let by_hide = f.options.hide_when.as_ref().filter(|r| r.matches(fields.effective_value_of(&r.field))).map(|r| r.field.clone());
            let hidden_by = by_filter.or(by_show).or(by_hide);
            if hidden_by == f.hidden_by { return None; }
            debug!(field = %f.name, hidden_by = ?hidden_by, "decorate: visibility changed");
            Some(FieldDescriptor { hidden_by, ..f.clone() })
        })
    }
}

/// Applies `defaultValue` to null values the user has not set, and parses
/// JSON held in strings for structured types.
pub struct ParseJsonDefaults;

fn looks_like_json(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('{') || t.starts_with('[')
}

impl SyncStage for ParseJsonDefaults {
    fn name(&self) -> &'static str { "parse_json_defaults" }

    fn apply(&self, fields: &FieldSet) -> FieldSet {
        fields.map(|f| {
            let mut value = match (&f.value, &f.options.default_value) {
                (Value::Null, Some(d)) if !f.touched => Some(d.clone()),
                _ => None,
            };
            if f.field_type.holds_json() {
                let cur = value.as_ref().unwrap_or(&f.value);
                if let Value::String(s) = cur {
                    if looks_like_json(s) {
                        match serde_json::from_str::<Value>(s) {
                            Ok(parsed) => value = Some(parsed),
                            Err(e) => warn!(field = %f.name, error = %e, "decorate: value is not valid JSON; kept as text"),
                        }
                    }
                }
            }
            value.map(|v| f.clone().with_value(v))
        })
    }
}

/// Expands `enumData` into `select_items` for enum fields and static selects.
pub struct AttachEnumData;

impl SyncStage for AttachEnumData {
    fn name(&self) -> &'static str { "attach_enum_data" }

    fn apply(&self, fields: &FieldSet) -> FieldSet {
        fields.map(|f| {
            let static_select = f.field_type == FieldType::Select && f.options.foreign_opts.is_empty();
            if !(f.field_type.is_enum() || static_select) { return None; }
            let items = enum_items(f.options.enum_data.as_ref()?);
            if items == f.select_items { return None; }
            Some(FieldDescriptor { select_items: items, ..f.clone() })
        })
    }
}

/// Coerces values into the shape each widget expects.
pub struct NormalizeTypes;

impl SyncStage for NormalizeTypes {
    fn name(&self) -> &'static str { "normalize_types" }

    fn apply(&self, fields: &FieldSet) -> FieldSet {
        fields.map(|f| {
            let next = normalize_value(f)?;
            if next == f.value { return None; }
            Some(f.clone().with_value(next))
        })
    }
}

/// Normalised value for `f`, or `None` when the type needs no coercion.
pub fn normalize_value(f: &FieldDescriptor) -> Option<Value> {
    let v = &f.value;
    match &f.field_type {
        FieldType::Input | FieldType::TextArea | FieldType::Password => v.is_null().then(|| Value::String(String::new())),
        FieldType::Checkbox | FieldType::Switch => (!v.is_boolean()).then(|| Value::Bool(is_truthy(v))),
        FieldType::InputNumber => match v {
            Value::String(s) if s.trim().is_empty() => Some(Value::Null),
            Value::String(s) => parse_number(s.trim()),
            _ => None,
        },
        FieldType::Date => match v {
            Value::String(s) if s.trim().is_empty() => Some(Value::Null),
            Value::Null => None,
            other => match parse_date(other) {
                Some(d) => Some(Value::String(d.format("%Y-%m-%d").to_string())),
                None => {
                    debug!(field = %f.name, "decorate: unparseable date kept");
                    None
                }
            },
        },
        FieldType::DateTime => match v {
            Value::String(s) if s.trim().is_empty() => Some(Value::Null),
            Value::Null => None,
            other => parse_instant(other).map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))),
        },
        FieldType::Images | FieldType::Files => match v {
            Value::Null => Some(Value::Array(Vec::new())),
            Value::String(s) => Some(Value::Array(
                s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(|p| Value::String(p.to_string())).collect(),
            )),
            _ => None,
        },
        FieldType::Association => {
            let accessor = &f.foreign_opt()?.association.value;
            match v {
                Value::Object(m) => Some(m.get(accessor).cloned().unwrap_or(Value::Null)),
                _ => None,
            }
        }
        FieldType::ManyToMany => relation_ids(f),
        FieldType::Select if !f.options.foreign_opts.is_empty() => {
            if f.options.multiple { relation_ids(f) } else {
                let accessor = &f.foreign_opt()?.association.value;
                v.as_object().map(|m| m.get(accessor).cloned().unwrap_or(Value::Null))
            }
        }
        _ => None,
    }
}

fn relation_ids(f: &FieldDescriptor) -> Option<Value> {
    let accessor = f.foreign_opt().map(|o| o.association.value.as_str()).unwrap_or("id");
    let id_of = |item: &Value| match item {
        Value::Object(m) => m.get(accessor).cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    match &f.value {
        Value::Null => Some(Value::Array(Vec::new())),
        Value::Array(items) => Some(Value::Array(items.iter().map(id_of).filter(|v| !v.is_null()).collect())),
        single => Some(Value::Array(vec![id_of(single)])),
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() { return Some(Value::from(i)); }
    s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S%.f"];

/// Instants from RFC 3339, naive date-times (taken as UTC), plain dates or epoch milliseconds.
pub fn parse_instant(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) { return Some(dt.with_timezone(&Utc)); }
            for fmt in NAIVE_FORMATS {
                if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) { return Some(Utc.from_utc_datetime(&ndt)); }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|ndt| Utc.from_utc_datetime(&ndt))
        }
        _ => None,
    }
}

/// Calendar date; an RFC 3339 instant keeps the date of its own offset.
pub fn parse_date(v: &Value) -> Option<NaiveDate> {
    if let Value::String(s) = v {
        let s = s.trim();
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") { return Some(d); }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) { return Some(dt.date_naive()); }
    }
    parse_instant(v).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudkit_core::{Accessible, ForeignOpt, VisibilityRule};
    use serde_json::json;

    fn set(fields: Vec<FieldDescriptor>) -> FieldSet { FieldSet::from_fields(fields).unwrap() }

    #[test]
    fn enum_filter_reveals_only_selected_group() {
        let mut kind = FieldDescriptor::new("kind", FieldType::EnumFilter).with_value(json!("link"));
        kind.options.enum_data = Some(json!({"link": "Link", "text": "Text"}));
        kind.options.filter_fields.insert("link".into(), vec!["url".into()]);
        kind.options.filter_fields.insert("text".into(), vec!["body".into(), "summary".into()]);
        let fs = set(vec![
            kind,
            FieldDescriptor::new("url", FieldType::Input),
            FieldDescriptor::new("body", FieldType::RichText),
            FieldDescriptor::new("summary", FieldType::TextArea),
            FieldDescriptor::new("title", FieldType::Input),
        ]);
        let out = ResolveVisibility.apply(&fs);
        assert!(!out.get("url").unwrap().is_hidden());
        assert_eq!(out.get("body").unwrap().hidden_by.as_deref(), Some("kind"));
        assert!(out.get("summary").unwrap().is_hidden());
        assert!(!out.get("title").unwrap().is_hidden());
        assert!(out.shares_field(&fs, "title"));

        let switched = ResolveVisibility.apply(&out.apply_change(&crudkit_core::FieldChange::value("kind", json!("text"))).unwrap());
        assert!(switched.get("url").unwrap().is_hidden());
        assert!(!switched.get("body").unwrap().is_hidden());
    }

    #[test]
    fn enum_filter_default_counts_before_it_is_applied() {
        let mut kind = FieldDescriptor::new("kind", FieldType::EnumFilter);
        kind.options.default_value = Some(json!("link"));
        kind.options.filter_fields.insert("link".into(), vec!["url".into()]);
        kind.options.filter_fields.insert("text".into(), vec!["body".into()]);
        let mut promo = FieldDescriptor::new("promo", FieldType::Input);
        promo.options.show_when = Some(VisibilityRule { field: "kind".into(), equals: Some(json!("link")), one_of: None, truthy: false });
        let fs = set(vec![
            kind,
            FieldDescriptor::new("url", FieldType::Input),
            FieldDescriptor::new("body", FieldType::RichText),
            promo,
        ]);
        let out = ParseJsonDefaults.apply(&ResolveVisibility.apply(&fs));
        assert_eq!(out.value_of("kind"), &json!("link"));
        assert!(!out.get("url").unwrap().is_hidden());
        assert!(out.get("body").unwrap().is_hidden());
        assert!(!out.get("promo").unwrap().is_hidden());
        assert!(out.values().contains_key("url"));

        let cleared = out.apply_change(&crudkit_core::FieldChange::value("kind", Value::Null)).unwrap();
        let again = ParseJsonDefaults.apply(&ResolveVisibility.apply(&cleared));
        assert_eq!(again.value_of("kind"), &Value::Null);
        assert!(again.get("url").unwrap().is_hidden());
        assert!(again.get("promo").unwrap().is_hidden());
    }

    #[test]
    fn show_and_hide_rules() {
        let mut extra = FieldDescriptor::new("discount", FieldType::InputNumber);
        extra.options.show_when = Some(VisibilityRule { field: "onSale".into(), equals: None, one_of: None, truthy: true });
        let mut note = FieldDescriptor::new("note", FieldType::Input);
        note.options.hide_when = Some(VisibilityRule { field: "status".into(), equals: None, one_of: Some(vec![json!("archived")]), truthy: false });
        let fs = set(vec![
            FieldDescriptor::new("onSale", FieldType::Switch).with_value(json!(false)),
            FieldDescriptor::new("status", FieldType::Input).with_value(json!("archived")),
            extra,
            note,
        ]);
        let out = ResolveVisibility.apply(&fs);
        assert!(out.get("discount").unwrap().is_hidden());
        assert!(out.get("note").unwrap().is_hidden());
        assert!(!out.values().contains_key("discount"));

        let on = ResolveVisibility.apply(&out.apply_change(&crudkit_core::FieldChange::value("onSale", json!(true))).unwrap());
        assert!(!on.get("discount").unwrap().is_hidden());
    }

    #[test]
    fn declared_hidden_is_not_cleared_by_rules() {
        let mut f = FieldDescriptor::new("secret", FieldType::Input);
        f.options.accessible = Accessible::Hidden;
        let out = ResolveVisibility.apply(&set(vec![f]));
        assert!(out.get("secret").unwrap().is_hidden());
    }

    #[test]
    fn json_defaults() {
        let mut addr = FieldDescriptor::new("address", FieldType::Address).with_value(json!("{\"city\":\"Oslo\"}"));
        addr.options.default_value = Some(json!({}));
        let mut count = FieldDescriptor::new("count", FieldType::InputNumber);
        count.options.default_value = Some(json!(3));
        let broken = FieldDescriptor::new("meta", FieldType::SimpleJson).with_value(json!("{oops"));
        let html = FieldDescriptor::new("body", FieldType::RichText).with_value(json!("<p>hi</p>"));
        let mut seeded = FieldDescriptor::new("config", FieldType::SimpleJson);
        seeded.options.default_value = Some(json!("[1,2]"));
        let out = ParseJsonDefaults.apply(&set(vec![addr, count, broken, html, seeded]));
        assert_eq!(out.value_of("address"), &json!({"city": "Oslo"}));
        assert_eq!(out.value_of("count"), &json!(3));
        assert_eq!(out.value_of("meta"), &json!("{oops"));
        assert_eq!(out.value_of("body"), &json!("<p>hi</p>"));
        assert_eq!(out.value_of("config"), &json!([1, 2]));

        let cleared = out.apply_change(&crudkit_core::FieldChange::value("count", Value::Null)).unwrap();
        assert_eq!(ParseJsonDefaults.apply(&cleared).value_of("count"), &Value::Null);
    }

    #[test]
    fn enum_data_attached() {
        let mut status = FieldDescriptor::new("status", FieldType::Enum);
        status.options.enum_data = Some(json!([["draft", "Draft"], ["live", "Live"]]));
        let out = AttachEnumData.apply(&set(vec![status, FieldDescriptor::new("other", FieldType::Enum)]));
        assert_eq!(out.get("status").unwrap().select_items.len(), 2);
        assert!(out.get("other").unwrap().select_items.is_empty());
        let again = AttachEnumData.apply(&out);
        assert!(again.shares_field(&out, "status"));
    }

    #[test]
    fn normalisation() {
        let mut author = FieldDescriptor::new("author", FieldType::Association).with_value(json!({"uid": 9, "name": "Ada"}));
        author.options.foreign_opts.push(ForeignOpt { model_name: "user".into(), association: serde_json::from_value(json!({"value": "uid"})).unwrap() });
        let mut tags = FieldDescriptor::new("tags", FieldType::ManyToMany).with_value(json!([{"id": 1}, {"id": 2}, 3]));
        tags.options.foreign_opts.push(ForeignOpt { model_name: "tag".into(), association: Default::default() });
        let fs = set(vec![
            FieldDescriptor::new("active", FieldType::Checkbox).with_value(json!("1")),
            FieldDescriptor::new("price", FieldType::InputNumber).with_value(json!("12.5")),
            FieldDescriptor::new("qty", FieldType::InputNumber).with_value(json!("7")),
            FieldDescriptor::new("born", FieldType::Date).with_value(json!("1990-02-03T22:00:00+01:00")),
            FieldDescriptor::new("seen", FieldType::DateTime).with_value(json!("2024-05-01 10:00:00")),
            FieldDescriptor::new("stamp", FieldType::DateTime).with_value(json!(0)),
            FieldDescriptor::new("photos", FieldType::Images).with_value(json!("a.png, b.png,")),
            FieldDescriptor::new("name", FieldType::Input),
            author,
            tags,
        ]);
        let out = NormalizeTypes.apply(&fs);
        assert_eq!(out.value_of("active"), &json!(true));
        assert_eq!(out.value_of("price"), &json!(12.5));
        assert_eq!(out.value_of("qty"), &json!(7));
        assert_eq!(out.value_of("born"), &json!("1990-02-03"));
        assert_eq!(out.value_of("seen"), &json!("2024-05-01T10:00:00Z"));
        assert_eq!(out.value_of("stamp"), &json!("1970-01-01T00:00:00Z"));
        assert_eq!(out.value_of("photos"), &json!(["a.png", "b.png"]));
        assert_eq!(out.value_of("name"), &json!(""));
        assert_eq!(out.value_of("author"), &json!(9));
        assert_eq!(out.value_of("tags"), &json!([1, 2, 3]));

        let twice = NormalizeTypes.apply(&out);
        for name in out.names() {
            assert!(twice.shares_field(&out, name), "{} not stable", name);
        }
    }
}
