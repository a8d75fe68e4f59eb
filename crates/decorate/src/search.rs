//! Option search for select widgets.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::{json, Map};
use tracing::{debug, warn};

use crudkit_api::{LoadQuery, ModelService, Pagination};
use crudkit_core::value::key_string;
use crudkit_core::{unique_items, EngineConfig, FieldDescriptor, SelectItem};

/// Options matching `query` for one field.
///
/// Relation fields search the related model with a `$like` filter on the
/// label accessor; the currently selected options are appended so the
/// selection keeps its labels. Enum fields are matched locally with a fuzzy
/// matcher, best match first. An empty query returns the current options.
pub async fn search_options(api: &dyn ModelService, config: &EngineConfig, field: &FieldDescriptor, query: &str) -> Vec<SelectItem> {
    let query = query.trim();
    if query.is_empty() { return field.select_items.clone(); }
    let Some(opt) = field.foreign_opt() else { return fuzzy_filter(&field.select_items, query) };

    let assoc = &opt.association;
    let mut filters = Map::new();
    filters.insert(assoc.name.clone(), json!({ "$like": format!("%{}%", query) }));
    let q = LoadQuery {
        filters,
        pagination: Pagination { page: 1, size: config.options_page_size },
        fields: assoc.select_fields(),
        ..LoadQuery::default()
    };
    match api.load_models(&opt.model_name, q).await {
        Ok(page) => {
            let found: Vec<SelectItem> = page.items.iter().filter_map(|r| SelectItem::from_record(r, assoc)).collect();
            debug!(field = %field.name, model = %opt.model_name, query, hits = found.len(), "search: remote options");
            let selected = selected_items(field);
            unique_items(&[&found[..], &selected[..]])
        }
        Err(e) => {
            warn!(field = %field.name, model = %opt.model_name, error = %e, "search: remote lookup failed");
            field.select_items.clone()
        }
    }
}

fn selected_items(field: &FieldDescriptor) -> Vec<SelectItem> {
    let keys: Vec<String> = match &field.value {
        serde_json::Value::Array(vs) => vs.iter().map(key_string).collect(),
        v => vec![key_string(v)],
    };
    field.select_items.iter().filter(|i| keys.contains(&key_string(&i.value))).cloned().collect()
}

fn fuzzy_filter(items: &[SelectItem], query: &str) -> Vec<SelectItem> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, &SelectItem)> = items
        .iter()
        .filter_map(|i| {
            let by_label = matcher.fuzzy_match(&i.label, query);
            let by_value = matcher.fuzzy_match(&key_string(&i.value), query);
            by_label.max(by_value).map(|s| (s, i))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, i)| i.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudkit_core::{enum_items, FieldType};

    #[test]
    fn fuzzy_prefers_closer_labels() {
        let items = enum_items(&json!({"draft": "Draft", "published": "Published", "archived": "Archived"}));
        let out = fuzzy_filter(&items, "pub");
        assert_eq!(out.first().map(|i| i.label.as_str()), Some("Published"));
        assert!(fuzzy_filter(&items, "zzz").is_empty());
    }

    #[test]
    fn selected_items_follow_value() {
        let mut f = FieldDescriptor::new("tags", FieldType::ManyToMany).with_value(json!([2]));
        f.select_items = vec![SelectItem::new(json!(1), "a"), SelectItem::new(json!(2), "b")];
        assert_eq!(selected_items(&f), vec![SelectItem::new(json!(2), "b")]);
    }
}
