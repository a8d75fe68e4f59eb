//! Column filters: list option loading and conversion of active selections into query filters.

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crudkit_api::ModelService;
use crudkit_core::columns::{CellRenderer, ColumnSpec, FilterOption, FilterSpec};
use crudkit_core::value::{display_text, is_blank, key_string};

fn option_text(col: &ColumnSpec, v: &Value) -> String {
    if v.is_null() { return "(empty)".to_string(); }
    if let CellRenderer::Enum { labels } = &col.render {
        let k = key_string(v);
        if let Some((_, label)) = labels.iter().find(|(key, _)| *key == k) { return label.clone(); }
    }
    display_text(v)
}

/// Fill `list` filters with the distinct values of their column. A column
/// whose lookup fails keeps an empty, unloaded option list.
pub async fn load_list_filters(api: &dyn ModelService, model: &str, columns: Vec<ColumnSpec>) -> Vec<ColumnSpec> {
    let pending: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.filter, Some(FilterSpec::List { loaded: false, .. })))
        .map(|(i, _)| i)
        .collect();
    let results = join_all(pending.iter().map(|&i| api.distinct_values(model, &columns[i].data_index))).await;

    let mut columns = columns;
    for (i, res) in pending.into_iter().zip(results) {
        let col = &mut columns[i];
        match res {
            Ok(values) => {
                let options: Vec<FilterOption> = values.iter().map(|v| FilterOption { text: option_text(col, v), value: v.clone() }).collect();
                debug!(model, column = %col.key, options = options.len(), "table: list filter loaded");
                col.filter = Some(FilterSpec::List { options, loaded: true });
            }
            Err(e) => {
                warn!(model, column = %col.key, error = %e, "table: list filter values unavailable");
                col.filter = Some(FilterSpec::List { options: Vec::new(), loaded: false });
            }
        }
    }
    columns
}

/// Turn active filter selections (column key → selected value) into `load_models` filters.
///
/// `like` selections become `$like` patterns, array selections become `$in`,
/// scalars stay equality. Blank selections and unknown columns are skipped.
pub fn filters_to_query(columns: &[ColumnSpec], active: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, selected) in active {
        let Some(col) = columns.iter().find(|c| c.key == *key) else {
            debug!(column = %key, "table: filter for unknown column skipped");
            continue;
        };
        let Some(filter) = &col.filter else { continue };
        if is_blank(selected) { continue; }
        let cond = match (filter, selected) {
            (FilterSpec::Like { .. }, v) => json!({ "$like": format!("%{}%", key_string(v).trim()) }),
            (_, Value::Array(set)) if set.len() == 1 && !set[0].is_array() => set[0].clone(),
            // a boolean "false" option is itself a set: [false, null]
            (_, Value::Array(set)) => {
                let flat: Vec<Value> = set.iter().flat_map(|v| match v {
                    Value::Array(inner) => inner.clone(),
                    other => vec![other.clone()],
                }).collect();
                json!({ "$in": flat })
            }
            (_, v) => v.clone(),
        };
        out.insert(col.data_index.clone(), cond);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudkit_api::filter::matches_filters;
    use crudkit_core::columns::{build_columns, ColumnMeta, ConditionType};
    use crudkit_core::FieldType;

    fn columns() -> Vec<ColumnSpec> {
        let mut title = ColumnMeta::new("title", FieldType::Input);
        title.condition = Some(ConditionType::Like);
        let mut published = ColumnMeta::new("published", FieldType::Switch);
        published.condition = Some(ConditionType::Boolean);
        let mut status = ColumnMeta::new("status", FieldType::Enum);
        status.condition = Some(ConditionType::List);
        build_columns(&[title, published, status, ColumnMeta::new("views", FieldType::InputNumber)])
    }

    #[test]
    fn selections_become_query_filters() {
        let active = json!({
            "title": "hello",
            "published": [false, null],
            "status": ["draft", "live"],
            "views": 3,
            "missing": 1,
            "blank": ""
        });
        let q = filters_to_query(&columns(), active.as_object().unwrap());
        assert_eq!(q.get("title"), Some(&json!({"$like": "%hello%"})));
        assert_eq!(q.get("published"), Some(&json!({"$in": [false, null]})));
        assert_eq!(q.get("status"), Some(&json!({"$in": ["draft", "live"]})));
        assert!(q.get("views").is_none(), "column without filter");
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn boolean_false_matches_missing_values() {
        let active = json!({ "published": [[false, null]] });
        let q = filters_to_query(&columns(), active.as_object().unwrap());
        assert!(matches_filters(&json!({"title": "x"}), &q));
        assert!(matches_filters(&json!({"published": false}), &q));
        assert!(!matches_filters(&json!({"published": true}), &q));
        let only_true = filters_to_query(&columns(), json!({ "published": true }).as_object().unwrap());
        assert!(matches_filters(&json!({"published": true}), &only_true));
    }
}
