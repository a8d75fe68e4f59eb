//! Evaluation of the `load_models` filter language against JSON records.
//!
//! Used by in-memory services; remote services forward the same map to the server.

use serde_json::{Map, Value};

use crudkit_core::value::{key_string, loose_eq};

/// Does `record` satisfy a single condition on `field`?
pub fn matches_condition(record: &Value, field: &str, cond: &Value) -> bool {
    let actual = record.get(field).unwrap_or(&Value::Null);
    match cond {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
            ops.iter().all(|(op, arg)| match op.as_str() {
                "$like" => {
                    let needle = key_string(arg).trim_matches('%').to_lowercase();
                    !actual.is_null() && key_string(actual).to_lowercase().contains(&needle)
                }
                "$in" => arg.as_array().map(|set| set.iter().any(|c| loose_eq(actual, c) || (c.is_null() && actual.is_null()))).unwrap_or(false),
                "$ne" => !loose_eq(actual, arg),
                // Unknown operators do not filter anything out.
                _ => true,
            })
        }
        Value::Array(set) => set.iter().any(|c| loose_eq(actual, c) || (c.is_null() && actual.is_null())),
        Value::Null => actual.is_null(),
        other => loose_eq(actual, other),
    }
}

pub fn matches_filters(record: &Value, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(field, cond)| matches_condition(record, field, cond))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operators() {
        let rec = json!({"title": "Hello World", "published": null, "views": 3});
        assert!(matches_condition(&rec, "title", &json!({"$like": "%world%"})));
        assert!(!matches_condition(&rec, "title", &json!({"$like": "%moon%"})));
        assert!(matches_condition(&rec, "published", &json!({"$in": [false, null]})));
        assert!(matches_condition(&rec, "missing", &json!([false, null])));
        assert!(matches_condition(&rec, "views", &json!("3")));
        assert!(!matches_condition(&rec, "views", &json!({"$ne": 3})));
    }

    #[test]
    fn all_filters_must_match() {
        let rec = json!({"a": 1, "b": true});
        let f = json!({"a": 1, "b": false});
        assert!(!matches_filters(&rec, f.as_object().unwrap()));
    }
}
