//! Immutable deep merge for JSON option bags and partial updates.

use serde_json::Value;

/// Merge `patch` into `base`, returning a new value. Objects merge key by key;
/// any other patch value replaces the base outright (arrays included).
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            let mut out = b.clone();
            for (k, pv) in p {
                let merged = match b.get(k) {
                    Some(bv) => deep_merge(bv, pv),
                    None => pv.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_and_arrays_replace() {
        let base = json!({"a": {"x": 1, "y": [1, 2]}, "b": 1});
        let patch = json!({"a": {"y": [3]}, "c": null});
        let out = deep_merge(&base, &patch);
        assert_eq!(out, json!({"a": {"x": 1, "y": [3]}, "b": 1, "c": null}));
        assert_eq!(base["a"]["y"], json!([1, 2]));
    }

    #[test]
    fn key_order_is_preserved() {
        let base = json!({"z": 1, "a": 2});
        let out = deep_merge(&base, &json!({"m": 3, "z": 4}));
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
