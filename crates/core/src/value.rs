//! Small helpers over loosely typed JSON field values.

use serde_json::Value;

/// Empty for the purpose of required-field checks.
pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !(s.is_empty() || s == "false" || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
    }
}

/// Stable string form used for keys and comparisons: strings unquoted, everything else as JSON.
pub fn key_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Equality that treats `1` and `"1"` as the same scalar.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b { return true; }
    let scalar = |v: &Value| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_));
    scalar(a) && scalar(b) && key_string(a) == key_string(b)
}

/// Human-readable rendering for static (readonly) display.
pub fn display_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(a) => a.iter().map(display_text).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(", "),
        Value::Object(m) => {
            for k in ["label", "name", "title"] {
                if let Some(s) = m.get(k).and_then(|v| v.as_str()) { return s.to_string(); }
            }
            v.to_string()
        }
    }
}
