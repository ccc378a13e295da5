//! Structural coercion at the typed boundary.
//!
//! Raw model JSON is coerced before deserialization into extractor types:
//! floats become integers for cents/bps fields, a single object becomes a
//! one-element array where a list is expected, and unknown fields are
//! dropped with a warning instead of failing the whole extraction.

use serde_json::{Map, Value};

/// Coerce a number-bearing value to an integer (cents or basis points).
///
/// Accepts integers, floats (rounded) and numeric strings with separators
/// (`"1,250"`). Anything else is `None`.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().map(|f| f.round() as i64)
            }
        }
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned
                .parse::<f64>()
                .ok()
                .map(|f| f.round() as i64)
        }
        _ => None,
    }
}

/// Coerce to a float, accepting numeric strings.
pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Coerce to a boolean, accepting "true"/"yes" strings.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "y" => Some(true),
            "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Coerce to a non-empty trimmed string; "null"/"n/a"/"unknown" become `None`.
pub fn as_clean_string(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    match s.to_lowercase().as_str() {
        "null" | "none" | "n/a" | "na" | "unknown" | "not disclosed" => None,
        _ => Some(s.to_string()),
    }
}

/// Wrap a single object into a one-element array when a list is expected.
/// Null and missing become the empty array.
pub fn ensure_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Keep only `known` fields on an object, returning the names that were
/// dropped so the caller can record a warning.
pub fn retain_known_fields(value: &mut Value, known: &[&str]) -> Vec<String> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    let mut dropped = Vec::new();
    let retained: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| {
            if known.contains(&key.as_str()) {
                true
            } else {
                dropped.push(key.to_string());
                false
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    *map = retained;
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_int_from_float() {
        assert_eq!(as_int(&json!(425.0)), Some(425));
        assert_eq!(as_int(&json!(424.6)), Some(425));
        assert_eq!(as_int(&json!(500000000)), Some(500000000));
    }

    #[test]
    fn test_as_int_from_string() {
        assert_eq!(as_int(&json!("1,250")), Some(1250));
        assert_eq!(as_int(&json!("$1,250.4")), Some(1250));
        assert_eq!(as_int(&json!("-300")), Some(-300));
        assert_eq!(as_int(&json!("n/a")), None);
    }

    #[test]
    fn test_as_float_percent() {
        assert_eq!(as_float(&json!("4.25%")), Some(4.25));
        assert_eq!(as_float(&json!(0.85)), Some(0.85));
    }

    #[test]
    fn test_as_bool_strings() {
        assert_eq!(as_bool(&json!("yes")), Some(true));
        assert_eq!(as_bool(&json!("No")), Some(false));
        assert_eq!(as_bool(&json!(true)), Some(true));
        assert_eq!(as_bool(&json!("maybe")), None);
    }

    #[test]
    fn test_clean_string_null_words() {
        assert_eq!(as_clean_string(&json!("Delaware")), Some("Delaware".to_string()));
        assert_eq!(as_clean_string(&json!("  n/a ")), None);
        assert_eq!(as_clean_string(&json!("null")), None);
        assert_eq!(as_clean_string(&json!("")), None);
    }

    #[test]
    fn test_ensure_array_wraps_scalar_object() {
        assert_eq!(ensure_array(&json!({"name": "x"})).len(), 1);
        assert_eq!(ensure_array(&json!([1, 2])).len(), 2);
        assert!(ensure_array(&Value::Null).is_empty());
    }

    #[test]
    fn test_retain_known_fields() {
        let mut value = json!({"name": "Acme", "vibe": "good", "jurisdiction": "DE"});
        let dropped = retain_known_fields(&mut value, &["name", "jurisdiction"]);
        assert_eq!(dropped, vec!["vibe".to_string()]);
        assert_eq!(value, json!({"name": "Acme", "jurisdiction": "DE"}));
    }
}
