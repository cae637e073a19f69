//! Cell values as they arrive from the cache.
//!
//! Values are plain JSON, except that the cache may wrap any of them in an
//! atom (`{"$type": "atom", "value": ...}`), and multi-valued cells may be
//! either arrays or comma-joined strings depending on the producer.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// We use [`std::collections::BTreeMap`] as our default map structure, so
/// that anything serialized from it has a stable key order.
pub type Map<K, V> = BTreeMap<K, V>;

/// A row as fetched from the cache, keyed by accessor expression.
pub type RawRow = Map<String, JsonValue>;

/// Strips any number of atom wrappers from a cell value.
pub fn unwrap_atom(value: &JsonValue) -> &JsonValue {
    match value {
        JsonValue::Object(obj) if obj.get("$type").and_then(JsonValue::as_str) == Some("atom") => {
            obj.get("value").map(unwrap_atom).unwrap_or(&JsonValue::Null)
        }
        _ => value,
    }
}

/// Whether a cell carries no usable value (absent, null, or an empty atom).
pub fn is_empty(value: Option<&JsonValue>) -> bool {
    match value.map(unwrap_atom) {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Renders a scalar cell the way it is shown to a user. Arrays are joined
/// with `", "`; objects and nulls render empty.
pub fn display_string(value: &JsonValue) -> String {
    match unwrap_atom(value) {
        JsonValue::Null | JsonValue::Object(_) => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(arr) => arr
            .iter()
            .map(display_string)
            .collect::<Vec<String>>()
            .join(", "),
    }
}

/// The key under which a raw value is looked up in a label map. Lookup maps
/// are keyed by the string form of the key attribute.
pub fn lookup_key(value: &JsonValue) -> Option<String> {
    match unwrap_atom(value) {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Splits a multi-valued cell stored as comma-joined text into its trimmed
/// parts. Returns `None` for values that are not comma-joined strings.
pub fn split_multi(value: &JsonValue) -> Option<Vec<&str>> {
    match unwrap_atom(value) {
        JsonValue::String(s) if s.contains(',') => Some(s.split(',').map(str::trim).collect()),
        _ => None,
    }
}

/// Numeric interpretation of a cell, accepting numeric strings.
pub fn as_f64(value: &JsonValue) -> Option<f64> {
    match unwrap_atom(value) {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parses the leading integer of a string the way loosely typed identifiers
/// are normalized before lookup (`"1335DR"` becomes `1335`).
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn atoms_are_unwrapped() {
        let nested = json!({"$type": "atom", "value": {"$type": "atom", "value": 42}});
        assert_eq!(unwrap_atom(&nested), &json!(42));
        assert_eq!(unwrap_atom(&json!({"$type": "atom"})), &JsonValue::Null);
        assert_eq!(unwrap_atom(&json!({"name": "x"})), &json!({"name": "x"}));
    }

    #[test]
    fn emptiness() {
        assert!(is_empty(None));
        assert!(is_empty(Some(&json!({"$type": "atom", "value": null}))));
        assert!(is_empty(Some(&json!(""))));
        assert!(!is_empty(Some(&json!(0))));
    }

    #[test]
    fn display() {
        assert_eq!(display_string(&json!(["x", "y"])), "x, y");
        assert_eq!(display_string(&json!(12.5)), "12.5");
        assert_eq!(display_string(&json!({"a": 1})), "");
    }

    #[test]
    fn multi_valued_cells() {
        assert_eq!(split_multi(&json!("7, 12")), Some(vec!["7", "12"]));
        assert_eq!(split_multi(&json!("7")), None);
        assert_eq!(split_multi(&json!(7)), None);
    }

    #[test]
    fn int_prefix() {
        assert_eq!(parse_int_prefix("1335DR"), Some(1335));
        assert_eq!(parse_int_prefix(" -4x"), Some(-4));
        assert_eq!(parse_int_prefix("DR"), None);
    }
}
