//! Record helpers: field paths, loose equality and merging.
//!
//! A record is an arbitrary JSON value, normally an object. Stores replace
//! records wholesale; these helpers are what the query and join layers use
//! to look inside them.

use serde_json::{Map, Value};

/// A stored item. Usually a JSON object.
pub type Record = Value;

/// Field that writers set to flag records with local changes pending sync.
///
/// The query and join layers treat it as an ordinary field.
pub const MODIFIED_DATA_FIELD: &str = "ModifiedData";

/// Split write data into records: an array writes each element, anything
/// else is a single record.
pub fn into_batch(data: Value) -> Vec<Record> {
    match data {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Resolve a dotted field path (`"Address.City"`) inside a record.
///
/// Returns `None` when any segment is missing or a non-object is traversed.
pub fn field_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.as_object()?.get(segment))
}

/// Coerce a value to the string used for loose comparison.
///
/// `None` stands for null and missing values. Integral numbers render
/// without a fractional part so that `123` and `123.0` both give `"123"`.
pub fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(number_string(n)),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| loose_string(Some(v)).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some("[object Object]".to_string()),
    }
}

fn number_string(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
            format!("{}", f as i64)
        }
        Some(f) => format!("{}", f),
        None => n.to_string(),
    }
}

/// Case-insensitive, null-aware equality used for joins and key matching.
///
/// Both null: equal. One null: never equal. Otherwise both sides are
/// coerced to strings and compared lowercased, so `123 == "123"`.
pub fn loose_equals(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (loose_string(a), loose_string(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => false,
    }
}

/// Shallow-merge `overlay` onto a copy of `base`. Overlay fields win.
///
/// Neither input is modified. Non-object inputs contribute no fields, so the
/// result is always an object.
pub fn merged(base: &Value, overlay: &Value) -> Value {
    let mut out = base.as_object().cloned().unwrap_or_default();
    if let Some(fields) = overlay.as_object() {
        for (name, value) in fields {
            out.insert(name.clone(), value.clone());
        }
    }
    Value::Object(out)
}

/// Apply patch fields onto a record in place. Patch fields win.
pub fn apply_patch(record: &mut Value, patch: &Map<String, Value>) {
    if !record.is_object() {
        *record = Value::Object(Map::new());
    }
    if let Value::Object(fields) = record {
        for (name, value) in patch {
            fields.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batches() {
        assert_eq!(into_batch(json!([{"a": 1}, {"a": 2}])).len(), 2);
        assert_eq!(into_batch(json!({"a": 1})), vec![json!({"a": 1})]);
        assert!(into_batch(json!([])).is_empty());
    }

    #[test]
    fn field_paths() {
        let record = json!({"CustomerID": 1, "Address": {"City": "Leeds"}});

        assert_eq!(field_value(&record, "CustomerID"), Some(&json!(1)));
        assert_eq!(field_value(&record, "Address.City"), Some(&json!("Leeds")));
        assert_eq!(field_value(&record, "Address.Zip"), None);
        assert_eq!(field_value(&record, "CustomerID.Nested"), None);
    }

    #[test]
    fn loose_equality() {
        assert!(loose_equals(Some(&json!(123)), Some(&json!("123"))));
        assert!(loose_equals(Some(&json!("ABC")), Some(&json!("abc"))));
        assert!(loose_equals(Some(&json!(2.0)), Some(&json!("2"))));
        assert!(loose_equals(None, Some(&Value::Null)));
        assert!(loose_equals(None, None));
        assert!(!loose_equals(Some(&json!("x")), None));
        assert!(!loose_equals(Some(&json!(1)), Some(&json!(2))));
    }

    #[test]
    fn loose_strings() {
        assert_eq!(loose_string(Some(&json!(true))), Some("true".into()));
        assert_eq!(loose_string(Some(&json!(1.5))), Some("1.5".into()));
        assert_eq!(loose_string(Some(&json!([1, "a"]))), Some("1,a".into()));
        assert_eq!(loose_string(Some(&Value::Null)), None);
    }

    #[test]
    fn merge_does_not_touch_inputs() {
        let left = json!({"CustomerID": 1, "Name": "A"});
        let right = json!({"CustomerID": 1, "Name": "B", "PolicyID": 9});

        let out = merged(&left, &right);

        assert_eq!(out, json!({"CustomerID": 1, "Name": "B", "PolicyID": 9}));
        assert_eq!(left, json!({"CustomerID": 1, "Name": "A"}));
        assert_eq!(right, json!({"CustomerID": 1, "Name": "B", "PolicyID": 9}));
    }

    #[test]
    fn patch_overwrites_fields() {
        let mut record = json!({"CustomerID": 124, "CustomerName": "Y"});
        let patch = json!({"CustomerName": "Z", "ModifiedData": true});

        apply_patch(&mut record, patch.as_object().unwrap());

        assert_eq!(
            record,
            json!({"CustomerID": 124, "CustomerName": "Z", "ModifiedData": true})
        );
    }
}
