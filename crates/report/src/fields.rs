//! Optional-field accessors over loosely shaped report documents.

use serde_json::{Map, Value};

pub type Object = Map<String, Value>;

/// Whether a value counts as present: not null, not `false`, not zero, not an
/// empty string/list/object.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// First present value among `keys`, in priority order.
pub(crate) fn first_present<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| truthy(value))
}

/// First present value among `keys`, if that value is a string.
pub(crate) fn first_str<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a str> {
    first_present(obj, keys).and_then(Value::as_str)
}

pub(crate) fn first_object<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Object> {
    first_present(obj, keys).and_then(Value::as_object)
}

/// Field value unless it is missing or `null`.
pub(crate) fn non_null<'a>(obj: &'a Object, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

/// Integer view of a JSON number; fractional values are truncated.
pub(crate) fn number_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
}

/// Text of a scalar value; strings verbatim, numbers and booleans rendered.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Object elements of the list stored under `key`; other elements are skipped.
pub(crate) fn object_items<'a>(obj: &'a Object, key: &str) -> impl Iterator<Item = &'a Object> {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}
