use anyhow::Result;
use indexmap::IndexSet;
use serde_json::{Map, Value};

use crate::error::ModError;

/// Short human readable name of a JSON value's kind, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Keep only ASCII alphanumerics, `_` and `-`.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Join two logical, `/`-separated names. An empty directory means the root.
pub fn join_logical(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Append `ext` unless the name already carries it.
pub fn with_extension(name: &str, ext: &str) -> String {
    if name.ends_with(ext) {
        name.to_owned()
    } else {
        format!("{}{}", name, ext)
    }
}

/// Hand out `stem`, or `stem_N` if it was already handed out from `used`.
pub fn unique_stem(used: &mut IndexSet<String>, stem: &str) -> String {
    if used.insert(stem.to_owned()) {
        return stem.to_owned();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Interpret `value` as an array of objects. Null entries are dropped.
pub fn to_object_array(key: &str, value: Value) -> Result<Vec<Map<String, Value>>> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(ModError::shape(key, "an array of objects", &other).into()),
    };
    let mut objects = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => objects.push(map),
            Value::Null => {}
            other => return Err(ModError::shape(key, "an array of objects", &other).into()),
        }
    }
    Ok(objects)
}

/// Remove `key` and require it to be a string when present.
pub fn take_string(data: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    match data.shift_remove(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ModError::shape(key, "a string", &other).into()),
    }
}

/// Remove `key` and require it to be an array of strings when present.
pub fn take_string_list(data: &mut Map<String, Value>, key: &str) -> Result<Option<Vec<String>>> {
    data.shift_remove(key)
        .map(|value| string_list(key, &value))
        .transpose()
}

/// Read an array of strings stored under `key`.
pub fn string_list(key: &str, value: &Value) -> Result<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(ModError::shape(key, "an array of strings", other).into()),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(ModError::shape(key, "an array of strings", other).into()),
        })
        .collect()
}

/// Put `value` under `new` where `old` used to sit, keeping key order.
pub fn replace_key(data: &mut Map<String, Value>, old: &str, new: &str, value: Value) {
    let previous = std::mem::take(data);
    let mut value = Some(value);
    for (key, existing) in previous {
        if key == old {
            if let Some(value) = value.take() {
                data.insert(new.to_owned(), value);
            }
        } else if key != new {
            data.insert(key, existing);
        }
    }
    if let Some(value) = value {
        data.insert(new.to_owned(), value);
    }
}

/// Returns the value at `key` only if it is a non-empty string.
pub fn non_empty_str<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    match data.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_label_strips_rather_than_replaces() {
        assert_eq!(sanitize_label("first class"), "firstclass");
        assert_eq!(sanitize_label("Bag (Blue) #2"), "BagBlue2");
        assert_eq!(sanitize_label("keep_this-too"), "keep_this-too");
        assert_eq!(sanitize_label("héllo wörld"), "hllowrld");
        assert_eq!(sanitize_label("!!!"), "");
    }

    #[test]
    fn test_unique_stem_suffixes_repeats() {
        let mut used = IndexSet::new();
        assert_eq!(unique_stem(&mut used, "card"), "card");
        assert_eq!(unique_stem(&mut used, "card"), "card_1");
        assert_eq!(unique_stem(&mut used, "card"), "card_2");
        assert_eq!(unique_stem(&mut used, "deck"), "deck");
    }

    #[test]
    fn test_join_logical() {
        assert_eq!(join_logical("", "a.json"), "a.json");
        assert_eq!(join_logical("bag", "a.json"), "bag/a.json");
        assert_eq!(join_logical("bag/", "a.json"), "bag/a.json");
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("ui/Shop", ".xml"), "ui/Shop.xml");
        assert_eq!(with_extension("ui/Shop.xml", ".xml"), "ui/Shop.xml");
    }

    #[test]
    fn test_to_object_array_drops_nulls() {
        let arr = to_object_array("Decals", json!([{"a": 1}, null, {"b": 2}])).unwrap();
        assert_eq!(arr.len(), 2);
        assert!(to_object_array("Decals", json!([1])).is_err());
        assert!(to_object_array("Decals", json!({"a": 1})).is_err());
    }

    #[test]
    fn test_replace_key_keeps_position() {
        let mut data = json!({"a": 1, "LuaScript_path": "x.ttslua", "b": 2})
            .as_object()
            .cloned()
            .unwrap();
        replace_key(&mut data, "LuaScript_path", "LuaScript", json!("print(1)"));
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["a", "LuaScript", "b"]);

        replace_key(&mut data, "absent", "c", json!(3));
        assert_eq!(data.keys().last().map(String::as_str), Some("c"));
    }

    #[test]
    fn test_take_string_rejects_other_kinds() {
        let mut data = json!({"GUID": 5, "Name": "x"}).as_object().cloned().unwrap();
        assert_eq!(take_string(&mut data, "Name").unwrap().as_deref(), Some("x"));
        assert_eq!(take_string(&mut data, "Missing").unwrap(), None);
        let err = take_string(&mut data, "GUID").unwrap_err();
        assert!(err.to_string().contains("GUID"));
    }
}
